use crate::error::PackError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A single dependency specifier: package name, optional extras, optional
/// version constraint. The grammar is the practical subset used by plain
/// requirement manifests; environment markers and URL requirements are not
/// accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub constraint: Option<VersionConstraint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionConstraint {
    pub op: ConstraintOp,
    pub version: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConstraintOp {
    Exact,
    NotEqual,
    AtLeast,
    AtMost,
    Greater,
    Less,
    Compatible,
}

impl ConstraintOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ConstraintOp::Exact => "==",
            ConstraintOp::NotEqual => "!=",
            ConstraintOp::AtLeast => ">=",
            ConstraintOp::AtMost => "<=",
            ConstraintOp::Greater => ">",
            ConstraintOp::Less => "<",
            ConstraintOp::Compatible => "~=",
        }
    }

    // Two-character operators first so ">=" is not read as ">" "=".
    const ALL: [ConstraintOp; 7] = [
        ConstraintOp::Exact,
        ConstraintOp::NotEqual,
        ConstraintOp::AtLeast,
        ConstraintOp::AtMost,
        ConstraintOp::Compatible,
        ConstraintOp::Greater,
        ConstraintOp::Less,
    ];
}

fn valid_package_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn valid_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'*' | b'+' | b'-' | b'!'))
}

impl Requirement {
    /// Parse one specifier, e.g. `fastapi==0.110.0` or `uvicorn[standard]>=0.29`.
    /// Errors carry the reason only; the manifest parser adds line numbers.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.trim();

        let (head, constraint) = match ConstraintOp::ALL
            .iter()
            .filter_map(|op| spec.find(op.as_str()).map(|idx| (idx, *op)))
            .min_by_key(|(idx, op)| (*idx, op.as_str().len() == 1))
        {
            Some((idx, op)) => {
                let version = spec[idx + op.as_str().len()..].trim();
                if !valid_version(version) {
                    return Err(format!("invalid version in specifier: {spec:?}"));
                }
                (
                    spec[..idx].trim_end(),
                    Some(VersionConstraint {
                        op,
                        version: version.to_string(),
                    }),
                )
            }
            None => (spec, None),
        };

        let (name, extras) = match head.find('[') {
            Some(open) => {
                let close = head
                    .rfind(']')
                    .filter(|close| *close == head.len() - 1 && *close > open)
                    .ok_or_else(|| format!("unclosed extras bracket in specifier: {spec:?}"))?;
                let extras = head[open + 1..close]
                    .split(',')
                    .map(|extra| extra.trim().to_string())
                    .collect::<Vec<_>>();
                if extras.iter().any(|extra| !valid_package_name(extra)) {
                    return Err(format!("invalid extra name in specifier: {spec:?}"));
                }
                (&head[..open], extras)
            }
            None => (head, Vec::new()),
        };

        if !valid_package_name(name) {
            return Err(format!("invalid package name: {name:?}"));
        }

        Ok(Self {
            name: name.to_string(),
            extras,
            constraint,
        })
    }

    /// Normalized name for set comparisons: lowercase, `_` and `.` folded to `-`.
    pub fn normalized_name(&self) -> String {
        self.name
            .to_ascii_lowercase()
            .replace(['_', '.'], "-")
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        if let Some(constraint) = &self.constraint {
            write!(f, "{}{}", constraint.op.as_str(), constraint.version)?;
        }
        Ok(())
    }
}

/// The declarative dependency manifest: the parsed form of a requirements
/// file, one specifier per logical line. Immutable after parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DependencyManifest {
    pub requirements: Vec<Requirement>,
}

impl DependencyManifest {
    /// Parse manifest text. Blank lines and `#` comment lines are skipped;
    /// any other malformed line is fatal and reported with its line number.
    pub fn parse(text: &str) -> Result<Self, PackError> {
        let mut requirements = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = match raw.find(" #") {
                Some(comment) => &raw[..comment],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let requirement =
                Requirement::parse(line).map_err(|reason| PackError::InvalidManifest {
                    line: idx + 1,
                    reason,
                })?;
            requirements.push(requirement);
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Canonical form: one specifier per line, sorted by normalized name.
    /// Two manifests that install the same dependency set canonicalize
    /// identically regardless of line order.
    pub fn canonical(&self) -> String {
        let mut requirements: Vec<&Requirement> = self.requirements.iter().collect();
        requirements.sort_by_key(|requirement| requirement.normalized_name());
        requirements
            .iter()
            .map(|requirement| requirement.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Hex sha256 of the canonical form.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pinned_specifiers() {
        let manifest = DependencyManifest::parse("fastapi==0.110.0\nuvicorn==0.29.0\n").unwrap();
        assert_eq!(manifest.requirements.len(), 2);
        assert_eq!(manifest.requirements[0].name, "fastapi");
        assert_eq!(
            manifest.requirements[0].constraint,
            Some(VersionConstraint {
                op: ConstraintOp::Exact,
                version: "0.110.0".to_string(),
            })
        );
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let text = "# web stack\n\nfastapi==0.110.0  # pinned\n";
        let manifest = DependencyManifest::parse(text).unwrap();
        assert_eq!(manifest.requirements.len(), 1);
        assert_eq!(manifest.requirements[0].to_string(), "fastapi==0.110.0");
    }

    #[test]
    fn parses_extras_and_range_operators() {
        let requirement = Requirement::parse("uvicorn[standard]>=0.29").unwrap();
        assert_eq!(requirement.name, "uvicorn");
        assert_eq!(requirement.extras, vec!["standard".to_string()]);
        assert_eq!(requirement.constraint.as_ref().unwrap().op, ConstraintOp::AtLeast);
    }

    #[test]
    fn rejects_malformed_lines_with_line_number() {
        let err = DependencyManifest::parse("fastapi==0.110.0\n==1.0\n").unwrap_err();
        match err {
            PackError::InvalidManifest { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_bad_version_text() {
        assert!(Requirement::parse("fastapi==<bad>").is_err());
        assert!(Requirement::parse("fastapi[oops==1.0").is_err());
    }

    #[test]
    fn digest_ignores_line_order() {
        let a = DependencyManifest::parse("fastapi==0.110.0\nuvicorn==0.29.0").unwrap();
        let b = DependencyManifest::parse("uvicorn==0.29.0\nfastapi==0.110.0").unwrap();
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_changes_with_versions() {
        let a = DependencyManifest::parse("fastapi==0.110.0").unwrap();
        let b = DependencyManifest::parse("fastapi==0.111.0").unwrap();
        assert_ne!(a.digest(), b.digest());
    }
}
