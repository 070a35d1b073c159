use crate::error::PackError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The ASGI application import target, `module.path:attribute`. The
/// application behind it is opaque; only the import syntax is validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppTarget {
    pub module: String,
    pub attribute: String,
}

fn valid_identifier(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

impl AppTarget {
    pub fn parse(target: &str) -> Result<Self, PackError> {
        let invalid = || PackError::InvalidTarget {
            target: target.to_string(),
        };

        let (module, attribute) = target.split_once(':').ok_or_else(invalid)?;
        if attribute.contains(':') || !valid_identifier(attribute) {
            return Err(invalid());
        }
        if module.is_empty() || !module.split('.').all(valid_identifier) {
            return Err(invalid());
        }

        Ok(Self {
            module: module.to_string(),
            attribute: attribute.to_string(),
        })
    }

    /// Source file the module maps to inside the build context,
    /// e.g. `src.main` -> `src/main.py`.
    pub fn module_file(&self) -> PathBuf {
        let mut path: PathBuf = self.module.split('.').collect();
        path.set_extension("py");
        path
    }
}

impl fmt::Display for AppTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.attribute)
    }
}
