use crate::context::BuildContext;
use asgipack_models::{BuildStage, Config, LaunchSpec, PackError, ENV_NO_BYTECODE, ENV_UNBUFFERED};

/// An ordered, gate-checked build plan. Each pipeline stage contributes the
/// image instructions that realize it; stages can only be appended in their
/// one legal order, and a plan is only usable once the terminal stage has
/// been declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    stages: Vec<(BuildStage, Vec<String>)>,
}

impl BuildPlan {
    /// Render the full plan for a validated context. The stage sequence is
    /// the pipeline's state machine; `PlanBuilder` enforces it.
    pub fn render(config: &Config, context: &BuildContext) -> Result<Self, PackError> {
        let build = &config.build;
        let manifest_file = context.manifest_file();
        let launch = LaunchSpec::for_target(&context.target, &config.service.bind, config.service.port);

        let mut builder = PlanBuilder::new();

        builder.stage(
            BuildStage::BaseSelected,
            vec![format!("FROM {}", build.base_image)],
        )?;

        builder.stage(
            BuildStage::OsDepsInstalled,
            vec![format!(
                "RUN apt-get update && apt-get install -y --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*",
                build.os_packages.join(" ")
            )],
        )?;

        // Manifest before source: a source-only edit must not invalidate
        // the dependency layer.
        builder.stage(
            BuildStage::AppDepsInstalled,
            vec![
                format!("WORKDIR {}", build.workdir),
                format!("COPY {manifest_file} {manifest_file}"),
                format!("RUN pip install --no-cache-dir -r {manifest_file}"),
            ],
        )?;

        builder.stage(BuildStage::SourceCopied, vec!["COPY . .".to_string()])?;

        builder.stage(
            BuildStage::EnvConfigured,
            vec![format!(
                "ENV {}={} \\\n    {}={}",
                ENV_UNBUFFERED.0, ENV_UNBUFFERED.1, ENV_NO_BYTECODE.0, ENV_NO_BYTECODE.1
            )],
        )?;

        let argv = launch
            .argv()
            .iter()
            .map(|arg| format!("\"{arg}\""))
            .collect::<Vec<_>>()
            .join(", ");
        builder.stage(
            BuildStage::CommandDeclared,
            vec![
                format!("EXPOSE {}", launch.port),
                format!("CMD [{argv}]"),
            ],
        )?;

        builder.finish()
    }

    /// Stages in declaration order.
    pub fn stages(&self) -> Vec<BuildStage> {
        self.stages.iter().map(|(stage, _)| *stage).collect()
    }

    pub fn instructions_for(&self, stage: BuildStage) -> Option<&[String]> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, lines)| lines.as_slice())
    }

    /// The rendered Dockerfile: stage instruction blocks separated by blank
    /// lines. Byte-identical for identical inputs.
    pub fn dockerfile(&self) -> String {
        let mut out = String::new();
        for (_, lines) in &self.stages {
            for line in lines {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        out.pop();
        out
    }
}

/// Appends stages strictly in successor order. Skipping, repeating, or
/// reordering a stage is an error, as is finishing before the terminal
/// stage has been appended.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    stages: Vec<(BuildStage, Vec<String>)>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, stage: BuildStage, lines: Vec<String>) -> Result<&mut Self, PackError> {
        let expected = match self.stages.last() {
            None => BuildStage::first(),
            Some((last, _)) => last.successor().ok_or(PackError::StageOutOfOrder {
                expected: *last,
                actual: stage,
            })?,
        };
        if stage != expected {
            return Err(PackError::StageOutOfOrder {
                expected,
                actual: stage,
            });
        }
        self.stages.push((stage, lines));
        Ok(self)
    }

    pub fn finish(self) -> Result<BuildPlan, PackError> {
        match self.stages.last() {
            Some((last, _)) if last.is_terminal() => Ok(BuildPlan {
                stages: self.stages,
            }),
            Some((last, _)) => Err(PackError::IncompletePlan { last: *last }),
            None => Err(PackError::IncompletePlan {
                last: BuildStage::first(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asgipack_models::Config;
    use std::fs;
    use std::path::Path;

    fn sample_context(dir: &Path) -> BuildContext {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("requirements.txt"), "fastapi==0.110.0\nuvicorn==0.29.0\n").unwrap();
        fs::write(dir.join("src/main.py"), "app = object()\n").unwrap();
        BuildContext::prepare(dir, &Config::default()).unwrap()
    }

    #[test]
    fn rendered_plan_walks_every_stage_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let plan = BuildPlan::render(&Config::default(), &sample_context(dir.path())).unwrap();
        assert_eq!(plan.stages(), BuildStage::ALL.to_vec());
    }

    #[test]
    fn dependency_install_precedes_source_copy() {
        let dir = tempfile::tempdir().unwrap();
        let plan = BuildPlan::render(&Config::default(), &sample_context(dir.path())).unwrap();
        let dockerfile = plan.dockerfile();

        let deps = dockerfile.find("pip install").unwrap();
        let source = dockerfile.find("COPY . .").unwrap();
        let os_deps = dockerfile.find("apt-get install").unwrap();
        assert!(os_deps < deps);
        assert!(deps < source);
    }

    #[test]
    fn command_and_env_are_declared() {
        let dir = tempfile::tempdir().unwrap();
        let plan = BuildPlan::render(&Config::default(), &sample_context(dir.path())).unwrap();
        let dockerfile = plan.dockerfile();

        assert!(dockerfile.contains("PYTHONUNBUFFERED=1"));
        assert!(dockerfile.contains("PYTHONDONTWRITEBYTECODE=1"));
        assert!(dockerfile.contains(
            r#"CMD ["uvicorn", "src.main:app", "--host", "0.0.0.0", "--port", "8000"]"#
        ));
        assert!(dockerfile.contains("EXPOSE 8000"));
    }

    #[test]
    fn rendering_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let context = sample_context(dir.path());
        let first = BuildPlan::render(&Config::default(), &context).unwrap();
        let second = BuildPlan::render(&Config::default(), &context).unwrap();
        assert_eq!(first.dockerfile(), second.dockerfile());
    }

    #[test]
    fn builder_rejects_skipped_stage() {
        let mut builder = PlanBuilder::new();
        builder
            .stage(BuildStage::BaseSelected, vec!["FROM python:3.11-slim".into()])
            .unwrap();
        let err = builder
            .stage(BuildStage::AppDepsInstalled, vec!["RUN pip install".into()])
            .unwrap_err();
        match err {
            PackError::StageOutOfOrder { expected, actual } => {
                assert_eq!(expected, BuildStage::OsDepsInstalled);
                assert_eq!(actual, BuildStage::AppDepsInstalled);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn builder_rejects_wrong_first_stage() {
        let mut builder = PlanBuilder::new();
        let err = builder
            .stage(BuildStage::SourceCopied, vec!["COPY . .".into()])
            .unwrap_err();
        assert!(matches!(err, PackError::StageOutOfOrder { .. }));
    }

    #[test]
    fn builder_rejects_unfinished_plan() {
        let mut builder = PlanBuilder::new();
        builder
            .stage(BuildStage::BaseSelected, vec!["FROM python:3.11-slim".into()])
            .unwrap();
        let err = builder.finish().unwrap_err();
        assert!(matches!(
            err,
            PackError::IncompletePlan {
                last: BuildStage::BaseSelected
            }
        ));
    }
}
