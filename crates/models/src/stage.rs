use serde::{Deserialize, Serialize};
use std::fmt;

/// Stages of the image build pipeline, in the only order they may run.
///
/// A build that fails in any stage aborts as a whole; there is no retry and
/// no partial artifact. `CommandDeclared` is the terminal stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BuildStage {
    BaseSelected,
    OsDepsInstalled,
    AppDepsInstalled,
    SourceCopied,
    EnvConfigured,
    CommandDeclared,
}

impl BuildStage {
    pub const ALL: [BuildStage; 6] = [
        BuildStage::BaseSelected,
        BuildStage::OsDepsInstalled,
        BuildStage::AppDepsInstalled,
        BuildStage::SourceCopied,
        BuildStage::EnvConfigured,
        BuildStage::CommandDeclared,
    ];

    pub fn first() -> Self {
        BuildStage::BaseSelected
    }

    /// The only stage allowed to follow this one. `None` for the terminal stage.
    pub fn successor(self) -> Option<Self> {
        match self {
            BuildStage::BaseSelected => Some(BuildStage::OsDepsInstalled),
            BuildStage::OsDepsInstalled => Some(BuildStage::AppDepsInstalled),
            BuildStage::AppDepsInstalled => Some(BuildStage::SourceCopied),
            BuildStage::SourceCopied => Some(BuildStage::EnvConfigured),
            BuildStage::EnvConfigured => Some(BuildStage::CommandDeclared),
            BuildStage::CommandDeclared => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.successor().is_none()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStage::BaseSelected => "base-selected",
            BuildStage::OsDepsInstalled => "os-deps-installed",
            BuildStage::AppDepsInstalled => "app-deps-installed",
            BuildStage::SourceCopied => "source-copied",
            BuildStage::EnvConfigured => "env-configured",
            BuildStage::CommandDeclared => "command-declared",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_chain_covers_all_stages_once() {
        let mut seen = vec![BuildStage::first()];
        while let Some(next) = seen.last().unwrap().successor() {
            seen.push(next);
        }
        assert_eq!(seen, BuildStage::ALL);
    }

    #[test]
    fn command_declared_is_terminal() {
        assert!(BuildStage::CommandDeclared.is_terminal());
        assert!(!BuildStage::EnvConfigured.is_terminal());
    }
}
