use crate::target::AppTarget;
use serde::{Deserialize, Serialize};

/// Runtime environment configured for the service process. Set before the
/// process starts; never mutated during its lifetime.
pub const ENV_UNBUFFERED: (&str, &str) = ("PYTHONUNBUFFERED", "1");
pub const ENV_NO_BYTECODE: (&str, &str) = ("PYTHONDONTWRITEBYTECODE", "1");

/// The declared startup command of a built image: exactly one foreground
/// process, whose lifetime is 1:1 with the container's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Port the service listens on inside the container.
    pub port: u16,
}

impl LaunchSpec {
    pub fn for_target(target: &AppTarget, bind: &str, port: u16) -> Self {
        Self {
            program: "uvicorn".to_string(),
            args: vec![
                target.to_string(),
                "--host".to_string(),
                bind.to_string(),
                "--port".to_string(),
                port.to_string(),
            ],
            env: vec![
                (ENV_UNBUFFERED.0.to_string(), ENV_UNBUFFERED.1.to_string()),
                (ENV_NO_BYTECODE.0.to_string(), ENV_NO_BYTECODE.1.to_string()),
            ],
            port,
        }
    }

    /// Program and arguments as an exec-form argv.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    pub fn command_line(&self) -> String {
        self.argv().join(" ")
    }
}
