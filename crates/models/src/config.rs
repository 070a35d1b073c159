use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub build: BuildConfig,
    pub service: ServiceConfig,
    pub docker: DockerConfig,
    pub data: DataConfig,
    pub launch: LaunchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Base runtime image. Must carry an explicit version pin.
    pub base_image: String,
    /// OS packages installed before the dependency manifest.
    pub os_packages: Vec<String>,
    /// Dependency manifest file, relative to the build context root.
    pub manifest_file: String,
    /// Working directory inside the image.
    pub workdir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// ASGI application import target, `module.path:attribute`.
    pub app_target: String,
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DockerConfig {
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LaunchConfig {
    /// Probe the published port after start until it accepts connections.
    pub readiness_probe: bool,
    pub readiness_timeout_ms: u64,
    /// Grace period passed to the container stop on shutdown.
    pub stop_grace_secs: u64,
    /// Host port to publish the service port on. Defaults to the service port.
    pub host_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build: BuildConfig {
                base_image: "python:3.11-slim".to_string(),
                os_packages: vec!["build-essential".to_string()],
                manifest_file: "requirements.txt".to_string(),
                workdir: "/app".to_string(),
            },
            service: ServiceConfig {
                app_target: "src.main:app".to_string(),
                bind: "0.0.0.0".to_string(),
                port: 8000,
            },
            docker: DockerConfig {
                host: "".to_string(),
            },
            data: DataConfig {
                dir: "data".to_string(),
            },
            launch: LaunchConfig {
                readiness_probe: true,
                readiness_timeout_ms: 30000,
                stop_grace_secs: 10,
                host_port: None,
            },
        }
    }
}

impl Config {
    /// Host port the launched container publishes the service on.
    pub fn host_port(&self) -> u16 {
        self.launch.host_port.unwrap_or(self.service.port)
    }
}
