use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::models::{
    ContainerCreateResponse, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;

use asgipack_models::{Config as AppConfig, PackError};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

/// Everything the launcher needs to create a service container.
#[derive(Clone, Debug)]
pub struct CreateSpec {
    pub image: String,
    pub name: String,
    pub env: Vec<(String, String)>,
    /// Port the service listens on inside the container.
    pub port: u16,
    /// Host port the container port is published on.
    pub host_port: u16,
    pub labels: Vec<(String, String)>,
}

impl Default for CreateSpec {
    fn default() -> Self {
        Self {
            image: "test:pinned".to_string(),
            name: "test-container".to_string(),
            env: vec![],
            port: 8000,
            host_port: 8000,
            labels: vec![],
        }
    }
}

#[async_trait]
pub trait DockerLike: Send + Sync + 'static {
    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String>; // returns container_id
    async fn start(&self, container_id: &str) -> anyhow::Result<()>;
    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()>;
    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()>;
    async fn inspect_running(&self, container_id: &str) -> anyhow::Result<bool>;
    /// Block until the container exits; returns its exit code.
    async fn wait_exit(&self, container_id: &str) -> anyhow::Result<i64>;
    /// Stream container output lines into `sink` until the stream ends.
    async fn follow_logs(
        &self,
        container_id: &str,
        sink: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<()>;
}

pub struct Invoker {
    docker: Docker,
    config: AppConfig,
}

impl Invoker {
    pub fn new(config: AppConfig) -> Result<Self, PackError> {
        let docker = if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            if docker_host.starts_with("tcp://") {
                Docker::connect_with_http(&docker_host, 120, bollard::API_DEFAULT_VERSION)
                    .map_err(|e| PackError::DockerError {
                        message: format!("Failed to connect to Docker at {docker_host}: {e}"),
                    })?
            } else {
                Docker::connect_with_socket_defaults().map_err(|e| PackError::DockerError {
                    message: e.to_string(),
                })?
            }
        } else {
            Docker::connect_with_socket_defaults().map_err(|e| PackError::DockerError {
                message: e.to_string(),
            })?
        };

        Ok(Self { docker, config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[async_trait]
impl DockerLike for Invoker {
    #[instrument(skip(self, spec))]
    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let container_port = format!("{}/tcp", spec.port);
        let port_bindings = HashMap::from([(
            container_port.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        )]);

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            // The container must not resurrect the process: its lifecycle
            // is 1:1 with the service process.
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(HashMap::from([(container_port, HashMap::new())])),
            labels: Some(spec.labels.iter().cloned().collect()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response: ContainerCreateResponse = self
            .docker
            .create_container(Some(options), container_config)
            .await?;

        info!("Created container: {} with ID: {}", spec.name, response.id);
        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn start(&self, container_id: &str) -> anyhow::Result<()> {
        let options = StartContainerOptions::<String> {
            ..Default::default()
        };
        self.docker.start_container(container_id, Some(options)).await?;
        info!("Started container: {}", container_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()> {
        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };
        self.docker.stop_container(container_id, Some(options)).await?;
        info!("Stopped container: {}", container_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(container_id, Some(options)).await?;
        info!("Removed container: {}", container_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn inspect_running(&self, container_id: &str) -> anyhow::Result<bool> {
        let container = self.docker.inspect_container(container_id, None).await?;
        let running = container
            .state
            .and_then(|state| state.running)
            .unwrap_or(false);
        Ok(running)
    }

    #[instrument(skip(self))]
    async fn wait_exit(&self, container_id: &str) -> anyhow::Result<i64> {
        loop {
            let container = self.docker.inspect_container(container_id, None).await?;
            if let Some(state) = container.state {
                let running = state.running.unwrap_or(false);
                if !running {
                    if let Some(exit_code) = state.exit_code {
                        return Ok(exit_code);
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    #[instrument(skip(self, sink))]
    async fn follow_logs(
        &self,
        container_id: &str,
        sink: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<()> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));
        while let Some(log) = stream.next().await {
            match log {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => {
                    let line = String::from_utf8_lossy(&message).into_owned();
                    if sink.send(line).is_err() {
                        break;
                    }
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => {
                    error!("Error reading container logs: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }
}
