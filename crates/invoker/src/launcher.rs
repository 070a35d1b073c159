use crate::docker::{CreateSpec, DockerLike};
use asgipack_models::{Config, LaunchSpec, PackError};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A launched service container. One container, one foreground process;
/// stopping the container ends the service.
#[derive(Debug, Clone)]
pub struct RunningService {
    pub container_id: String,
    pub name: String,
    pub host_port: u16,
}

pub struct ServiceLauncher {
    docker: Arc<dyn DockerLike>,
    config: Config,
}

impl ServiceLauncher {
    pub fn new(docker: Arc<dyn DockerLike>, config: Config) -> Self {
        Self { docker, config }
    }

    /// Create and start a container for a built image. The launch
    /// specification's environment is passed at creation so the process
    /// observes it from its first instruction.
    #[instrument(skip(self, launch))]
    pub async fn launch(
        &self,
        image_ref: &str,
        launch: &LaunchSpec,
    ) -> Result<RunningService, PackError> {
        let name = format!("asgipack-{}", Uuid::new_v4());
        let host_port = self.config.host_port();

        let spec = CreateSpec {
            image: image_ref.to_string(),
            name: name.clone(),
            env: launch.env.clone(),
            port: launch.port,
            host_port,
            labels: vec![("managed-by".to_string(), "asgipack".to_string())],
        };

        let container_id = self
            .docker
            .create(spec)
            .await
            .map_err(|e| PackError::DockerError {
                message: e.to_string(),
            })?;
        self.docker
            .start(&container_id)
            .await
            .map_err(|e| PackError::LaunchError {
                reason: e.to_string(),
            })?;

        info!(
            "Launched {} from {} on port {}",
            name, image_ref, host_port
        );

        if self.config.launch.readiness_probe {
            self.wait_ready(host_port).await;
        }

        Ok(RunningService {
            container_id,
            name,
            host_port,
        })
    }

    /// Advisory readiness probe: poll the published port until it accepts a
    /// connection or the timeout passes. A service that never opens its
    /// port still runs; the probe only warns.
    async fn wait_ready(&self, host_port: u16) {
        let deadline = Duration::from_millis(self.config.launch.readiness_timeout_ms);
        let address = format!("127.0.0.1:{host_port}");

        let probe = async {
            loop {
                if TcpStream::connect(&address).await.is_ok() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        };

        match tokio::time::timeout(deadline, probe).await {
            Ok(()) => info!("Service ready on {}", address),
            Err(_) => warn!(
                "Service did not accept connections on {} within {:?}",
                address, deadline
            ),
        }
    }

    /// Forward container output to stdout until the log stream ends.
    pub fn stream_logs(&self, service: &RunningService) -> JoinHandle<()> {
        let docker = self.docker.clone();
        let container_id = service.container_id.clone();
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let follow = {
                let docker = docker.clone();
                let container_id = container_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = docker.follow_logs(&container_id, tx).await {
                        warn!("Log stream for {} failed: {}", container_id, e);
                    }
                })
            };
            while let Some(line) = rx.recv().await {
                print!("{line}");
            }
            let _ = follow.await;
        })
    }

    /// Block until the service process exits; returns its exit code.
    pub async fn wait(&self, service: &RunningService) -> Result<i64, PackError> {
        self.docker
            .wait_exit(&service.container_id)
            .await
            .map_err(|e| PackError::DockerError {
                message: e.to_string(),
            })
    }

    /// Stop (with the configured grace period) if still running, then
    /// remove the container.
    #[instrument(skip(self, service), fields(name = %service.name))]
    pub async fn cleanup(&self, service: &RunningService) -> Result<(), PackError> {
        let running = self
            .docker
            .inspect_running(&service.container_id)
            .await
            .unwrap_or(false);
        if running {
            self.docker
                .stop(&service.container_id, self.config.launch.stop_grace_secs)
                .await
                .map_err(|e| PackError::DockerError {
                    message: e.to_string(),
                })?;
        }
        self.docker
            .remove(&service.container_id, true)
            .await
            .map_err(|e| PackError::DockerError {
                message: e.to_string(),
            })?;
        info!("Cleaned up {}", service.name);
        Ok(())
    }
}
