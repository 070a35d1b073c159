use crate::context::BuildContext;
use crate::plan::BuildPlan;
use asgipack_models::PackError;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{error, info, instrument};

/// Executes a staged build context into an image. The production backend
/// shells out to `docker build`; tests substitute their own.
#[async_trait]
pub trait ImageBackend: Send + Sync + 'static {
    async fn build(&self, image_ref: &str, context_dir: &Path) -> Result<(), PackError>;
}

/// `docker build` via the CLI, stdio captured. Build failures surface the
/// tool's stderr verbatim; there is no retry at this layer.
pub struct DockerCliBackend;

#[async_trait]
impl ImageBackend for DockerCliBackend {
    async fn build(&self, image_ref: &str, context_dir: &Path) -> Result<(), PackError> {
        let build_result = Command::new("docker")
            .arg("build")
            .arg("-t")
            .arg(image_ref)
            .arg(context_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PackError::DockerError {
                message: e.to_string(),
            })?;

        if !build_result.status.success() {
            let stderr = String::from_utf8_lossy(&build_result.stderr);
            error!("docker build failed: {}", stderr);
            return Err(PackError::ImageBuild {
                message: stderr.into_owned(),
            });
        }
        Ok(())
    }
}

pub struct ImageBuilder {
    backend: Arc<dyn ImageBackend>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(DockerCliBackend),
        }
    }

    pub fn with_backend(backend: Arc<dyn ImageBackend>) -> Self {
        Self { backend }
    }

    /// Stage the context into a scratch directory and build the image.
    /// Staging mirrors the plan's stage order: manifest first, source tree
    /// second, rendered Dockerfile last. The scratch directory is dropped
    /// whether or not the build succeeds; a failed build leaves no artifact.
    #[instrument(skip(self, context, plan))]
    pub async fn build_image(
        &self,
        context: &BuildContext,
        plan: &BuildPlan,
        image_ref: &str,
    ) -> Result<(), PackError> {
        let temp_dir = tempfile::tempdir().map_err(|e| PackError::InternalError {
            reason: e.to_string(),
        })?;
        let staging = temp_dir.path();

        stage_manifest(context, staging)?;
        stage_source_tree(context.root(), staging)?;
        fs::write(staging.join("Dockerfile"), plan.dockerfile()).map_err(|e| {
            PackError::InternalError {
                reason: e.to_string(),
            }
        })?;

        info!("Building image: {}", image_ref);
        self.backend.build(image_ref, staging).await?;
        info!("Built image: {}", image_ref);
        Ok(())
    }
}

fn stage_manifest(context: &BuildContext, staging: &Path) -> Result<(), PackError> {
    let name = context.manifest_file();
    fs::copy(context.root().join(name), staging.join(name)).map_err(|e| PackError::SourceCopy {
        message: format!("{name}: {e}"),
    })?;
    Ok(())
}

fn stage_source_tree(root: &Path, staging: &Path) -> Result<(), PackError> {
    copy_dir(root, staging)
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), PackError> {
    let entries = fs::read_dir(from).map_err(|e| PackError::SourceCopy {
        message: format!("{}: {}", from.display(), e),
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| PackError::SourceCopy {
            message: e.to_string(),
        })?;
        let path = entry.path();
        let name = entry.file_name();
        let dest = to.join(&name);
        if path.is_dir() {
            if name == ".git" {
                continue;
            }
            fs::create_dir_all(&dest).map_err(|e| PackError::SourceCopy {
                message: format!("{}: {}", dest.display(), e),
            })?;
            copy_dir(&path, &dest)?;
        } else if path.is_file() {
            fs::copy(&path, &dest).map_err(|e| PackError::SourceCopy {
                message: format!("{}: {}", path.display(), e),
            })?;
        }
    }
    Ok(())
}
