use crate::stage::BuildStage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Manifest not found: {path}")]
    ManifestNotFound { path: String },

    #[error("Invalid manifest entry at line {line}: {reason}")]
    InvalidManifest { line: usize, reason: String },

    #[error("Invalid application target: {target}")]
    InvalidTarget { target: String },

    #[error("Invalid build context: {reason}")]
    InvalidContext { reason: String },

    #[error("Floating base image pin: {image}")]
    FloatingBasePin { image: String },

    #[error("Pipeline stage out of order: expected {expected}, got {actual}")]
    StageOutOfOrder {
        expected: BuildStage,
        actual: BuildStage,
    },

    #[error("Build plan incomplete: ends at {last}")]
    IncompletePlan { last: BuildStage },

    #[error("Base image pull failed: {message}")]
    BaseImagePull { message: String },

    #[error("OS package install failed: {message}")]
    OsPackageInstall { message: String },

    #[error("Dependency install failed: {message}")]
    DependencyInstall { message: String },

    #[error("Source copy failed: {message}")]
    SourceCopy { message: String },

    #[error("Image build failed: {message}")]
    ImageBuild { message: String },

    #[error("Docker error: {message}")]
    DockerError { message: String },

    #[error("Launch failed: {reason}")]
    LaunchError { reason: String },

    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("Internal error: {reason}")]
    InternalError { reason: String },
}

impl PackError {
    /// The pipeline stage a failure belongs to, when it maps to one.
    /// Validation, launch, and configuration failures happen outside the
    /// staged part of the pipeline and have no stage.
    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            PackError::BaseImagePull { .. } => Some(BuildStage::BaseSelected),
            PackError::OsPackageInstall { .. } => Some(BuildStage::OsDepsInstalled),
            PackError::DependencyInstall { .. } => Some(BuildStage::AppDepsInstalled),
            PackError::SourceCopy { .. } => Some(BuildStage::SourceCopied),
            PackError::StageOutOfOrder { actual, .. } => Some(*actual),
            _ => None,
        }
    }

    /// Process exit code for the operator binary. Input and configuration
    /// problems exit 2, everything else 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            PackError::ManifestNotFound { .. }
            | PackError::InvalidManifest { .. }
            | PackError::InvalidTarget { .. }
            | PackError::InvalidContext { .. }
            | PackError::FloatingBasePin { .. }
            | PackError::ConfigError { .. } => 2,
            _ => 1,
        }
    }
}
