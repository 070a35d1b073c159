use asgipack_models::{AppTarget, Config, DependencyManifest, PackError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// The validated build context: a root directory holding the dependency
/// manifest and the application source tree. Fixed at build time.
#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
    manifest_file: String,
    pub manifest: DependencyManifest,
    pub target: AppTarget,
}

impl BuildContext {
    /// Validate the context root against the configuration: the manifest
    /// must exist and parse, the application target must be syntactically
    /// valid and map to a file in the tree, and the base image pin must not
    /// float. Any failure here aborts the build before a plan exists.
    #[instrument(skip(config))]
    pub fn prepare(root: &Path, config: &Config) -> Result<Self, PackError> {
        if !root.is_dir() {
            return Err(PackError::InvalidContext {
                reason: format!("context root is not a directory: {}", root.display()),
            });
        }

        reject_floating_pin(&config.build.base_image)?;

        let manifest_path = root.join(&config.build.manifest_file);
        if !manifest_path.is_file() {
            return Err(PackError::ManifestNotFound {
                path: manifest_path.display().to_string(),
            });
        }
        let manifest_text =
            fs::read_to_string(&manifest_path).map_err(|e| PackError::InternalError {
                reason: e.to_string(),
            })?;
        let manifest = DependencyManifest::parse(&manifest_text)?;

        let target = AppTarget::parse(&config.service.app_target)?;
        let module_file = root.join(target.module_file());
        if !module_file.is_file() {
            return Err(PackError::InvalidContext {
                reason: format!(
                    "application module for {} not found at {}",
                    target,
                    module_file.display()
                ),
            });
        }

        debug!(
            root = %root.display(),
            requirements = manifest.requirements.len(),
            "build context validated"
        );

        Ok(Self {
            root: root.to_path_buf(),
            manifest_file: config.build.manifest_file.clone(),
            manifest,
            target,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    pub fn manifest_digest(&self) -> String {
        self.manifest.digest()
    }

    /// Hex sha256 over the source tree: every regular file in sorted
    /// relative-path order, path bytes then content bytes. Unchanged trees
    /// digest identically across rebuilds.
    pub fn source_digest(&self) -> Result<String, PackError> {
        let mut files = Vec::new();
        collect_files(&self.root, &self.root, &mut files)?;
        files.sort();

        let mut hasher = Sha256::new();
        for relative in &files {
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0]);
            let bytes = fs::read(self.root.join(relative)).map_err(|e| PackError::SourceCopy {
                message: format!("{}: {}", relative.display(), e),
            })?;
            hasher.update(&bytes);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn reject_floating_pin(image: &str) -> Result<(), PackError> {
    // A reproducible base is `name:tag` with a tag other than `latest`.
    // The tag separator must come after the last `/` so registry ports
    // (`registry:5000/python`) are not mistaken for tags.
    let after_slash = image.rsplit('/').next().unwrap_or(image);
    match after_slash.split_once(':') {
        Some((_, tag)) if !tag.is_empty() && tag != "latest" => Ok(()),
        _ => Err(PackError::FloatingBasePin {
            image: image.to_string(),
        }),
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), PackError> {
    let entries = fs::read_dir(dir).map_err(|e| PackError::SourceCopy {
        message: format!("{}: {}", dir.display(), e),
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| PackError::SourceCopy {
            message: e.to_string(),
        })?;
        let path = entry.path();
        let name = entry.file_name();
        if path.is_dir() {
            if name == ".git" {
                continue;
            }
            collect_files(root, &path, out)?;
        } else if path.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| PackError::InternalError {
                    reason: e.to_string(),
                })?;
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}
