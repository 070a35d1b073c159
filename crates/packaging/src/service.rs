use crate::{BuildContext, BuildPlan, ImageBackend, ImageBuilder, ImageCache};
use asgipack_models::{Config, LaunchSpec, PackError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

/// The result of a successful build: the image reference, the input digests
/// it was derived from, and the declared startup command. Only produced by
/// a pipeline that reached its terminal stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArtifact {
    pub image_ref: String,
    pub manifest_digest: String,
    pub source_digest: String,
    pub launch: LaunchSpec,
}

pub struct PackagingService {
    config: Config,
    image_builder: ImageBuilder,
    cache: ImageCache,
}

impl PackagingService {
    pub fn new(config: Config) -> Result<Self, PackError> {
        let cache = ImageCache::new(PathBuf::from(&config.data.dir))?;
        Ok(Self {
            config,
            image_builder: ImageBuilder::new(),
            cache,
        })
    }

    pub fn with_backend(config: Config, backend: Arc<dyn ImageBackend>) -> Result<Self, PackError> {
        let cache = ImageCache::new(PathBuf::from(&config.data.dir))?;
        Ok(Self {
            config,
            image_builder: ImageBuilder::with_backend(backend),
            cache,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate the context and render its build plan without touching
    /// Docker. This is everything the build would do up to the first side
    /// effect.
    pub fn plan(&self, context_root: &Path) -> Result<(BuildContext, BuildPlan), PackError> {
        let context = BuildContext::prepare(context_root, &self.config)?;
        let plan = BuildPlan::render(&self.config, &context)?;
        Ok((context, plan))
    }

    /// Run the whole pipeline: validate, plan, then build unless an
    /// identical build is already cached. Any stage failure aborts the
    /// build; no artifact exists for a failed pipeline.
    #[instrument(skip(self))]
    pub async fn build(&mut self, context_root: &Path) -> Result<ImageArtifact, PackError> {
        let (context, plan) = self.plan(context_root)?;

        let manifest_digest = context.manifest_digest();
        let source_digest = context.source_digest()?;
        let launch = LaunchSpec::for_target(
            &context.target,
            &self.config.service.bind,
            self.config.service.port,
        );

        let base_image = &self.config.build.base_image;
        if let Some(cached) =
            self.cache
                .get_cached_image(base_image, &manifest_digest, &source_digest)
        {
            info!("Image cache hit: {}", cached.image_ref);
            return Ok(ImageArtifact {
                image_ref: cached.image_ref.clone(),
                manifest_digest,
                source_digest,
                launch,
            });
        }

        let image_ref = image_ref_for(context_root, &manifest_digest, &source_digest);
        self.image_builder
            .build_image(&context, &plan, &image_ref)
            .await?;

        self.cache.cache_image(
            base_image,
            &manifest_digest,
            &source_digest,
            image_ref.clone(),
        );
        self.cache.save_cache()?;

        Ok(ImageArtifact {
            image_ref,
            manifest_digest,
            source_digest,
            launch,
        })
    }
}

/// `asgipack/<context-dir-name>:<short input digest>`. The tag is derived
/// from the build inputs, so unchanged inputs name the same image.
fn image_ref_for(context_root: &Path, manifest_digest: &str, source_digest: &str) -> String {
    let name = context_root
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "app".to_string());
    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let name = name.trim_matches('-');
    let name = if name.is_empty() { "app" } else { name };
    // Digests are hex sha256, always long enough for the short tag.
    format!(
        "asgipack/{name}:{}{}",
        &manifest_digest[..8],
        &source_digest[..8]
    )
}
