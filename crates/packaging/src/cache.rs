use asgipack_models::PackError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedImage {
    pub image_ref: String,
    pub built_at: DateTime<Utc>,
}

/// Image cache keyed by build inputs. A hit means the same base pin,
/// manifest, and source tree were already built, so the prior image
/// reference is reused and the build is skipped entirely.
pub struct ImageCache {
    cache_dir: PathBuf,
    images: HashMap<String, CachedImage>,
}

fn cache_key(base_image: &str, manifest_digest: &str, source_digest: &str) -> String {
    format!("{base_image}:{manifest_digest}:{source_digest}")
}

impl ImageCache {
    pub fn new(cache_dir: PathBuf) -> Result<Self, PackError> {
        fs::create_dir_all(&cache_dir).map_err(|e| PackError::InternalError {
            reason: e.to_string(),
        })?;

        let mut cache = Self {
            cache_dir,
            images: HashMap::new(),
        };
        cache.load_cache()?;
        Ok(cache)
    }

    #[instrument(skip(self))]
    pub fn get_cached_image(
        &self,
        base_image: &str,
        manifest_digest: &str,
        source_digest: &str,
    ) -> Option<&CachedImage> {
        self.images
            .get(&cache_key(base_image, manifest_digest, source_digest))
    }

    #[instrument(skip(self))]
    pub fn cache_image(
        &mut self,
        base_image: &str,
        manifest_digest: &str,
        source_digest: &str,
        image_ref: String,
    ) {
        info!("Caching image {} for digest pair", image_ref);
        self.images.insert(
            cache_key(base_image, manifest_digest, source_digest),
            CachedImage {
                image_ref,
                built_at: Utc::now(),
            },
        );
    }

    fn cache_file(&self) -> PathBuf {
        self.cache_dir.join("image_cache.json")
    }

    fn load_cache(&mut self) -> Result<(), PackError> {
        let cache_file = self.cache_file();
        if cache_file.exists() {
            let cache_data =
                fs::read_to_string(&cache_file).map_err(|e| PackError::InternalError {
                    reason: e.to_string(),
                })?;
            self.images =
                serde_json::from_str(&cache_data).map_err(|e| PackError::InternalError {
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    pub fn save_cache(&self) -> Result<(), PackError> {
        let cache_data =
            serde_json::to_string_pretty(&self.images).map_err(|e| PackError::InternalError {
                reason: e.to_string(),
            })?;
        fs::write(self.cache_file(), cache_data).map_err(|e| PackError::InternalError {
            reason: e.to_string(),
        })?;
        Ok(())
    }
}
