use crate::allocator::FlagLayoutSnapshot;
use crate::error::{GenerationError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub layout: FlagLayoutSnapshot,
}

/// Flag layouts of previous builds, keyed by unit path and input hash.
pub struct IncrementalCache {
    cache_dir: PathBuf,
}

impl IncrementalCache {
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|source| GenerationError::Io {
                path: cache_dir.display().to_string(),
                source,
            })?;
        }
        Ok(Self { cache_dir })
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn get_cache_path(&self, file_path: &str) -> PathBuf {
        let safe_name = file_path.replace(['/', '\\', ':'], "_");
        self.cache_dir.join(format!("{}.json", safe_name))
    }

    /// The cached layout for this exact input, if any.
    pub fn get(&self, file_path: &str, source: &str) -> Option<FlagLayoutSnapshot> {
        let cache_path = self.get_cache_path(file_path);
        let data = fs::read_to_string(&cache_path).ok()?;

        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(e) => e,
            Err(e) => {
                warn!(file = file_path, error = %e, "dropping corrupt cache entry");
                fs::remove_file(cache_path).ok();
                return None;
            }
        };

        if entry.hash == Self::compute_hash(source) {
            Some(entry.layout)
        } else {
            debug!(file = file_path, "cache entry is stale");
            None
        }
    }

    /// Fail when the same input was cached with a different layout.
    pub fn verify(
        &self,
        file_path: &str,
        source: &str,
        layout_name: &str,
        fresh: &FlagLayoutSnapshot,
    ) -> Result<()> {
        let Some(cached) = self.get(file_path, source) else {
            return Ok(());
        };
        if cached.bucket_count != fresh.bucket_count {
            return Err(GenerationError::Consistency {
                layout: layout_name.to_string(),
                detail: format!(
                    "cached layout has {} bucket(s), fresh layout has {}",
                    cached.bucket_count, fresh.bucket_count
                ),
            });
        }
        if let Some(bit) = (0..cached.mapping.len().max(fresh.mapping.len()))
            .find(|i| cached.mapping.get(*i) != fresh.mapping.get(*i))
        {
            return Err(GenerationError::Consistency {
                layout: layout_name.to_string(),
                detail: format!(
                    "flag {} is `{}` in the cache but `{}` now",
                    bit,
                    cached.mapping.get(bit).map_or("<none>", String::as_str),
                    fresh.mapping.get(bit).map_or("<none>", String::as_str)
                ),
            });
        }
        debug!(file = file_path, "cached layout confirmed");
        Ok(())
    }

    pub fn set(&self, file_path: &str, source: &str, layout: &FlagLayoutSnapshot) -> Result<()> {
        let cache_path = self.get_cache_path(file_path);
        let entry = CacheEntry {
            hash: Self::compute_hash(source),
            layout: layout.clone(),
        };
        let data = serde_json::to_string(&entry)?;
        fs::write(&cache_path, data).map_err(|source| GenerationError::Io {
            path: cache_path.display().to_string(),
            source,
        })
    }
}
