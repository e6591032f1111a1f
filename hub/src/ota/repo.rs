//! Read-only OTA manifest, mirroring the teacher's `persistence.rs` idiom of
//! loading JSON off disk and degrading to a clear error rather than panicking
//! — see SPEC_FULL.md §4.13.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::OtaError;

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub version: String,
    pub url: String,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct Platform {
    releases: HashMap<String, Release>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    platforms: HashMap<String, Platform>,
}

pub struct OtaRepo {
    root: PathBuf,
    manifest: Option<Manifest>,
}

impl OtaRepo {
    /// Load `<root>/manifest.json`. A missing or corrupt manifest is not
    /// fatal at startup — rollout requests simply fail until it's fixed.
    pub async fn load(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let manifest_path = root.join("manifest.json");
        let manifest = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(data) => match serde_json::from_str::<Manifest>(&data) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("OTA manifest at {manifest_path:?} is malformed: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("OTA manifest at {manifest_path:?} unreadable: {e}");
                None
            }
        };
        Self { root, manifest }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn release_for_track(&self, platform: &str, track: &str) -> Result<Release, OtaError> {
        let manifest = self.manifest.as_ref().ok_or_else(|| OtaError::ManifestUnreadable(self.root.display().to_string()))?;
        let plat = manifest
            .platforms
            .get(platform)
            .ok_or_else(|| OtaError::PlatformNotFound(platform.to_string()))?;
        plat.releases
            .get(track)
            .cloned()
            .ok_or_else(|| OtaError::TrackNotFound(track.to_string(), platform.to_string()))
    }

    /// Resolve a `/ota/<path>` request to a binary under `root`, rejecting
    /// any path containing `..`.
    pub fn resolve_binary(&self, rel_path: &str) -> Result<PathBuf, OtaError> {
        if rel_path.split('/').any(|seg| seg == "..") {
            return Err(OtaError::PathTraversal(rel_path.to_string()));
        }
        Ok(self.root.join(rel_path.trim_start_matches('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_manifest_yields_none_not_panic() {
        let repo = OtaRepo::load("/nonexistent/lwos-ota-test-dir").await;
        assert!(repo.release_for_track("k1", "stable").is_err());
    }

    #[test]
    fn resolve_binary_rejects_traversal() {
        let repo = OtaRepo { root: PathBuf::from("/ota"), manifest: None };
        assert!(matches!(repo.resolve_binary("../etc/passwd"), Err(OtaError::PathTraversal(_))));
        assert!(repo.resolve_binary("k1/v1.2.3.bin").is_ok());
    }
}
