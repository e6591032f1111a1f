//! Hub-side error taxonomy. Network and wire errors are absorbed and counted
//! at the call site; these types exist for the handful of places that need
//! to distinguish failure kinds (registry admission, OTA repo/dispatch).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry full: all {0} node slots are occupied")]
    Full(u8),
    #[error("token hash collision on node {0}: refusing to advance")]
    TokenCollision(u8),
}

#[derive(Debug, Error)]
pub enum OtaError {
    #[error("unknown platform {0:?}")]
    PlatformNotFound(String),
    #[error("unknown track {0:?} for platform {1:?}")]
    TrackNotFound(String, String),
    #[error("path traversal rejected: {0:?}")]
    PathTraversal(String),
    #[error("rollout already in progress")]
    AlreadyInProgress,
    #[error("no rollout in progress")]
    NotInProgress,
    #[error("manifest unreadable: {0}")]
    ManifestUnreadable(String),
}
