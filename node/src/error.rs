//! Node-side error taxonomy. Wire and transport errors are absorbed and
//! counted at the call site (`udp_rx`, `ts_udp`); these types exist for the
//! OTA flow, which has real distinguishable failure modes worth surfacing to
//! the hub as `ota_status.error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OtaError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("SHA256 mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("updater rejected image: {0}")]
    UpdaterRejected(String),
}
