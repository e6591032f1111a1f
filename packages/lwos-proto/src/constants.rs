//! Frozen wire constants. Any change here is a protocol version bump, not a
//! configuration change — see `PROTO_VER`.

pub const PROTO_VER: u8 = 1;
pub const HUB_IP: &str = "192.168.4.1";
pub const WS_PATH: &str = "/ws";
pub const SHOW_UDP_PORT: u16 = 49152;
pub const TS_UDP_PORT: u16 = 49154;
pub const HTTP_PORT: u16 = 80;
pub const MAX_NODES: u8 = 8;
pub const MAX_ZONES: u8 = 4;

pub const TICK_HZ: u32 = 100;
pub const TICK_PERIOD_US: u64 = 1_000_000 / TICK_HZ as u64;
pub const APPLY_AHEAD_US: u64 = 30_000;

pub const KEEPALIVE_PERIOD_MS: u64 = 1_000;
pub const KEEPALIVE_TIMEOUT_MS: u64 = 3_500;

pub const TS_LOCK_SAMPLES: u16 = 10;
pub const RTT_VARIANCE_LOCK_THRESHOLD_US: u32 = 5_000;
pub const RTT_VARIANCE_DEGRADE_THRESHOLD_US: u32 = RTT_VARIANCE_LOCK_THRESHOLD_US * 2;
pub const MAX_VALID_RTT_US: i64 = 50_000;
pub const TS_IIR_ALPHA: f64 = 0.8;
pub const TS_IIR_BETA: f64 = 0.2;
pub const TS_PING_INTERVAL_LOCKED_MS: u64 = 1_000;
pub const TS_PING_INTERVAL_UNLOCKED_MS: u64 = 250;

pub const DRIFT_DEGRADED_US: i32 = 3_000;
pub const UDP_SILENCE_DEGRADED_MS: u64 = 3_000;
pub const UDP_SILENCE_FAIL_MS: u64 = 10_000;

pub const SCHED_QUEUE_SIZE: usize = 64;
pub const MAX_DUE_PER_FRAME: usize = 16;

pub const LOST_CLEANUP_MS: u64 = 10 * 60 * 1000;
pub const OTA_NODE_TIMEOUT_MS: u64 = 180_000;
pub const OTA_MAX_CONCURRENT: usize = 1;

/// Sanity bound on a received `applyAt_us` relative to local now; beyond this the
/// receiver clamps to `now + APPLY_AHEAD_US` rather than honour a stale hub epoch.
pub const APPLY_AT_SANITY_US: i64 = 500_000;

pub const DEFAULT_OTA_PLATFORM: &str = "k1";
