//! The node's local monotonic µs source. Structurally identical to the
//! hub's `HubClock` shim, but it carries no shared epoch with anything —
//! the node never assumes its local clock agrees with the hub's. Bridging
//! the two clocks is exactly what `timesync` exists to do.

use std::time::Instant;

pub struct LocalClock {
    start: Instant,
}

impl LocalClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::new()
    }
}
