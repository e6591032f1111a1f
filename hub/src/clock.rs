//! The hub's single monotonic µs source. Every TS-pong timestamp and every
//! show-plane `hubNow_us` is read through this one instance so the epoch the
//! wire carries matches across both planes — see SPEC_FULL.md §4.1.

use std::time::Instant;

use lwos_proto::constants::TICK_PERIOD_US;

pub struct HubClock {
    start: Instant,
}

impl HubClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

impl Default for HubClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Show-clock tick bookkeeping: counts ticks and flags overruns (elapsed
/// since the previous tick exceeding 2×TICK_PERIOD). Ticking is unconditional
/// — the overrun check looks backward at the PREVIOUS recorded timestamp,
/// then the timestamp is updated last.
#[derive(Debug, Default)]
pub struct ShowClock {
    tick_count: u64,
    tick_overruns: u64,
    last_tick_us: Option<u64>,
}

impl ShowClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one tick at `now_us`. Returns true if this tick was an overrun.
    pub fn tick(&mut self, now_us: u64) -> bool {
        self.tick_count += 1;
        let overrun = match self.last_tick_us {
            Some(prev) => now_us.saturating_sub(prev) > 2 * TICK_PERIOD_US,
            None => false,
        };
        if overrun {
            self.tick_overruns += 1;
        }
        self.last_tick_us = Some(now_us);
        overrun
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn tick_overruns(&self) -> u64 {
        self.tick_overruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_is_never_an_overrun() {
        let mut clock = ShowClock::new();
        assert!(!clock.tick(0));
        assert_eq!(clock.tick_count(), 1);
        assert_eq!(clock.tick_overruns(), 0);
    }

    /// P10: tickOverruns counts exactly the ticks whose wall-time since the
    /// previous tick exceeds 2×TICK_PERIOD.
    #[test]
    fn flags_overrun_past_2x_tick_period() {
        let mut clock = ShowClock::new();
        clock.tick(0);
        assert!(!clock.tick(2 * TICK_PERIOD_US));
        assert!(clock.tick(2 * TICK_PERIOD_US + 2 * TICK_PERIOD_US + 1));
        assert_eq!(clock.tick_overruns(), 1);
    }
}
