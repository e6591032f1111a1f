//! Node-side NTP-style time-sync estimator. Four timestamps per PING/PONG
//! exchange (t1 local send, t2 hub receive, t3 hub send, t4 local receive)
//! feed a one-pole IIR on offset, RTT, and RTT variance; lock state gates
//! whether the node trusts a hub-stamped `applyAt_us` at all — see
//! SPEC_FULL.md §4.8.

use lwos_proto::constants::{
    APPLY_AHEAD_US, APPLY_AT_SANITY_US, KEEPALIVE_TIMEOUT_MS, MAX_VALID_RTT_US,
    RTT_VARIANCE_DEGRADE_THRESHOLD_US, RTT_VARIANCE_LOCK_THRESHOLD_US, TS_IIR_ALPHA, TS_IIR_BETA,
    TS_LOCK_SAMPLES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unlocked,
    Locking,
    Locked,
    Degraded,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SyncCounters {
    pub total_pongs: u64,
    pub accepted: u64,
    pub rejected: u64,
}

pub struct TimeSyncEstimator {
    state: SyncState,
    offset_us: i64,
    rtt_us: u32,
    rtt_variance_us: u32,
    good_samples: u16,
    last_pong_local_us: Option<u64>,
    counters: SyncCounters,
}

impl TimeSyncEstimator {
    pub fn new() -> Self {
        Self {
            state: SyncState::Unlocked,
            offset_us: 0,
            rtt_us: 0,
            rtt_variance_us: 0,
            good_samples: 0,
            last_pong_local_us: None,
            counters: SyncCounters::default(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == SyncState::Locked
    }

    pub fn offset_us(&self) -> i64 {
        self.offset_us
    }

    pub fn rtt_us(&self) -> u32 {
        self.rtt_us
    }

    pub fn rtt_variance_us(&self) -> u32 {
        self.rtt_variance_us
    }

    pub fn counters(&self) -> SyncCounters {
        self.counters
    }

    pub fn last_pong_local_us(&self) -> Option<u64> {
        self.last_pong_local_us
    }

    pub fn hub_to_local(&self, hub_us: u64) -> i64 {
        hub_us as i64 - self.offset_us
    }

    pub fn local_to_hub(&self, local_us: u64) -> i64 {
        local_us as i64 + self.offset_us
    }

    /// Translate a hub-stamped `applyAt_us` into local time, clamping to
    /// `now + APPLY_AHEAD_US` if it falls outside `APPLY_AT_SANITY_US` of
    /// local now (§7's timeout/clamp rule). Returns whether a clamp fired,
    /// for counting/logging by the caller.
    pub fn translate_apply_at(&self, apply_at_hub_us: u64, now_local_us: u64) -> (u64, bool) {
        let local = self.hub_to_local(apply_at_hub_us);
        let delta = local - now_local_us as i64;
        if delta.unsigned_abs() as i64 > APPLY_AT_SANITY_US {
            (now_local_us.saturating_add(APPLY_AHEAD_US), true)
        } else {
            (local.max(0) as u64, false)
        }
    }

    /// Process one accepted PONG's four timestamps. Returns false if the
    /// computed delay falls outside the valid RTT window — rejected, not a
    /// sample.
    pub fn process_pong(&mut self, t1: u64, t2: u64, t3: u64, t4: u64, now_local_us: u64) -> bool {
        self.counters.total_pongs += 1;

        let delay = (t4 as i64 - t1 as i64) - (t3 as i64 - t2 as i64);
        if delay < 0 || delay > MAX_VALID_RTT_US {
            self.counters.rejected += 1;
            return false;
        }
        let offset_est = ((t2 as i64 - t1 as i64) + (t3 as i64 - t4 as i64)) / 2;

        // Deviation is measured against the PRE-update rtt, not the value
        // produced by this sample.
        let dev = (delay - self.rtt_us as i64).unsigned_abs() as u32;

        self.offset_us = (self.offset_us as f64 * TS_IIR_ALPHA + offset_est as f64 * TS_IIR_BETA) as i64;
        self.rtt_us = (self.rtt_us as f64 * TS_IIR_ALPHA + delay as f64 * TS_IIR_BETA) as u32;
        self.rtt_variance_us = (self.rtt_variance_us as f64 * TS_IIR_ALPHA + dev as f64 * TS_IIR_BETA) as u32;

        self.good_samples = self.good_samples.saturating_add(1);
        self.counters.accepted += 1;
        self.last_pong_local_us = Some(now_local_us);

        match self.state {
            SyncState::Unlocked => self.state = SyncState::Locking,
            SyncState::Locking => {
                if self.good_samples >= TS_LOCK_SAMPLES && self.rtt_variance_us < RTT_VARIANCE_LOCK_THRESHOLD_US {
                    self.state = SyncState::Locked;
                }
            }
            // LOCKED is only ever entered from UNLOCKED/LOCKING inside this
            // function; a DEGRADED node keeps refining its estimate but only
            // returns to LOCKING via an explicit `reset()` (rekey).
            SyncState::Locked | SyncState::Degraded => {}
        }
        true
    }

    /// Periodic check: demote LOCKED → DEGRADED on stale pongs or variance
    /// blowing past the degrade threshold. This transition runs only here,
    /// never inside `process_pong`.
    pub fn tick(&mut self, now_local_us: u64) {
        if self.state != SyncState::Locked {
            return;
        }
        let stale = match self.last_pong_local_us {
            Some(last) => now_local_us.saturating_sub(last) > KEEPALIVE_TIMEOUT_MS * 1_000,
            None => true,
        };
        if stale || self.rtt_variance_us > RTT_VARIANCE_DEGRADE_THRESHOLD_US {
            self.state = SyncState::Degraded;
        }
    }

    /// Reset on token rekey (§4.12): any state → UNLOCKED.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for TimeSyncEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_it(est: &mut TimeSyncEstimator) {
        let mut t = 1_000_000u64;
        for _ in 0..TS_LOCK_SAMPLES {
            assert!(est.process_pong(t, t + 150, t + 250, t + 400, t + 400));
            t += 1_000_000;
        }
    }

    /// S1: a consistent 300us RTT / 0 offset exchange, repeated until lock.
    #[test]
    fn locks_after_enough_consistent_samples() {
        let mut est = TimeSyncEstimator::new();
        lock_it(&mut est);
        assert_eq!(est.state(), SyncState::Locked);
        assert!(est.rtt_us() > 250 && est.rtt_us() < 350, "rtt_us = {}", est.rtt_us());
        assert!(est.offset_us().abs() < 10, "offset_us = {}", est.offset_us());
    }

    #[test]
    fn first_sample_moves_unlocked_to_locking() {
        let mut est = TimeSyncEstimator::new();
        assert!(est.process_pong(1_000_000, 1_000_150, 1_000_250, 1_000_400, 1_000_400));
        assert_eq!(est.state(), SyncState::Locking);
    }

    #[test]
    fn negative_or_oversize_delay_is_rejected_not_sampled() {
        let mut est = TimeSyncEstimator::new();
        // t4 < t1: delay goes negative.
        assert!(!est.process_pong(2_000_000, 1_000_150, 1_000_250, 1_000_400, 1_000_400));
        assert_eq!(est.counters().rejected, 1);
        assert_eq!(est.state(), SyncState::Unlocked);
    }

    #[test]
    fn locked_demotes_to_degraded_on_staleness() {
        let mut est = TimeSyncEstimator::new();
        lock_it(&mut est);
        let last = est.last_pong_local_us().unwrap();
        est.tick(last + KEEPALIVE_TIMEOUT_MS * 1_000 - 1);
        assert_eq!(est.state(), SyncState::Locked);
        est.tick(last + KEEPALIVE_TIMEOUT_MS * 1_000 + 1);
        assert_eq!(est.state(), SyncState::Degraded);
    }

    #[test]
    fn degraded_does_not_self_recover_without_reset() {
        let mut est = TimeSyncEstimator::new();
        lock_it(&mut est);
        est.tick(est.last_pong_local_us().unwrap() + KEEPALIVE_TIMEOUT_MS * 1_000 + 1);
        assert_eq!(est.state(), SyncState::Degraded);
        assert!(est.process_pong(10_000_000, 10_000_150, 10_000_250, 10_000_400, 10_000_400));
        assert_eq!(est.state(), SyncState::Degraded);
        est.reset();
        assert_eq!(est.state(), SyncState::Unlocked);
    }

    #[test]
    fn translate_apply_at_passes_through_within_sanity_bound() {
        let est = TimeSyncEstimator::new(); // offset 0
        let (local, clamped) = est.translate_apply_at(1_030_000, 1_000_000);
        assert_eq!(local, 1_030_000);
        assert!(!clamped);
    }

    #[test]
    fn translate_apply_at_clamps_when_far_out_of_bounds() {
        let est = TimeSyncEstimator::new();
        let (local, clamped) = est.translate_apply_at(5_000_000, 1_000_000);
        assert!(clamped);
        assert_eq!(local, 1_000_000 + APPLY_AHEAD_US);
    }
}
