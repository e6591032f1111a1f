//! Node-side degrade/fallback policy — §4.11. Driven off time-sync PONG
//! liveness, not show-UDP liveness: a silent show plane with a healthy
//! time-sync channel means the hub simply has nothing new to send, while a
//! silent time-sync channel means the link itself is gone (§4.12).

use lwos_proto::constants::{DRIFT_DEGRADED_US, UDP_SILENCE_DEGRADED_MS, UDP_SILENCE_FAIL_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Idle,
    Degraded,
    Active,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StableScene {
    pub effect_id: u16,
    pub palette_id: u16,
}

pub struct NodeFallback {
    state: FallbackState,
    last_stable: Option<StableScene>,
}

impl NodeFallback {
    pub fn new() -> Self {
        Self { state: FallbackState::Idle, last_stable: None }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    /// Record the current scene as "last known good" while healthy. Only
    /// updates in IDLE so a scene applied mid-degrade can't poison the
    /// fallback target.
    pub fn note_current_scene(&mut self, effect_id: u16, palette_id: u16) {
        if self.state == FallbackState::Idle {
            self.last_stable = Some(StableScene { effect_id, palette_id });
        }
    }

    /// One policy tick. Returns `Some(scene)` the caller MUST force onto the
    /// renderer when entering (or remaining in) ACTIVE.
    pub fn tick(&mut self, now_us: u64, last_pong_us: Option<u64>, loss_pct: u16, drift_us: i32) -> Option<StableScene> {
        let age_ms = match last_pong_us {
            Some(last) => now_us.saturating_sub(last) / 1_000,
            None => u64::MAX,
        };

        self.state = if age_ms > UDP_SILENCE_FAIL_MS {
            FallbackState::Active
        } else if age_ms > UDP_SILENCE_DEGRADED_MS || loss_pct > 200 || drift_us.abs() > DRIFT_DEGRADED_US {
            FallbackState::Degraded
        } else {
            FallbackState::Idle
        };

        if self.state == FallbackState::Active {
            Some(self.last_stable.unwrap_or_default())
        } else {
            None
        }
    }
}

impl Default for NodeFallback {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S6: healthy → degraded at 3.1s of TS silence → active at 10.1s,
    /// forcing the last stable scene → recovers to IDLE once pongs resume.
    #[test]
    fn scenario_s6_degrade_and_recover() {
        let mut fb = NodeFallback::new();
        fb.note_current_scene(5, 2);

        assert_eq!(fb.tick(1_000_000, Some(1_000_000), 0, 0), None);
        assert_eq!(fb.state(), FallbackState::Idle);

        let forced = fb.tick(1_000_000 + 3_100_000, Some(1_000_000), 0, 0);
        assert_eq!(fb.state(), FallbackState::Degraded);
        assert_eq!(forced, None);

        let forced = fb.tick(1_000_000 + 10_100_000, Some(1_000_000), 0, 0);
        assert_eq!(fb.state(), FallbackState::Active);
        assert_eq!(forced, Some(StableScene { effect_id: 5, palette_id: 2 }));

        let recovered_at = 1_000_000 + 10_100_000 + 1_000;
        assert_eq!(fb.tick(recovered_at, Some(recovered_at), 0, 0), None);
        assert_eq!(fb.state(), FallbackState::Idle);
    }

    #[test]
    fn no_pong_ever_received_counts_as_maximally_stale() {
        let mut fb = NodeFallback::new();
        assert_eq!(fb.tick(20_000_000, None, 0, 0), Some(StableScene::default()));
        assert_eq!(fb.state(), FallbackState::Active);
    }
}
