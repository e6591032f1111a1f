//! Bounded, `applyAt`-ordered command queue — SPEC_FULL.md §3/§4.9. A flat
//! sorted `Vec`, not a ring buffer: at `SCHED_QUEUE_SIZE` = 64 entries,
//! insertion-sort-on-enqueue and a linear coalesce scan are cheap, and a
//! ring would only add bookkeeping for no benefit at this size.

use lwos_proto::constants::SCHED_QUEUE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamDeltaCmd {
    pub brightness: Option<u8>,
    pub speed: Option<u8>,
    pub palette_id: Option<u16>,
    pub hue: Option<u8>,
    pub intensity: Option<u8>,
    pub saturation: Option<u8>,
    pub complexity: Option<u8>,
    pub variation: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneUpdateCmd {
    pub zone_id: u8,
    pub effect_id: Option<u16>,
    pub brightness: Option<u8>,
    pub speed: Option<u8>,
    pub palette_id: Option<u16>,
    pub blend_mode: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    SceneChange { effect_id: u16, palette_id: Option<u16> },
    ParamDelta(ParamDeltaCmd),
    BeatTick { bpm_x100: u16, phase: u8, flags: u8 },
    ZoneUpdate(ZoneUpdateCmd),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoalesceKey {
    SceneChange,
    ParamDelta,
    BeatTick,
    ZoneUpdate(u8),
}

impl Cmd {
    fn coalesce_key(&self) -> CoalesceKey {
        match self {
            Cmd::SceneChange { .. } => CoalesceKey::SceneChange,
            Cmd::ParamDelta(_) => CoalesceKey::ParamDelta,
            Cmd::BeatTick { .. } => CoalesceKey::BeatTick,
            Cmd::ZoneUpdate(z) => CoalesceKey::ZoneUpdate(z.zone_id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduledCmd {
    pub cmd: Cmd,
    pub apply_at_us: u64,
    trace_seq: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerCounters {
    pub enqueued: u64,
    pub coalesced: u64,
    pub overflow_drops: u64,
    pub applied: u64,
}

pub struct ScheduleQueue {
    entries: Vec<ScheduledCmd>,
    counters: SchedulerCounters,
    next_trace_seq: u64,
}

impl ScheduleQueue {
    pub fn new() -> Self {
        Self { entries: Vec::with_capacity(SCHED_QUEUE_SIZE), counters: SchedulerCounters::default(), next_trace_seq: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counters(&self) -> SchedulerCounters {
        self.counters
    }

    /// Insert in ascending-`apply_at_us` order, newest-first among ties
    /// (stable w.r.t. insertion order). At capacity, coalesce into the
    /// oldest entry of the same type (and zone, for `ZoneUpdate`) instead of
    /// growing; if nothing matches, count an overflow drop. Per §4.9,
    /// coalescing always overwrites the whole record with the newest one —
    /// there's no per-field merge.
    pub fn enqueue(&mut self, cmd: Cmd, apply_at_us: u64) -> bool {
        self.counters.enqueued += 1;
        let trace_seq = self.next_trace_seq;
        self.next_trace_seq += 1;

        if self.entries.len() >= SCHED_QUEUE_SIZE {
            let key = cmd.coalesce_key();
            if let Some(slot) = self.entries.iter_mut().find(|e| e.cmd.coalesce_key() == key) {
                slot.cmd = cmd;
                slot.apply_at_us = apply_at_us;
                slot.trace_seq = trace_seq;
                self.counters.coalesced += 1;
                self.resort();
                return true;
            }
            self.counters.overflow_drops += 1;
            return false;
        }

        let idx = self.entries.partition_point(|e| e.apply_at_us <= apply_at_us);
        self.entries.insert(idx, ScheduledCmd { cmd, apply_at_us, trace_seq });
        true
    }

    fn resort(&mut self) {
        self.entries.sort_by_key(|e| (e.apply_at_us, e.trace_seq));
    }

    /// Pop the due prefix (`apply_at_us <= now_us`), capped at `max`.
    pub fn extract_due(&mut self, now_us: u64, max: usize) -> Vec<ScheduledCmd> {
        if max == 0 {
            return Vec::new();
        }
        let due = self.entries.iter().take_while(|e| e.apply_at_us <= now_us).count().min(max);
        let out: Vec<ScheduledCmd> = self.entries.drain(..due).collect();
        self.counters.applied += out.len() as u64;
        out
    }
}

impl Default for ScheduleQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone_cmd(zone_id: u8, brightness: u8) -> Cmd {
        Cmd::ZoneUpdate(ZoneUpdateCmd {
            zone_id,
            effect_id: None,
            brightness: Some(brightness),
            speed: None,
            palette_id: None,
            blend_mode: None,
        })
    }

    #[test]
    fn extract_due_returns_only_the_due_prefix_in_order() {
        let mut q = ScheduleQueue::new();
        q.enqueue(Cmd::BeatTick { bpm_x100: 12000, phase: 0, flags: 0 }, 100);
        q.enqueue(Cmd::BeatTick { bpm_x100: 12000, phase: 1, flags: 0 }, 300);
        q.enqueue(Cmd::BeatTick { bpm_x100: 12000, phase: 2, flags: 0 }, 200);

        let due = q.extract_due(200, 16);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].apply_at_us, 100);
        assert_eq!(due[1].apply_at_us, 200);
        assert_eq!(q.len(), 1);
    }

    /// B2/B3: extraction respects the max-per-frame cap even when more is due.
    #[test]
    fn extract_due_caps_at_max_per_frame() {
        let mut q = ScheduleQueue::new();
        for i in 0..10u8 {
            q.enqueue(zone_cmd(i % 4, i), i as u64);
        }
        let due = q.extract_due(1_000, 4);
        assert_eq!(due.len(), 4);
        assert_eq!(q.len(), 6);
    }

    /// S3: filling the queue to capacity with distinct zones, then enqueuing
    /// one more of an already-present zone/type coalesces into the oldest
    /// matching entry rather than growing or dropping.
    #[test]
    fn overflow_coalesces_oldest_matching_entry() {
        let mut q = ScheduleQueue::new();
        for i in 0..SCHED_QUEUE_SIZE as u64 {
            q.enqueue(zone_cmd(0, (i % 255) as u8), i + 1);
        }
        assert_eq!(q.len(), SCHED_QUEUE_SIZE);

        let coalesced = q.enqueue(zone_cmd(0, 200), 1_000);
        assert!(coalesced);
        assert_eq!(q.len(), SCHED_QUEUE_SIZE);
        assert_eq!(q.counters().coalesced, 1);

        let due = q.extract_due(u64::MAX, SCHED_QUEUE_SIZE);
        assert_eq!(due.len(), SCHED_QUEUE_SIZE);
        let last = due.last().unwrap();
        match last.cmd {
            Cmd::ZoneUpdate(z) => assert_eq!(z.brightness, Some(200)),
            _ => panic!("expected zone update"),
        }
    }

    #[test]
    fn overflow_with_no_matching_type_is_dropped() {
        let mut q = ScheduleQueue::new();
        for i in 0..SCHED_QUEUE_SIZE as u64 {
            q.enqueue(Cmd::BeatTick { bpm_x100: 12000, phase: 0, flags: 0 }, i);
        }
        let enqueued = q.enqueue(zone_cmd(0, 1), 1_000);
        assert!(!enqueued);
        assert_eq!(q.counters().overflow_drops, 1);
        assert_eq!(q.len(), SCHED_QUEUE_SIZE);
    }
}
