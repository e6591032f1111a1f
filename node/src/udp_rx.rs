//! Node-side show-plane UDP receiver: validates wire framing and auth,
//! tracks the expected sequence counter, translates `applyAt_us` to local
//! time, and enqueues the resulting `Cmd` — SPEC_FULL.md §4.9.
//!
//! Scene-change promotion for UDP's continuously-repeated PARAM_DELTA
//! (it carries the full global snapshot every tick, not a true delta) is
//! intentionally NOT re-derived here: the authoritative, correctly-ordered
//! `effects.setCurrent` → `parameters.set` sequencing already happens on the
//! control plane (see hub's `broadcast_batch`). The show-plane `effectId`
//! field is applied as part of the ParamDelta refresh.

use tracing::debug;

use lwos_proto::wire::{self, BeatTickPayload, ParamDeltaPayload, SceneChangePayload, ShowMsgType, UdpShowHeader};

use crate::scheduler::{Cmd, ParamDeltaCmd, ScheduleQueue};
use crate::timesync::TimeSyncEstimator;

#[derive(Debug, Default, Clone, Copy)]
pub struct RxCounters {
    pub accepted: u64,
    pub auth_missing: u64,
    pub auth_mismatch: u64,
    pub malformed: u64,
    pub seq_gaps: u64,
    pub duplicates: u64,
    pub unlocked_drops: u64,
    pub applyat_clamped: u64,
}

pub struct UdpRx {
    expected_token_hash: u32,
    expected_seq: Option<u32>,
    counters: RxCounters,
}

impl UdpRx {
    pub fn new() -> Self {
        Self { expected_token_hash: 0, expected_seq: None, counters: RxCounters::default() }
    }

    pub fn counters(&self) -> RxCounters {
        self.counters
    }

    /// Arm (or, with 0, disarm) the token hash the receiver accepts. Called
    /// on WELCOME and on disconnect/rekey.
    pub fn set_expected_token_hash(&mut self, hash: u32) {
        self.expected_token_hash = hash;
        self.expected_seq = None;
    }

    /// Process one datagram, enqueuing a `Cmd` into `queue` when accepted.
    /// A packet arriving before time-sync is LOCKED is counted and dropped
    /// (P7) — `applyAt` translation would be meaningless without it.
    pub fn handle_packet(&mut self, buf: &[u8], estimator: &TimeSyncEstimator, queue: &mut ScheduleQueue, now_local_us: u64) {
        if buf.len() < wire::SHOW_HEADER_LEN {
            self.counters.malformed += 1;
            return;
        }
        let hdr = match UdpShowHeader::from_bytes(buf) {
            Ok(h) => h,
            Err(e) => {
                debug!("udp_rx: malformed header: {e}");
                self.counters.malformed += 1;
                return;
            }
        };
        let msg_type = match wire::validate_header(&hdr, buf.len()) {
            Ok(mt) => mt,
            Err(e) => {
                debug!("udp_rx: rejected header: {e}");
                self.counters.malformed += 1;
                return;
            }
        };

        if self.expected_token_hash == 0 {
            self.counters.auth_missing += 1;
            return;
        }
        if hdr.token_hash != self.expected_token_hash {
            self.counters.auth_mismatch += 1;
            return;
        }

        match self.expected_seq {
            None => self.expected_seq = Some(hdr.seq.wrapping_add(1)),
            Some(expected) if hdr.seq == expected => self.expected_seq = Some(expected.wrapping_add(1)),
            Some(expected) if hdr.seq > expected => {
                self.counters.seq_gaps += (hdr.seq - expected) as u64;
                self.expected_seq = Some(hdr.seq.wrapping_add(1));
            }
            Some(_) => {
                self.counters.duplicates += 1;
                return;
            }
        }

        if !estimator.is_locked() {
            self.counters.unlocked_drops += 1;
            debug!("udp_rx: dropping {:?}, time-sync not locked", msg_type);
            return;
        }

        let (apply_at_us, clamped) = estimator.translate_apply_at(hdr.apply_at_us, now_local_us);
        if clamped {
            self.counters.applyat_clamped += 1;
        }

        let payload = &buf[wire::SHOW_HEADER_LEN..];
        let cmd = match msg_type {
            ShowMsgType::ParamDelta => ParamDeltaPayload::from_bytes(payload).ok().map(|p| {
                Cmd::ParamDelta(ParamDeltaCmd {
                    brightness: Some(p.brightness),
                    speed: Some(p.speed),
                    palette_id: Some(p.palette_id),
                    hue: Some((p.hue >> 8) as u8),
                    intensity: None,
                    saturation: None,
                    complexity: None,
                    variation: None,
                })
            }),
            ShowMsgType::SceneChange => SceneChangePayload::from_bytes(payload)
                .ok()
                .map(|p| Cmd::SceneChange { effect_id: p.effect_id, palette_id: Some(p.palette_id) }),
            ShowMsgType::BeatTick => BeatTickPayload::from_bytes(payload)
                .ok()
                .map(|p| Cmd::BeatTick { bpm_x100: p.bpm_x100, phase: p.phase, flags: p.flags }),
            ShowMsgType::Heartbeat | ShowMsgType::Reserved => None,
        };

        match cmd {
            Some(cmd) => {
                queue.enqueue(cmd, apply_at_us);
                self.counters.accepted += 1;
            }
            None if matches!(msg_type, ShowMsgType::Heartbeat | ShowMsgType::Reserved) => {
                self.counters.accepted += 1;
            }
            None => self.counters.malformed += 1,
        }
    }
}

impl Default for UdpRx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked_estimator() -> TimeSyncEstimator {
        let mut est = TimeSyncEstimator::new();
        let mut t = 1_000_000u64;
        for _ in 0..lwos_proto::constants::TS_LOCK_SAMPLES {
            est.process_pong(t, t + 150, t + 250, t + 400, t + 400);
            t += 1_000_000;
        }
        est
    }

    fn packet(token_hash: u32, seq: u32, apply_at_us: u64) -> Vec<u8> {
        let payload = BeatTickPayload { bpm_x100: 12000, phase: 0, flags: 0 };
        let bytes = payload.to_bytes();
        let hdr = UdpShowHeader {
            proto: lwos_proto::constants::PROTO_VER,
            msg_type: ShowMsgType::BeatTick as u8,
            payload_len: bytes.len() as u16,
            seq,
            token_hash,
            hub_now_us: 0,
            apply_at_us,
        };
        let mut out = hdr.to_bytes().to_vec();
        out.extend_from_slice(&bytes);
        out
    }

    #[test]
    fn drops_without_expected_token_set() {
        let mut rx = UdpRx::new();
        let est = locked_estimator();
        let mut q = ScheduleQueue::new();
        rx.handle_packet(&packet(0xAAAA, 1, 0), &est, &mut q, 0);
        assert_eq!(rx.counters().auth_missing, 1);
        assert!(q.is_empty());
    }

    #[test]
    fn drops_on_token_mismatch() {
        let mut rx = UdpRx::new();
        rx.set_expected_token_hash(0xAAAA);
        let est = locked_estimator();
        let mut q = ScheduleQueue::new();
        rx.handle_packet(&packet(0xDEADBEEF, 1, 0), &est, &mut q, 0);
        assert_eq!(rx.counters().auth_mismatch, 1);
        assert!(q.is_empty());
    }

    #[test]
    fn drops_while_time_sync_unlocked() {
        let mut rx = UdpRx::new();
        rx.set_expected_token_hash(0xAAAA);
        let est = TimeSyncEstimator::new(); // still UNLOCKED
        let mut q = ScheduleQueue::new();
        rx.handle_packet(&packet(0xAAAA, 1, 0), &est, &mut q, 0);
        assert_eq!(rx.counters().unlocked_drops, 1);
        assert!(q.is_empty());
    }

    #[test]
    fn accepted_packet_enqueues_and_tracks_seq() {
        let mut rx = UdpRx::new();
        rx.set_expected_token_hash(0xAAAA);
        let est = locked_estimator();
        let mut q = ScheduleQueue::new();
        rx.handle_packet(&packet(0xAAAA, 1, 1_000), &est, &mut q, 0);
        assert_eq!(rx.counters().accepted, 1);
        assert_eq!(q.len(), 1);

        rx.handle_packet(&packet(0xAAAA, 3, 2_000), &est, &mut q, 0);
        assert_eq!(rx.counters().seq_gaps, 1);

        rx.handle_packet(&packet(0xAAAA, 3, 3_000), &est, &mut q, 0);
        assert_eq!(rx.counters().duplicates, 1);
    }
}
