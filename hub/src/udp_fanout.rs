//! 100Hz show-plane UDP broadcaster. Runs as its own task; never touches the
//! registry mutation path, only reads READY-node snapshots — see SPEC_FULL.md
//! §4.6/§4.7 and the concurrency model in §5.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tracing::warn;

use lwos_proto::constants::{APPLY_AHEAD_US, SHOW_UDP_PORT};
use lwos_proto::wire::{ParamDeltaPayload, ShowMsgType, UdpShowHeader};

use crate::clock::{HubClock, ShowClock};
use crate::registry::NodeRegistry;
use crate::state::HubState;

pub struct UdpFanout {
    socket: UdpSocket,
    seq: AtomicU32,
    enabled: AtomicBool,
    show_clock: Mutex<ShowClock>,
}

impl UdpFanout {
    pub async fn bind(bind_ip: std::net::IpAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind((bind_ip, 0)).await?;
        Ok(Self { socket, seq: AtomicU32::new(0), enabled: AtomicBool::new(true), show_clock: Mutex::new(ShowClock::new()) })
    }

    /// Show-clock tick bookkeeping for this fanout's 100Hz loop (§4.1, P10):
    /// total ticks observed and how many exceeded 2×TICK_PERIOD since the
    /// previous one, regardless of whether fanout itself is enabled.
    pub fn tick_count(&self) -> u64 {
        self.show_clock.lock().unwrap().tick_count()
    }

    pub fn tick_overruns(&self) -> u64 {
        self.show_clock.lock().unwrap().tick_overruns()
    }

    /// Debug/operational knob mirroring the source firmware's accessor
    /// shape; this implementation defaults to enabled (DESIGN.md).
    pub fn set_fanout_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn fanout_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// One fanout tick: build and send a PARAM_DELTA to every READY node
    /// with a non-zero token hash (WELCOME already delivered).
    pub async fn tick(&self, clock: &HubClock, registry: &NodeRegistry, hub_state: &HubState) {
        let hub_now_us = clock.now_us();
        let overrun = self.show_clock.lock().unwrap().tick(hub_now_us);
        if overrun {
            warn!("udp_fanout: tick overrun, since_last > 2x TICK_PERIOD");
        }

        if !self.fanout_enabled() {
            return;
        }
        let ready = registry.ready();
        if ready.is_empty() {
            return;
        }

        let apply_at_us = hub_now_us + APPLY_AHEAD_US;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let global = hub_state.global_snapshot();
        let payload = ParamDeltaPayload {
            effect_id: global.effect_id,
            palette_id: global.palette_id,
            brightness: global.brightness,
            speed: global.speed,
            hue: (global.hue as u16) << 8,
        };
        let payload_bytes = payload.to_bytes();

        let header = UdpShowHeader {
            proto: lwos_proto::constants::PROTO_VER,
            msg_type: ShowMsgType::ParamDelta as u8,
            payload_len: payload_bytes.len() as u16,
            seq,
            token_hash: 0, // overwritten per-node below
            hub_now_us,
            apply_at_us,
        };

        for node in ready {
            if node.token_hash == 0 {
                continue;
            }
            let mut hdr = header;
            hdr.token_hash = node.token_hash;
            let mut packet = hdr.to_bytes().to_vec();
            packet.extend_from_slice(&payload_bytes);

            let dest: SocketAddr = (node.ip, SHOW_UDP_PORT).into();
            match self.socket.send_to(&packet, dest).await {
                Ok(_) => registry.note_udp_sent(node.node_id),
                Err(e) => warn!("udp_fanout: send to node {} ({dest}) failed: {e}", node.node_id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_nodes_with_unset_token_hash() {
        let fanout = UdpFanout::bind("127.0.0.1".parse().unwrap()).await.unwrap();
        let clock = HubClock::new();
        let registry = NodeRegistry::new();
        let hub_state = HubState::new();
        let id = registry.register_node("aa", "127.0.0.1".parse().unwrap(), "1.0").unwrap();
        registry.mark_ready(id); // token_hash is still 0 (WELCOME pending)
        fanout.tick(&clock, &registry, &hub_state).await;
        assert_eq!(registry.get(id).unwrap().udp_sent, 0);
    }

    #[tokio::test]
    async fn disabling_fanout_suppresses_tick() {
        let fanout = UdpFanout::bind("127.0.0.1".parse().unwrap()).await.unwrap();
        let clock = HubClock::new();
        let registry = NodeRegistry::new();
        let hub_state = HubState::new();
        let id = registry.register_node("aa", "127.0.0.1".parse().unwrap(), "1.0").unwrap();
        registry.send_welcome(id, 0).unwrap();
        registry.mark_ready(id);

        fanout.set_fanout_enabled(false);
        fanout.tick(&clock, &registry, &hub_state).await;
        assert_eq!(registry.get(id).unwrap().udp_sent, 0);

        fanout.set_fanout_enabled(true);
        fanout.tick(&clock, &registry, &hub_state).await;
        assert_eq!(registry.get(id).unwrap().udp_sent, 1);
    }

    /// P10: tick bookkeeping runs even while fanout is administratively
    /// disabled, and an overrun gap (> 2x TICK_PERIOD) is counted.
    #[tokio::test]
    async fn show_clock_ticks_and_counts_overruns_regardless_of_enabled() {
        let fanout = UdpFanout::bind("127.0.0.1".parse().unwrap()).await.unwrap();
        let clock = HubClock::new();
        let registry = NodeRegistry::new();
        let hub_state = HubState::new();

        fanout.set_fanout_enabled(false);
        fanout.tick(&clock, &registry, &hub_state).await;
        assert_eq!(fanout.tick_count(), 1);
        assert_eq!(fanout.tick_overruns(), 0);

        fanout.tick(&clock, &registry, &hub_state).await;
        assert_eq!(fanout.tick_count(), 2);
        assert_eq!(fanout.tick_overruns(), 0);
    }
}
