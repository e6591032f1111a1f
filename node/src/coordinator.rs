//! Node-side orchestration: one task drives the websocket control plane,
//! the two UDP planes, the render tick, and the periodic maintenance work
//! through a single `tokio::select!` loop — deliberately NOT splitting the
//! scheduler/estimator/fallback state behind a lock, since everything that
//! touches them already lives on this one task. Grounded on the teacher's
//! `uwb-simulator/src/main.rs::handle_ws`, which merges a broadcast receiver
//! arm and a socket-recv arm the same way.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::UdpSocket;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use lwos_proto::constants::{
    KEEPALIVE_PERIOD_MS, MAX_DUE_PER_FRAME, SHOW_UDP_PORT, TICK_PERIOD_US, TS_PING_INTERVAL_LOCKED_MS,
    TS_PING_INTERVAL_UNLOCKED_MS, TS_UDP_PORT,
};
use lwos_proto::hash::token_hash32;
use lwos_proto::ws::{Caps, HubToNodeBatch, HubToNodeCtrl, NodeToHub, Topo};

use crate::clock::LocalClock;
use crate::config::NodeConfig;
use crate::error::OtaError;
use crate::fallback::{FallbackState, NodeFallback};
use crate::ota::{self, NoopUpdater, OtaStatus, Updater};
use crate::render::{apply_batch, RenderSink};
use crate::scheduler::{Cmd, ParamDeltaCmd, ScheduleQueue, ZoneUpdateCmd};
use crate::timesync::TimeSyncEstimator;
use crate::ts_udp::TsUdpClient;
use crate::udp_rx::UdpRx;
use crate::ws_client::{self, HubMessage, WsSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Offline,
    Connecting,
    Ready,
    Degraded,
    Failed,
}

fn synth_mac(node_name: &str) -> String {
    let h = token_hash32(node_name);
    let b = h.to_be_bytes();
    format!("02:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3], node_name.len() as u8)
}

pub struct NodeCoordinator {
    config: NodeConfig,
    clock: LocalClock,
    render: Box<dyn RenderSink>,
    updater: Box<dyn Updater>,
    node_id: Option<u8>,
    token: String,
    token_hash: u32,
    system_state: SystemState,
}

impl NodeCoordinator {
    pub fn new(config: NodeConfig) -> Self {
        Self::with_collaborators(config, Box::new(crate::render::TracingRenderSink), Box::new(NoopUpdater))
    }

    pub fn with_collaborators(config: NodeConfig, render: Box<dyn RenderSink>, updater: Box<dyn Updater>) -> Self {
        Self {
            config,
            clock: LocalClock::new(),
            render,
            updater,
            node_id: None,
            token: String::new(),
            token_hash: 0,
            system_state: SystemState::Offline,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let show_socket = UdpSocket::bind((self.config.bind_ip, SHOW_UDP_PORT)).await?;
        let ts_addr = SocketAddr::new(self.config.hub_ip, TS_UDP_PORT);
        let mut ts_client = TsUdpClient::bind(self.config.bind_ip, ts_addr).await?;

        let mut scheduler = ScheduleQueue::new();
        let mut estimator = TimeSyncEstimator::new();
        let mut fallback = NodeFallback::new();
        let mut udp_rx = UdpRx::new();

        let mut backoff = Duration::from_secs(1);
        loop {
            self.set_system_state(SystemState::Connecting);
            match self
                .session(&show_socket, &mut ts_client, &mut scheduler, &mut estimator, &mut fallback, &mut udp_rx)
                .await
            {
                Ok(()) => {
                    info!("node: control-plane session ended cleanly, reconnecting");
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!("node: control-plane session failed: {e}");
                }
            }

            self.set_system_state(SystemState::Offline);
            udp_rx.set_expected_token_hash(0);
            estimator.reset();
            self.node_id = None;
            self.token_hash = 0;

            let wait = jitter(backoff, self.clock.now_us());
            tokio::time::sleep(wait).await;
            backoff = (backoff * 2).min(Duration::from_secs(32));
        }
    }

    fn set_system_state(&mut self, state: SystemState) {
        if self.system_state != state {
            info!(?state, "node: system state transition");
            self.system_state = state;
        }
    }

    /// One websocket connection's lifetime. Returns `Ok(())` on an orderly
    /// end (including a post-OTA "reboot"), `Err` on any failure that should
    /// trigger a backoff-then-reconnect.
    #[allow(clippy::too_many_arguments)]
    async fn session(
        &mut self,
        show_socket: &UdpSocket,
        ts_client: &mut TsUdpClient,
        scheduler: &mut ScheduleQueue,
        estimator: &mut TimeSyncEstimator,
        fallback: &mut NodeFallback,
        udp_rx: &mut UdpRx,
    ) -> anyhow::Result<()> {
        let (mut sink, mut source) = ws_client::connect(&self.config.hub_ws_url()).await?;
        info!("node: connected to hub control plane");

        let hello = NodeToHub::Hello {
            proto: lwos_proto::constants::PROTO_VER,
            mac: synth_mac(&self.config.node_name),
            fw: format!("{}-{}", env!("CARGO_PKG_VERSION"), self.config.node_name),
            caps: Caps { udp: true, ota: true, clock: true },
            topo: Topo { leds: 144, channels: 1 },
        };
        ws_client::send_json(&mut sink, &hello).await;

        let mut render_ticker = interval(Duration::from_micros(TICK_PERIOD_US));
        let mut maint_ticker = interval(Duration::from_millis(100));
        let mut show_buf = [0u8; 600];
        let mut last_ts_ping_us = 0u64;
        let mut last_ka_us = 0u64;

        loop {
            tokio::select! {
                frame = source.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            if self.handle_hub_text(&text, &mut sink, udp_rx, estimator, scheduler).await? {
                                return Ok(());
                            }
                        }
                        Some(Ok(_)) => {} // ping/pong/binary/frame: nothing to do
                        Some(Err(e)) => return Err(anyhow::anyhow!("websocket error: {e}")),
                        None => return Err(anyhow::anyhow!("websocket closed by hub")),
                    }
                }

                result = show_socket.recv_from(&mut show_buf) => {
                    match result {
                        Ok((len, _src)) => udp_rx.handle_packet(&show_buf[..len], estimator, scheduler, self.clock.now_us()),
                        Err(e) => warn!("node: show socket recv error: {e}"),
                    }
                }

                pong = ts_client.recv_pong(self.token_hash), if self.token_hash != 0 => {
                    if let Some(pong) = pong {
                        let t4 = self.clock.now_us();
                        estimator.process_pong(pong.t1_us, pong.t2_us, pong.t3_us, t4, t4);
                    }
                }

                _ = render_ticker.tick() => {
                    let now = self.clock.now_us();
                    let due = scheduler.extract_due(now, MAX_DUE_PER_FRAME);
                    if !due.is_empty() {
                        let cmds: Vec<Cmd> = due.into_iter().map(|d| d.cmd).collect();
                        for cmd in &cmds {
                            if let Cmd::SceneChange { effect_id, palette_id } = cmd {
                                fallback.note_current_scene(*effect_id, palette_id.unwrap_or(0));
                            }
                        }
                        apply_batch(self.render.as_mut(), cmds);
                    }
                    estimator.tick(now);
                    let forced = fallback.tick(now, estimator.last_pong_local_us(), self.loss_pct(udp_rx), estimator.offset_us() as i32);
                    if let Some(scene) = forced {
                        self.render.apply_scene_change(scene.effect_id, Some(scene.palette_id));
                    }
                    self.refresh_system_state(estimator, fallback);
                }

                _ = maint_ticker.tick() => {
                    let now = self.clock.now_us();
                    let ping_interval_ms = if estimator.is_locked() { TS_PING_INTERVAL_LOCKED_MS } else { TS_PING_INTERVAL_UNLOCKED_MS };
                    if self.token_hash != 0 && now.saturating_sub(last_ts_ping_us) >= ping_interval_ms * 1_000 {
                        ts_client.send_ping(self.token_hash, now).await;
                        last_ts_ping_us = now;
                    }
                    if self.node_id.is_some() && now.saturating_sub(last_ka_us) >= KEEPALIVE_PERIOD_MS * 1_000 {
                        self.send_keepalive(&mut sink, udp_rx, estimator).await;
                        last_ka_us = now;
                    }
                }
            }
        }
    }

    fn loss_pct(&self, udp_rx: &UdpRx) -> u16 {
        let c = udp_rx.counters();
        let total = c.accepted + c.seq_gaps;
        if total == 0 {
            0
        } else {
            ((c.seq_gaps * 10_000) / total).min(10_000) as u16
        }
    }

    fn refresh_system_state(&mut self, estimator: &TimeSyncEstimator, fallback: &NodeFallback) {
        let state = if self.node_id.is_none() || !estimator.is_locked() {
            SystemState::Connecting
        } else {
            match fallback.state() {
                FallbackState::Idle => SystemState::Ready,
                FallbackState::Degraded => SystemState::Degraded,
                FallbackState::Active => SystemState::Failed,
            }
        };
        self.set_system_state(state);
    }

    async fn send_keepalive(&self, sink: &mut WsSink, udp_rx: &UdpRx, estimator: &TimeSyncEstimator) {
        let Some(node_id) = self.node_id else { return };
        let ka = NodeToHub::Ka {
            node_id,
            token: self.token.clone(),
            rssi: -40, // link-layer RSSI is out of scope; a plausible stand-in
            loss_pct: self.loss_pct(udp_rx),
            drift_us: estimator.offset_us() as i32,
            uptime_s: (self.clock.now_us() / 1_000_000) as u32,
        };
        ws_client::send_json(sink, &ka).await;
    }

    /// Handle one inbound text frame. Returns `Ok(true)` when the session
    /// should end (after an OTA "reboot").
    async fn handle_hub_text(
        &mut self,
        text: &str,
        sink: &mut WsSink,
        udp_rx: &mut UdpRx,
        estimator: &mut TimeSyncEstimator,
        scheduler: &mut ScheduleQueue,
    ) -> anyhow::Result<bool> {
        match ws_client::parse_hub_message(text) {
            Some(HubMessage::Ctrl(HubToNodeCtrl::Welcome { node_id, token, .. })) => {
                self.node_id = Some(node_id);
                self.token = token.clone();
                self.token_hash = token_hash32(&token);
                udp_rx.set_expected_token_hash(self.token_hash);
                estimator.reset();
                info!(node_id, "node: welcomed by hub");
                self.send_keepalive(sink, udp_rx, estimator).await;
                Ok(false)
            }
            Some(HubMessage::Ctrl(HubToNodeCtrl::TsPong { .. })) => {
                // Legacy point-to-point path; the node relies on the
                // dedicated UDP time-sync plane instead.
                Ok(false)
            }
            Some(HubMessage::Ctrl(HubToNodeCtrl::OtaUpdate { version, url, sha256 })) => {
                self.run_ota(version, url, sha256, sink).await;
                Ok(true)
            }
            Some(HubMessage::Batch(batch)) => {
                let now = self.clock.now_us();
                self.enqueue_batch(batch, estimator, scheduler, now);
                Ok(false)
            }
            None => {
                debug!("node: unrecognised control message, dropping");
                Ok(false)
            }
        }
    }

    fn enqueue_batch(&self, msg: HubToNodeBatch, estimator: &TimeSyncEstimator, scheduler: &mut ScheduleQueue, now_local_us: u64) {
        match msg {
            HubToNodeBatch::StateSnapshot { apply_at_us, global, zones, .. } => {
                let (local_at, _) = estimator.translate_apply_at(apply_at_us, now_local_us);
                scheduler.enqueue(Cmd::SceneChange { effect_id: global.effect_id.unwrap_or(0), palette_id: global.palette_id }, local_at);
                scheduler.enqueue(Cmd::ParamDelta(param_delta_from_wire(&global)), local_at);
                for zone in zones.unwrap_or_default() {
                    scheduler.enqueue(Cmd::ZoneUpdate(zone_update_from_wire(zone)), local_at);
                }
            }
            HubToNodeBatch::EffectsSetCurrent { effect_id, apply_at_us } => {
                let (local_at, _) = estimator.translate_apply_at(apply_at_us, now_local_us);
                scheduler.enqueue(Cmd::SceneChange { effect_id, palette_id: None }, local_at);
            }
            HubToNodeBatch::ParametersSet { apply_at_us, fields } => {
                let (local_at, _) = estimator.translate_apply_at(apply_at_us, now_local_us);
                scheduler.enqueue(Cmd::ParamDelta(param_delta_from_wire(&fields)), local_at);
            }
            HubToNodeBatch::ZonesUpdate { apply_at_us, fields, .. } => {
                let (local_at, _) = estimator.translate_apply_at(apply_at_us, now_local_us);
                scheduler.enqueue(Cmd::ZoneUpdate(zone_update_from_wire(fields)), local_at);
            }
        }
    }

    /// Run the OTA flow to completion, collecting its status transitions as
    /// plain data (the updater closure can't hold an async websocket send),
    /// then replay them over the control plane in order.
    async fn run_ota(&mut self, version: String, url: String, sha256: String, sink: &mut WsSink) {
        let Some(node_id) = self.node_id else { return };
        info!(version, url, "node: starting OTA update");
        let http_base = self.config.hub_http_base();

        let mut transitions: Vec<(OtaStatus, Option<String>)> = Vec::new();
        let result: Result<(), OtaError> = ota::run_update(&http_base, &url, &sha256, self.updater.as_mut(), |status, error| {
            transitions.push((status, error.map(str::to_string)));
        })
        .await;

        for (status, error) in transitions {
            let msg = NodeToHub::OtaStatus {
                node_id,
                token: self.token.clone(),
                state: status.wire_state().to_string(),
                pct: status.pct(),
                error,
            };
            ws_client::send_json(sink, &msg).await;
        }

        match result {
            Ok(()) => info!("node: OTA applied, rebooting"),
            Err(e) => warn!("node: OTA failed: {e}"),
        }
    }
}

fn param_delta_from_wire(fields: &lwos_proto::ws::GlobalParamsWire) -> ParamDeltaCmd {
    ParamDeltaCmd {
        brightness: fields.brightness,
        speed: fields.speed,
        palette_id: fields.palette_id,
        hue: fields.hue,
        intensity: fields.intensity,
        saturation: fields.saturation,
        complexity: fields.complexity,
        variation: fields.variation,
    }
}

fn zone_update_from_wire(z: lwos_proto::ws::ZoneSettingsWire) -> ZoneUpdateCmd {
    ZoneUpdateCmd {
        zone_id: z.zone_id,
        effect_id: z.effect_id,
        brightness: z.brightness,
        speed: z.speed,
        palette_id: z.palette_id,
        blend_mode: z.blend_mode,
    }
}

fn jitter(base: Duration, now_us: u64) -> Duration {
    let pct = ((now_us % 41) as i64 - 20) as f64 / 100.0; // -0.20..=0.20
    let millis = (base.as_millis() as f64 * (1.0 + pct)).max(0.0) as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synth_mac_is_locally_administered_and_deterministic() {
        let a = synth_mac("node-a");
        let b = synth_mac("node-a");
        let c = synth_mac("node-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("02:"));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let base = Duration::from_secs(4);
        for now in [0u64, 7, 19, 40, 999] {
            let j = jitter(base, now);
            assert!(j.as_millis() >= (base.as_millis() * 80 / 100));
            assert!(j.as_millis() <= (base.as_millis() * 120 / 100));
        }
    }
}
