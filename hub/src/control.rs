//! The hub's HTTP/WS control plane: admission, keepalive, time-sync-over-WS
//! (legacy), OTA endpoints. Built on raw `axum::extract::ws`, grounded on the
//! teacher's own `uwb-simulator/src/main.rs` control-WebSocket handler rather
//! than `backend-rust`'s socketioxide layer — see SPEC_FULL.md §4.5
//! [AMBIENT] and DESIGN.md.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use lwos_proto::constants::{APPLY_AHEAD_US, MAX_ZONES, TICK_HZ};
use lwos_proto::ws::{Caps, GlobalParamsWire, HubToNodeBatch, HubToNodeCtrl, NodeToHub, Topo, ZoneSettingsWire};

use crate::clock::HubClock;
use crate::ota::dispatch::{DispatchState, OtaDispatch};
use crate::ota::repo::OtaRepo;
use crate::registry::{NodeRegistry, NodeState};
use crate::state::HubState;
use crate::udp_fanout::UdpFanout;

const CLIENT_QUEUE_DEPTH: usize = 32;
const PENDING_JOIN_CAPACITY: usize = 4;

pub struct AppState {
    pub clock: Arc<HubClock>,
    pub registry: Arc<NodeRegistry>,
    pub hub_state: Arc<HubState>,
    pub ota_repo: Arc<OtaRepo>,
    pub ota_dispatch: Arc<OtaDispatch>,
    pub fanout: Arc<UdpFanout>,
    pub clients: AsyncMutex<HashMap<u8, mpsc::Sender<Message>>>,
    pending_joins: AsyncMutex<VecDeque<u8>>,
}

impl AppState {
    pub fn new(
        clock: Arc<HubClock>,
        registry: Arc<NodeRegistry>,
        hub_state: Arc<HubState>,
        ota_repo: Arc<OtaRepo>,
        ota_dispatch: Arc<OtaDispatch>,
        fanout: Arc<UdpFanout>,
    ) -> Self {
        Self {
            clock,
            registry,
            hub_state,
            ota_repo,
            ota_dispatch,
            fanout,
            clients: AsyncMutex::new(HashMap::new()),
            pending_joins: AsyncMutex::new(VecDeque::new()),
        }
    }

    /// Send one outbound WS message to `node_id`. A full or missing channel
    /// is a silent drop per the backpressure policy (§4.5): the next batch
    /// window will produce a fresh delta.
    async fn send_to(&self, node_id: u8, msg: &impl serde::Serialize) {
        let clients = self.clients.lock().await;
        let Some(tx) = clients.get(&node_id) else { return };
        let Ok(text) = serde_json::to_string(msg) else { return };
        if tx.try_send(Message::Text(text)).is_err() {
            warn!("control: dropping message to node {node_id}, outbound queue full or closed");
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/nodes", get(nodes))
        .route("/ota/debug", get(ota_debug))
        .route("/ota/manifest.json", get(ota_manifest))
        .route("/ota/rollout", post(ota_rollout))
        .route("/ota/abort", post(ota_abort))
        .route("/ota/state", get(ota_state))
        .route("/ota/*path", get(ota_binary))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Drain up to two pending joins per call, sending WELCOME + a full
/// `state.snapshot` to each. Called from the coordinator's maintenance loop
/// so it never runs inside the WS accept callback.
pub async fn process_pending_joins(state: &AppState) {
    for _ in 0..2 {
        let node_id = {
            let mut pending = state.pending_joins.lock().await;
            let Some(id) = pending.pop_front() else { return };
            id
        };
        deliver_join(state, node_id).await;
    }
}

async fn deliver_join(state: &AppState, node_id: u8) {
    let now_us = state.clock.now_us();
    let welcome = match state.registry.send_welcome(node_id, now_us / 1000) {
        Ok(w) => w,
        Err(e) => {
            warn!("control: could not welcome node {node_id}: {e}");
            return;
        }
    };

    let welcome_msg = HubToNodeCtrl::Welcome {
        proto: lwos_proto::constants::PROTO_VER,
        node_id,
        token: welcome.token,
        udp_port: lwos_proto::constants::SHOW_UDP_PORT,
        hub_epoch_us: now_us,
    };
    state.send_to(node_id, &welcome_msg).await;

    let (global, zones) = state.hub_state.full_snapshot(node_id);
    let snapshot = HubToNodeBatch::StateSnapshot {
        node_id,
        apply_at_us: now_us + APPLY_AHEAD_US,
        zones_enabled: !zones.is_empty(),
        global: global_to_wire(global),
        zones: if zones.is_empty() { None } else { Some(zones.into_iter().map(|(id, z)| zone_to_wire(id, z)).collect()) },
    };
    state.send_to(node_id, &snapshot).await;
}

fn global_to_wire(g: crate::state::GlobalParams) -> GlobalParamsWire {
    GlobalParamsWire {
        effect_id: Some(g.effect_id),
        brightness: Some(g.brightness),
        speed: Some(g.speed),
        palette_id: Some(g.palette_id),
        hue: Some(g.hue),
        intensity: Some(g.intensity),
        saturation: Some(g.saturation),
        complexity: Some(g.complexity),
        variation: Some(g.variation),
    }
}

fn zone_to_wire(zone_id: u8, z: crate::state::ZoneSettings) -> ZoneSettingsWire {
    ZoneSettingsWire {
        zone_id,
        effect_id: Some(z.effect_id),
        brightness: Some(z.brightness),
        speed: Some(z.speed),
        palette_id: Some(z.palette_id),
        blend_mode: Some(z.blend_mode),
    }
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, peer: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(CLIENT_QUEUE_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut bound_node_id: Option<u8> = None;

    while let Some(frame) = stream.next().await {
        let Ok(Message::Text(text)) = frame else {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => continue,
            }
        };

        let parsed: Result<NodeToHub, _> = serde_json::from_str(&text);
        let Ok(msg) = parsed else {
            debug!(?peer, "control: unrecognised or malformed frame, dropping");
            continue;
        };

        match msg {
            NodeToHub::Hello { mac, fw, caps, topo, .. } => {
                handle_hello(&state, &mac, &fw, &caps, &topo, peer, &out_tx, &mut bound_node_id).await;
            }
            NodeToHub::Ka { node_id, token, rssi, loss_pct, drift_us, uptime_s } => {
                if !client_matches(bound_node_id, node_id) {
                    warn!(?peer, "control: ka for node {node_id} on unbound connection, dropping");
                    continue;
                }
                if !token_valid(&state, node_id, &token) {
                    warn!(?peer, "control: ka token mismatch for node {node_id}, dropping");
                    continue;
                }
                let now_ms = state.clock.now_us() / 1000;
                state.registry.update_keepalive(node_id, now_ms, rssi, loss_pct, drift_us, uptime_s);
            }
            NodeToHub::TsPing { node_id, token, seq, t1_us } => {
                if !client_matches(bound_node_id, node_id) || !token_valid(&state, node_id, &token) {
                    continue;
                }
                let t2_us = state.clock.now_us();
                let t3_us = state.clock.now_us();
                let reply = HubToNodeCtrl::TsPong { node_id, seq, t1_us, t2_us, t3_us };
                state.send_to(node_id, &reply).await;
            }
            NodeToHub::OtaStatus { node_id, token, state: ota_state, pct, error } => {
                if !client_matches(bound_node_id, node_id) || !token_valid(&state, node_id, &token) {
                    continue;
                }
                state.registry.record_ota_status(node_id, &ota_state, pct, error.as_deref());
                state.ota_dispatch.on_node_status(node_id, &ota_state, &state.registry);
            }
        }
    }

    if let Some(node_id) = bound_node_id {
        state.clients.lock().await.remove(&node_id);
        state.registry.mark_lost(node_id);
        info!("control: node {node_id} disconnected from {peer}");
    }
    writer.abort();
}

fn client_matches(bound: Option<u8>, claimed: u8) -> bool {
    bound == Some(claimed)
}

fn token_valid(state: &AppState, node_id: u8, token: &str) -> bool {
    state.registry.get(node_id).map(|n| n.token == token).unwrap_or(false)
}

async fn handle_hello(
    state: &Arc<AppState>,
    mac: &str,
    fw: &str,
    _caps: &Caps,
    _topo: &Topo,
    peer: SocketAddr,
    out_tx: &mpsc::Sender<Message>,
    bound_node_id: &mut Option<u8>,
) {
    let node_id = match state.registry.register_node(mac, peer.ip(), fw) {
        Ok(id) => id,
        Err(e) => {
            warn!(?peer, "control: hello rejected: {e}");
            return;
        }
    };
    *bound_node_id = Some(node_id);
    state.clients.lock().await.insert(node_id, out_tx.clone());
    info!("control: node {node_id} ({mac}) said hello from {peer}");

    let mut pending = state.pending_joins.lock().await;
    if pending.len() >= PENDING_JOIN_CAPACITY {
        drop(pending);
        deliver_join(state, node_id).await;
    } else {
        pending.push_back(node_id);
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let all = state.registry.all();
    Json(json!({
        "proto": lwos_proto::constants::PROTO_VER,
        "uptime_s": state.clock.uptime_seconds(),
        "nodes_total": all.len(),
        "nodes_ready": all.iter().filter(|n| n.state == NodeState::Ready).count(),
        "tick_hz": TICK_HZ,
        "fanout_enabled": state.fanout.fanout_enabled(),
        "tick_count": state.fanout.tick_count(),
        "tick_overruns": state.fanout.tick_overruns(),
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let all = state.registry.all();
    let counts = |pred: fn(&NodeState) -> bool| all.iter().filter(|n| pred(&n.state)).count();
    let avg = |f: fn(&crate::registry::NodeEntry) -> f64| {
        if all.is_empty() { 0.0 } else { all.iter().map(f).sum::<f64>() / all.len() as f64 }
    };
    Json(json!({
        "pending": counts(|s| *s == NodeState::Pending),
        "authed": counts(|s| *s == NodeState::Authed),
        "ready": counts(|s| *s == NodeState::Ready),
        "degraded": counts(|s| *s == NodeState::Degraded),
        "lost": counts(|s| *s == NodeState::Lost),
        "avg_rssi": avg(|n| n.rssi as f64),
        "avg_loss_pct": avg(|n| n.loss_pct as f64),
        "avg_drift_us": avg(|n| n.drift_us as f64),
        "worst_loss_pct": all.iter().map(|n| n.loss_pct).max().unwrap_or(0),
        "worst_drift_us": all.iter().map(|n| n.drift_us.abs()).max().unwrap_or(0),
    }))
}

async fn nodes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let all = state.registry.all();
    let now_ms = state.clock.now_us() / 1000;
    let snapshots: Vec<_> = all
        .iter()
        .map(|n| {
            json!({
                "id": n.node_id,
                "mac": n.mac,
                "ip": n.ip.to_string(),
                "fw": n.fw,
                "state": format!("{:?}", n.state),
                "tokenHash": n.token_hash,
                "age_ms": now_ms.saturating_sub(n.last_seen_ms),
                "rssi": n.rssi,
                "loss_pct": n.loss_pct,
                "drift_us": n.drift_us,
                "udp_sent": n.udp_sent,
                "keepalives": n.keepalives,
            })
        })
        .collect();
    Json(snapshots)
}

async fn ota_debug(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "root": state.ota_repo.root().display().to_string() }))
}

async fn ota_manifest(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match tokio::fs::read(state.ota_repo.manifest_path()).await {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn ota_binary(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> impl IntoResponse {
    match state.ota_repo.resolve_binary(&path) {
        Ok(resolved) => match tokio::fs::read(&resolved).await {
            Ok(bytes) => (StatusCode::OK, bytes).into_response(),
            Err(_) => StatusCode::NOT_FOUND.into_response(),
        },
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
struct RolloutQuery {
    track: String,
    platform: Option<String>,
    #[serde(default)]
    node: Vec<u8>,
}

async fn ota_rollout(State(state): State<Arc<AppState>>, Query(q): Query<RolloutQuery>) -> impl IntoResponse {
    if q.node.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "at least one node= param required"}))).into_response();
    }
    let platform = q.platform.unwrap_or_else(|| lwos_proto::constants::DEFAULT_OTA_PLATFORM.to_string());
    let now_ms = state.clock.now_us() / 1000;
    match state.ota_dispatch.start_rollout(&state.ota_repo, &platform, &q.track, q.node.clone(), now_ms) {
        Ok(pending) => {
            let msg = HubToNodeCtrl::OtaUpdate { version: pending.release.version, url: pending.release.url, sha256: pending.release.sha256 };
            state.send_to(pending.node_id, &msg).await;
            (StatusCode::OK, Json(json!({"started": true, "first_node": pending.node_id}))).into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn ota_abort(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.ota_dispatch.abort();
    Json(json!({"aborted": true}))
}

async fn ota_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let s = match state.ota_dispatch.state() {
        DispatchState::Idle => "idle",
        DispatchState::InProgress => "in_progress",
        DispatchState::Complete => "complete",
        DispatchState::Aborted => "aborted",
    };
    Json(json!({
        "state": s,
        "current_node": state.ota_dispatch.current_node_id(),
        "completed": state.ota_dispatch.completed_count(),
    }))
}

/// Advance the OTA dispatcher and push the next `ota_update` it produces, if
/// any. Called from the coordinator's maintenance loop alongside the pending
/// join drain.
pub async fn tick_ota(state: &AppState) {
    let now_ms = state.clock.now_us() / 1000;
    if let Some(pending) = state.ota_dispatch.tick(now_ms, &state.registry) {
        let msg = HubToNodeCtrl::OtaUpdate { version: pending.release.version, url: pending.release.url, sha256: pending.release.sha256 };
        state.send_to(pending.node_id, &msg).await;
    }
}

/// Broadcast `effects.setCurrent`/`parameters.set` to every READY node,
/// and unicast `zones.update` to nodes with pending zone deltas — the 50ms
/// batch window described in §4.6.
pub async fn broadcast_batch(state: &AppState) {
    let ready: Vec<u8> = state.registry.ready().into_iter().map(|n| n.node_id).collect();
    if ready.is_empty() && !state.hub_state.has_dirty() {
        return;
    }

    // P5: every message emitted from this batch window carries the same
    // apply_at_us, computed once rather than per-message.
    let apply_at_us = state.clock.now_us() + APPLY_AHEAD_US;

    let (mask, snapshot) = state.hub_state.consume_global_delta();
    if mask != 0 {
        if mask & crate::state::GLOBAL_EFFECT_ID != 0 {
            let msg = HubToNodeBatch::EffectsSetCurrent { effect_id: snapshot.effect_id, apply_at_us };
            for &node_id in &ready {
                state.send_to(node_id, &msg).await;
            }
        }
        let remaining = mask & !crate::state::GLOBAL_EFFECT_ID;
        if remaining != 0 {
            let msg = HubToNodeBatch::ParametersSet { apply_at_us, fields: dirty_fields_only(remaining, snapshot) };
            for &node_id in &ready {
                state.send_to(node_id, &msg).await;
            }
        }
    }

    let deltas = state.hub_state.consume_zone_deltas(MAX_ZONES as usize * 8);
    for delta in deltas {
        if !ready.contains(&delta.node_id) {
            continue;
        }
        let msg = HubToNodeBatch::ZonesUpdate {
            zone_id: delta.zone_id,
            apply_at_us,
            fields: dirty_zone_fields_only(delta.mask, delta.zone_id, delta.values),
        };
        state.send_to(delta.node_id, &msg).await;
    }
}

/// L4: a `parameters.set` only carries the fields that actually changed.
fn dirty_fields_only(mask: u16, g: crate::state::GlobalParams) -> GlobalParamsWire {
    use crate::state::*;
    GlobalParamsWire {
        effect_id: None, // emitted via effects.setCurrent instead
        brightness: (mask & GLOBAL_BRIGHTNESS != 0).then_some(g.brightness),
        speed: (mask & GLOBAL_SPEED != 0).then_some(g.speed),
        palette_id: (mask & GLOBAL_PALETTE_ID != 0).then_some(g.palette_id),
        hue: (mask & GLOBAL_HUE != 0).then_some(g.hue),
        intensity: (mask & GLOBAL_INTENSITY != 0).then_some(g.intensity),
        saturation: (mask & GLOBAL_SATURATION != 0).then_some(g.saturation),
        complexity: (mask & GLOBAL_COMPLEXITY != 0).then_some(g.complexity),
        variation: (mask & GLOBAL_VARIATION != 0).then_some(g.variation),
    }
}

fn dirty_zone_fields_only(mask: u8, zone_id: u8, z: crate::state::ZoneSettings) -> ZoneSettingsWire {
    use crate::state::*;
    ZoneSettingsWire {
        zone_id,
        effect_id: (mask & ZONE_EFFECT_ID != 0).then_some(z.effect_id),
        brightness: (mask & ZONE_BRIGHTNESS != 0).then_some(z.brightness),
        speed: (mask & ZONE_SPEED != 0).then_some(z.speed),
        palette_id: (mask & ZONE_PALETTE_ID != 0).then_some(z.palette_id),
        blend_mode: (mask & ZONE_BLEND_MODE != 0).then_some(z.blend_mode),
    }
}
