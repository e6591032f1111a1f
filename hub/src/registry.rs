//! Node admission and health state machine: PENDING → AUTHED → READY ⇌
//! DEGRADED → LOST. See SPEC_FULL.md §4.3. Modelled as a `HashMap<u8,
//! NodeEntry>` behind the hub's single state lock rather than the source's
//! callback+ctx visitor — see SPEC_FULL.md's [AMBIENT] note on this module.

use std::collections::HashMap;
use std::sync::Mutex;

use lwos_proto::constants::{DRIFT_DEGRADED_US, KEEPALIVE_TIMEOUT_MS, LOST_CLEANUP_MS, MAX_NODES};

use crate::error::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Authed,
    Ready,
    Degraded,
    Lost,
}

#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub node_id: u8,
    pub mac: String,
    pub ip: std::net::IpAddr,
    pub fw: String,
    pub state: NodeState,
    pub token: String,
    pub token_hash: u32,
    pub last_seen_ms: u64,
    pub rssi: i8,
    pub loss_pct: u16,
    pub drift_us: i32,
    pub uptime_s: u32,
    pub udp_sent: u64,
    pub keepalives: u64,
    pub ota_state: Option<String>,
    pub ota_pct: u8,
    pub ota_error: Option<String>,
}

impl NodeEntry {
    fn new(node_id: u8, mac: String, ip: std::net::IpAddr, fw: String) -> Self {
        Self {
            node_id,
            mac,
            ip,
            fw,
            state: NodeState::Pending,
            token: String::new(),
            token_hash: 0,
            last_seen_ms: 0,
            rssi: 0,
            loss_pct: 0,
            drift_us: 0,
            uptime_s: 0,
            udp_sent: 0,
            keepalives: 0,
            ota_state: None,
            ota_pct: 0,
            ota_error: None,
        }
    }
}

pub struct Welcome {
    pub node_id: u8,
    pub token: String,
}

struct Inner {
    nodes: HashMap<u8, NodeEntry>,
    next_token_counter: u64,
}

pub struct NodeRegistry {
    inner: Mutex<Inner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { nodes: HashMap::new(), next_token_counter: 0 }) }
    }

    /// Upsert by MAC: if the MAC is already registered, reset it to PENDING
    /// and clear its token; otherwise assign the next free id 1..=MAX_NODES.
    pub fn register_node(
        &self,
        mac: &str,
        ip: std::net::IpAddr,
        fw: &str,
    ) -> Result<u8, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.nodes.values_mut().find(|n| n.mac == mac) {
            existing.state = NodeState::Pending;
            existing.token.clear();
            existing.token_hash = 0;
            existing.ip = ip;
            existing.fw = fw.to_string();
            return Ok(existing.node_id);
        }
        let used: std::collections::HashSet<u8> = inner.nodes.keys().copied().collect();
        let node_id = (1..=MAX_NODES).find(|id| !used.contains(id)).ok_or(RegistryError::Full(MAX_NODES))?;
        inner.nodes.insert(node_id, NodeEntry::new(node_id, mac.to_string(), ip, fw.to_string()));
        Ok(node_id)
    }

    /// Generate a token, compute its hash, and move the node to AUTHED.
    /// Refuses to advance on a hash collision against any other non-LOST
    /// entry (P2: token hashes are pairwise distinct).
    pub fn send_welcome(&self, node_id: u8, now_ms: u64) -> Result<Welcome, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_token_counter += 1;
        let counter = inner.next_token_counter;
        let token = format!("tok-{now_ms:x}-{counter:x}");
        let token_hash = lwos_proto::hash::token_hash32(&token);

        let collision = inner
            .nodes
            .values()
            .any(|n| n.node_id != node_id && n.state != NodeState::Lost && n.token_hash == token_hash);
        if collision {
            return Err(RegistryError::TokenCollision(node_id));
        }

        let entry = inner.nodes.get_mut(&node_id).ok_or(RegistryError::TokenCollision(node_id))?;
        entry.token = token.clone();
        entry.token_hash = token_hash;
        entry.state = NodeState::Authed;
        entry.last_seen_ms = now_ms;
        Ok(Welcome { node_id, token })
    }

    pub fn update_keepalive(
        &self,
        node_id: u8,
        now_ms: u64,
        rssi: i8,
        loss_pct: u16,
        drift_us: i32,
        uptime_s: u32,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.nodes.get_mut(&node_id) else { return };
        entry.last_seen_ms = now_ms;
        entry.rssi = rssi;
        entry.loss_pct = loss_pct;
        entry.drift_us = drift_us;
        entry.uptime_s = uptime_s;
        entry.keepalives += 1;

        if entry.state == NodeState::Ready && (loss_pct > 200 || drift_us.abs() > DRIFT_DEGRADED_US) {
            entry.state = NodeState::Degraded;
        } else if entry.state == NodeState::Authed {
            entry.state = NodeState::Ready;
        }
    }

    pub fn mark_ready(&self, node_id: u8) {
        self.set_state(node_id, NodeState::Ready);
    }

    pub fn mark_degraded(&self, node_id: u8) {
        self.set_state(node_id, NodeState::Degraded);
    }

    pub fn mark_lost(&self, node_id: u8) {
        self.set_state(node_id, NodeState::Lost);
    }

    fn set_state(&self, node_id: u8, state: NodeState) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.nodes.get_mut(&node_id) {
            entry.state = state;
        }
    }

    pub fn note_udp_sent(&self, node_id: u8) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.nodes.get_mut(&node_id) {
            entry.udp_sent += 1;
        }
    }

    pub fn record_ota_status(&self, node_id: u8, state: &str, pct: u8, error: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.nodes.get_mut(&node_id) {
            entry.ota_state = Some(state.to_string());
            entry.ota_pct = pct;
            entry.ota_error = error.map(|e| e.to_string());
        }
    }

    /// Timeout sweep: LOST any non-LOST node silent past KEEPALIVE_TIMEOUT;
    /// drop entries that have been LOST past LOST_CLEANUP.
    pub fn tick(&self, now_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        for entry in inner.nodes.values_mut() {
            if entry.state != NodeState::Lost && now_ms.saturating_sub(entry.last_seen_ms) > KEEPALIVE_TIMEOUT_MS {
                entry.state = NodeState::Lost;
                entry.last_seen_ms = now_ms;
            }
        }
        inner.nodes.retain(|_, entry| {
            entry.state != NodeState::Lost || now_ms.saturating_sub(entry.last_seen_ms) <= LOST_CLEANUP_MS
        });
    }

    pub fn ready(&self) -> Vec<NodeEntry> {
        self.filtered(|n| n.state == NodeState::Ready)
    }

    pub fn authed(&self) -> Vec<NodeEntry> {
        self.filtered(|n| n.state == NodeState::Authed)
    }

    pub fn all(&self) -> Vec<NodeEntry> {
        self.filtered(|_| true)
    }

    pub fn get(&self, node_id: u8) -> Option<NodeEntry> {
        self.inner.lock().unwrap().nodes.get(&node_id).cloned()
    }

    fn filtered(&self, pred: impl Fn(&NodeEntry) -> bool) -> Vec<NodeEntry> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<NodeEntry> = inner.nodes.values().filter(|n| pred(n)).cloned().collect();
        out.sort_by_key(|n| n.node_id);
        out
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 4, 10))
    }

    #[test]
    fn register_node_assigns_lowest_free_id() {
        let reg = NodeRegistry::new();
        assert_eq!(reg.register_node("aa:bb", ip(), "1.0").unwrap(), 1);
        assert_eq!(reg.register_node("cc:dd", ip(), "1.0").unwrap(), 2);
    }

    #[test]
    fn register_node_reuses_slot_for_known_mac() {
        let reg = NodeRegistry::new();
        let id = reg.register_node("aa:bb", ip(), "1.0").unwrap();
        reg.send_welcome(id, 0).unwrap();
        reg.mark_ready(id);
        let same_id = reg.register_node("aa:bb", ip(), "1.1").unwrap();
        assert_eq!(id, same_id);
        assert_eq!(reg.get(id).unwrap().state, NodeState::Pending);
    }

    #[test]
    fn registry_full_returns_error() {
        let reg = NodeRegistry::new();
        for i in 0..MAX_NODES {
            reg.register_node(&format!("mac-{i}"), ip(), "1.0").unwrap();
        }
        assert!(matches!(reg.register_node("overflow", ip(), "1.0"), Err(RegistryError::Full(_))));
    }

    #[test]
    fn keepalive_promotes_authed_to_ready() {
        let reg = NodeRegistry::new();
        let id = reg.register_node("aa:bb", ip(), "1.0").unwrap();
        reg.send_welcome(id, 0).unwrap();
        assert_eq!(reg.get(id).unwrap().state, NodeState::Authed);
        reg.update_keepalive(id, 10, -40, 0, 0, 1);
        assert_eq!(reg.get(id).unwrap().state, NodeState::Ready);
    }

    #[test]
    fn keepalive_demotes_ready_on_high_loss() {
        let reg = NodeRegistry::new();
        let id = reg.register_node("aa:bb", ip(), "1.0").unwrap();
        reg.send_welcome(id, 0).unwrap();
        reg.mark_ready(id);
        reg.update_keepalive(id, 10, -40, 300, 0, 1);
        assert_eq!(reg.get(id).unwrap().state, NodeState::Degraded);
    }

    /// B4: keepalive at T, timeout at T+3500ms; T+3499ms must not mark LOST.
    #[test]
    fn tick_respects_keepalive_timeout_boundary() {
        let reg = NodeRegistry::new();
        let id = reg.register_node("aa:bb", ip(), "1.0").unwrap();
        reg.send_welcome(id, 1_000).unwrap();
        reg.mark_ready(id);
        reg.update_keepalive(id, 1_000, 0, 0, 0, 1);
        reg.tick(1_000 + KEEPALIVE_TIMEOUT_MS - 1);
        assert_eq!(reg.get(id).unwrap().state, NodeState::Ready);
        reg.tick(1_000 + KEEPALIVE_TIMEOUT_MS + 1);
        assert_eq!(reg.get(id).unwrap().state, NodeState::Lost);
    }

    #[test]
    fn ready_returns_only_ready_nodes_sorted_by_id() {
        let reg = NodeRegistry::new();
        let a = reg.register_node("b", ip(), "1.0").unwrap();
        let b = reg.register_node("a", ip(), "1.0").unwrap();
        reg.send_welcome(a, 0).unwrap();
        reg.mark_ready(a);
        reg.send_welcome(b, 0).unwrap();
        let ready = reg.ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].node_id, a);
    }
}
