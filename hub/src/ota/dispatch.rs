//! Rolling OTA updater: one node in flight at a time. See SPEC_FULL.md §4.14
//! and scenario S5. The dispatcher never sends WS/HTTP traffic itself — it
//! hands the coordinator an `ota_update` to deliver, keeping the send side
//! (control.rs) decoupled from this state machine.

use std::sync::Mutex;

use lwos_proto::constants::OTA_NODE_TIMEOUT_MS;
use tracing::{error, info};

use crate::error::OtaError;
use crate::ota::repo::{OtaRepo, Release};
use crate::registry::{NodeRegistry, NodeState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    InProgress,
    Complete,
    Aborted,
}

struct Rollout {
    release: Release,
    queue: Vec<u8>,
    current_index: usize,
    started_ms: u64,
    completed_count: usize,
}

pub struct OtaDispatch {
    inner: Mutex<Option<Rollout>>,
    state: Mutex<DispatchState>,
}

/// An `ota_update` the coordinator must push to `node_id` right now.
pub struct PendingUpdate {
    pub node_id: u8,
    pub release: Release,
}

impl OtaDispatch {
    pub fn new() -> Self {
        Self { inner: Mutex::new(None), state: Mutex::new(DispatchState::Idle) }
    }

    pub fn state(&self) -> DispatchState {
        self.state.lock().unwrap().clone()
    }

    pub fn current_node_id(&self) -> Option<u8> {
        self.inner.lock().unwrap().as_ref().map(|r| r.queue[r.current_index])
    }

    pub fn completed_count(&self) -> usize {
        self.inner.lock().unwrap().as_ref().map(|r| r.completed_count).unwrap_or(0)
    }

    pub fn start_rollout(
        &self,
        repo: &OtaRepo,
        platform: &str,
        track: &str,
        node_ids: Vec<u8>,
        now_ms: u64,
    ) -> Result<PendingUpdate, OtaError> {
        if *self.state.lock().unwrap() == DispatchState::InProgress {
            return Err(OtaError::AlreadyInProgress);
        }
        let release = repo.release_for_track(platform, track)?;
        repo.resolve_binary(release.url.trim_start_matches("/ota/"))?;

        let first = *node_ids.first().ok_or_else(|| OtaError::TrackNotFound(track.to_string(), platform.to_string()))?;
        *self.inner.lock().unwrap() =
            Some(Rollout { release: release.clone(), queue: node_ids, current_index: 0, started_ms: now_ms, completed_count: 0 });
        *self.state.lock().unwrap() = DispatchState::InProgress;
        info!("OTA rollout started: platform={platform} track={track} version={} first_node={first}", release.version);
        Ok(PendingUpdate { node_id: first, release })
    }

    /// Advance the rollout. Returns the next `ota_update` to send, if any.
    pub fn tick(&self, now_ms: u64, registry: &NodeRegistry) -> Option<PendingUpdate> {
        let mut inner = self.inner.lock().unwrap();
        let Some(rollout) = inner.as_mut() else { return None };
        if *self.state.lock().unwrap() != DispatchState::InProgress {
            return None;
        }

        if now_ms.saturating_sub(rollout.started_ms) > OTA_NODE_TIMEOUT_MS {
            let node_id = rollout.queue[rollout.current_index];
            error!("OTA rollout aborted: node {node_id} exceeded {OTA_NODE_TIMEOUT_MS}ms timeout");
            *self.state.lock().unwrap() = DispatchState::Aborted;
            return None;
        }

        let current_node = rollout.queue[rollout.current_index];
        let Some(entry) = registry.get(current_node) else { return None };
        if entry.state != NodeState::Ready {
            return None;
        }

        rollout.completed_count += 1;
        rollout.current_index += 1;
        if rollout.current_index >= rollout.queue.len() {
            *self.state.lock().unwrap() = DispatchState::Complete;
            info!("OTA rollout complete: {} node(s) updated", rollout.completed_count);
            return None;
        }

        let next_node = rollout.queue[rollout.current_index];
        rollout.started_ms = now_ms;
        info!("OTA rollout advancing to node {next_node}");
        Some(PendingUpdate { node_id: next_node, release: rollout.release.clone() })
    }

    pub fn on_node_status(&self, node_id: u8, state: &str, registry: &NodeRegistry) {
        let Some(current) = self.current_node_id() else { return };
        if current != node_id {
            return;
        }
        if state == "error" {
            error!("OTA rollout aborted: node {node_id} reported error");
            *self.state.lock().unwrap() = DispatchState::Aborted;
        }
        let _ = registry;
    }

    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == DispatchState::InProgress {
            *state = DispatchState::Aborted;
        }
    }
}

impl Default for OtaDispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ota::repo::OtaRepo;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 4, 20))
    }

    #[tokio::test]
    async fn rollout_advances_when_node_reaches_ready() {
        let dir = std::env::temp_dir().join(format!("lwos-ota-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let manifest = serde_json::json!({
            "platforms": { "k1": { "releases": { "stable": {
                "version": "v1.2.3", "url": "/ota/k1/v1.2.3.bin", "sha256": "ab", "size": 10
            }}}}
        });
        tokio::fs::write(dir.join("manifest.json"), manifest.to_string()).await.unwrap();
        let repo = OtaRepo::load(&dir).await;

        let registry = NodeRegistry::new();
        let a = registry.register_node("a", ip(), "1.0").unwrap();
        let b = registry.register_node("b", ip(), "1.0").unwrap();
        registry.send_welcome(a, 0).unwrap();
        registry.mark_ready(a);
        registry.send_welcome(b, 0).unwrap();
        registry.mark_ready(b);

        let dispatch = OtaDispatch::new();
        let first = dispatch.start_rollout(&repo, "k1", "stable", vec![a, b], 0).unwrap();
        assert_eq!(first.node_id, a);
        assert_eq!(dispatch.state(), DispatchState::InProgress);

        // Node `a` has been READY the whole time, so the first tick completes it.
        let next = dispatch.tick(10, &registry);
        assert_eq!(next.unwrap().node_id, b);
        assert_eq!(dispatch.completed_count(), 1);

        let last = dispatch.tick(20, &registry);
        assert!(last.is_none());
        assert_eq!(dispatch.state(), DispatchState::Complete);
    }

    #[tokio::test]
    async fn rollout_aborts_on_node_error_status() {
        let dir = std::env::temp_dir().join(format!("lwos-ota-test-err-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let manifest = serde_json::json!({
            "platforms": { "k1": { "releases": { "stable": {
                "version": "v1.0.0", "url": "/ota/k1/v1.0.0.bin", "sha256": "ab", "size": 1
            }}}}
        });
        tokio::fs::write(dir.join("manifest.json"), manifest.to_string()).await.unwrap();
        let repo = OtaRepo::load(&dir).await;
        let registry = NodeRegistry::new();
        let a = registry.register_node("a", ip(), "1.0").unwrap();
        registry.send_welcome(a, 0).unwrap();
        registry.mark_ready(a);

        let dispatch = OtaDispatch::new();
        dispatch.start_rollout(&repo, "k1", "stable", vec![a], 0).unwrap();
        dispatch.on_node_status(a, "error", &registry);
        assert_eq!(dispatch.state(), DispatchState::Aborted);
    }
}
