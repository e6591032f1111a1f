//! Control-plane JSON message shapes exchanged over the `/ws` WebSocket.
//!
//! Node→Hub and the legacy `welcome`/`ts_pong`/`ota_update` messages are
//! tagged by a `"t"` field; the newer batched state-delta messages from hub
//! to node are tagged by `"type"`. Both tag names are preserved as-is rather
//! than unified, matching the two message families on the wire.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Caps {
    pub udp: bool,
    pub ota: bool,
    pub clock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Topo {
    pub leds: u16,
    pub channels: u8,
}

/// Messages a node sends to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum NodeToHub {
    Hello {
        proto: u8,
        mac: String,
        fw: String,
        caps: Caps,
        topo: Topo,
    },
    Ka {
        #[serde(rename = "nodeId")]
        node_id: u8,
        token: String,
        rssi: i8,
        loss_pct: u16,
        drift_us: i32,
        uptime_s: u32,
    },
    TsPing {
        #[serde(rename = "nodeId")]
        node_id: u8,
        token: String,
        seq: u32,
        t1_us: u64,
    },
    OtaStatus {
        #[serde(rename = "nodeId")]
        node_id: u8,
        token: String,
        state: String,
        pct: u8,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
}

/// Legacy/point-to-point messages the hub sends to a node, tagged `"t"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum HubToNodeCtrl {
    Welcome {
        proto: u8,
        #[serde(rename = "nodeId")]
        node_id: u8,
        token: String,
        #[serde(rename = "udpPort")]
        udp_port: u16,
        #[serde(rename = "hubEpoch_us")]
        hub_epoch_us: u64,
    },
    TsPong {
        #[serde(rename = "nodeId")]
        node_id: u8,
        seq: u32,
        t1_us: u64,
        t2_us: u64,
        t3_us: u64,
    },
    OtaUpdate {
        version: String,
        url: String,
        sha256: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GlobalParamsWire {
    #[serde(rename = "effectId", skip_serializing_if = "Option::is_none", default)]
    pub effect_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub speed: Option<u8>,
    #[serde(rename = "paletteId", skip_serializing_if = "Option::is_none", default)]
    pub palette_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hue: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub intensity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub saturation: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub complexity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub variation: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneSettingsWire {
    #[serde(rename = "zoneId")]
    pub zone_id: u8,
    #[serde(rename = "effectId", skip_serializing_if = "Option::is_none", default)]
    pub effect_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub speed: Option<u8>,
    #[serde(rename = "paletteId", skip_serializing_if = "Option::is_none", default)]
    pub palette_id: Option<u16>,
    #[serde(rename = "blendMode", skip_serializing_if = "Option::is_none", default)]
    pub blend_mode: Option<u8>,
}

/// Batched state-delta messages the hub sends to a node, tagged `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum HubToNodeBatch {
    #[serde(rename = "state.snapshot")]
    StateSnapshot {
        #[serde(rename = "nodeId")]
        node_id: u8,
        #[serde(rename = "applyAt_us")]
        apply_at_us: u64,
        #[serde(rename = "zonesEnabled")]
        zones_enabled: bool,
        global: GlobalParamsWire,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        zones: Option<Vec<ZoneSettingsWire>>,
    },
    #[serde(rename = "effects.setCurrent")]
    EffectsSetCurrent {
        #[serde(rename = "effectId")]
        effect_id: u16,
        #[serde(rename = "applyAt_us")]
        apply_at_us: u64,
    },
    #[serde(rename = "parameters.set")]
    ParametersSet {
        #[serde(rename = "applyAt_us")]
        apply_at_us: u64,
        #[serde(flatten)]
        fields: GlobalParamsWire,
    },
    #[serde(rename = "zones.update")]
    ZonesUpdate {
        #[serde(rename = "zoneId")]
        zone_id: u8,
        #[serde(rename = "applyAt_us")]
        apply_at_us: u64,
        #[serde(flatten)]
        fields: ZoneSettingsWire,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_tags_with_t() {
        let msg = NodeToHub::Hello {
            proto: 1,
            mac: "aa:bb:cc:dd:ee:ff".into(),
            fw: "1.0.0".into(),
            caps: Caps { udp: true, ota: true, clock: false },
            topo: Topo { leds: 144, channels: 1 },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["t"], "hello");
    }

    #[test]
    fn state_snapshot_tags_with_type() {
        let msg = HubToNodeBatch::StateSnapshot {
            node_id: 1,
            apply_at_us: 1_000,
            zones_enabled: false,
            global: GlobalParamsWire::default(),
            zones: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "state.snapshot");
        assert!(json.get("zones").is_none());
    }

    /// L4: `parameters.set` with no changed fields still serialises the
    /// envelope (the decision of whether to SEND it lives in the coordinator,
    /// not the wire type); every optional field must be absent when unset.
    #[test]
    fn parameters_set_omits_unset_fields() {
        let msg = HubToNodeBatch::ParametersSet {
            apply_at_us: 1_000,
            fields: GlobalParamsWire { brightness: Some(128), ..Default::default() },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["brightness"], 128);
        assert!(json.get("speed").is_none());
        assert!(json.get("effectId").is_none());
    }

    #[test]
    fn ota_status_round_trips_with_optional_error() {
        let msg = NodeToHub::OtaStatus {
            node_id: 2,
            token: "tok".into(),
            state: "error".into(),
            pct: 0,
            error: Some("SHA256 mismatch".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: NodeToHub = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
