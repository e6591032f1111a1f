//! HubState: the authoritative desired show state plus dirty-bit tracking.
//! One mutator per field; mutators only set a bit when the value actually
//! changes. Consumers (`consume_global_delta`, `consume_zone_deltas`) read
//! and clear atomically under the same lock — see SPEC_FULL.md §4.4 and P4.

use std::sync::Mutex;

use lwos_proto::constants::MAX_ZONES;

pub const GLOBAL_EFFECT_ID: u16 = 1 << 0;
pub const GLOBAL_BRIGHTNESS: u16 = 1 << 1;
pub const GLOBAL_SPEED: u16 = 1 << 2;
pub const GLOBAL_PALETTE_ID: u16 = 1 << 3;
pub const GLOBAL_HUE: u16 = 1 << 4;
pub const GLOBAL_INTENSITY: u16 = 1 << 5;
pub const GLOBAL_SATURATION: u16 = 1 << 6;
pub const GLOBAL_COMPLEXITY: u16 = 1 << 7;
pub const GLOBAL_VARIATION: u16 = 1 << 8;

pub const ZONE_EFFECT_ID: u8 = 1 << 0;
pub const ZONE_BRIGHTNESS: u8 = 1 << 1;
pub const ZONE_SPEED: u8 = 1 << 2;
pub const ZONE_PALETTE_ID: u8 = 1 << 3;
pub const ZONE_BLEND_MODE: u8 = 1 << 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalParams {
    pub effect_id: u16,
    pub brightness: u8,
    pub speed: u8,
    pub palette_id: u16,
    pub hue: u8,
    pub intensity: u8,
    pub saturation: u8,
    pub complexity: u8,
    pub variation: u8,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            effect_id: 0,
            brightness: 128,
            speed: 25,
            palette_id: 0,
            hue: 0,
            intensity: 128,
            saturation: 255,
            complexity: 128,
            variation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoneSettings {
    pub effect_id: u16,
    pub brightness: u8,
    pub speed: u8,
    pub palette_id: u16,
    pub blend_mode: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct ZoneDelta {
    pub node_id: u8,
    pub zone_id: u8,
    pub mask: u8,
    pub values: ZoneSettings,
}

struct Inner {
    global: GlobalParams,
    global_dirty: u16,
    /// (nodeId, zoneId) -> (settings, dirty mask). Only nodes that have had a
    /// zone touched at least once appear here.
    zones: std::collections::HashMap<(u8, u8), (ZoneSettings, u8)>,
}

pub struct HubState {
    inner: Mutex<Inner>,
}

impl HubState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                global: GlobalParams::default(),
                global_dirty: 0,
                zones: std::collections::HashMap::new(),
            }),
        }
    }

    pub fn has_dirty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.global_dirty != 0 || inner.zones.values().any(|(_, mask)| *mask != 0)
    }

    pub fn global_snapshot(&self) -> GlobalParams {
        self.inner.lock().unwrap().global
    }

    pub fn set_effect_id(&self, v: u16) {
        let mut inner = self.inner.lock().unwrap();
        if inner.global.effect_id != v {
            inner.global.effect_id = v;
            inner.global_dirty |= GLOBAL_EFFECT_ID;
        }
    }

    pub fn set_brightness(&self, v: u8) {
        let mut inner = self.inner.lock().unwrap();
        if inner.global.brightness != v {
            inner.global.brightness = v;
            inner.global_dirty |= GLOBAL_BRIGHTNESS;
        }
    }

    pub fn set_speed(&self, v: u8) {
        let mut inner = self.inner.lock().unwrap();
        if inner.global.speed != v {
            inner.global.speed = v;
            inner.global_dirty |= GLOBAL_SPEED;
        }
    }

    pub fn set_palette_id(&self, v: u16) {
        let mut inner = self.inner.lock().unwrap();
        if inner.global.palette_id != v {
            inner.global.palette_id = v;
            inner.global_dirty |= GLOBAL_PALETTE_ID;
        }
    }

    pub fn set_hue(&self, v: u8) {
        let mut inner = self.inner.lock().unwrap();
        if inner.global.hue != v {
            inner.global.hue = v;
            inner.global_dirty |= GLOBAL_HUE;
        }
    }

    pub fn set_intensity(&self, v: u8) {
        let mut inner = self.inner.lock().unwrap();
        if inner.global.intensity != v {
            inner.global.intensity = v;
            inner.global_dirty |= GLOBAL_INTENSITY;
        }
    }

    pub fn set_saturation(&self, v: u8) {
        let mut inner = self.inner.lock().unwrap();
        if inner.global.saturation != v {
            inner.global.saturation = v;
            inner.global_dirty |= GLOBAL_SATURATION;
        }
    }

    pub fn set_complexity(&self, v: u8) {
        let mut inner = self.inner.lock().unwrap();
        if inner.global.complexity != v {
            inner.global.complexity = v;
            inner.global_dirty |= GLOBAL_COMPLEXITY;
        }
    }

    pub fn set_variation(&self, v: u8) {
        let mut inner = self.inner.lock().unwrap();
        if inner.global.variation != v {
            inner.global.variation = v;
            inner.global_dirty |= GLOBAL_VARIATION;
        }
    }

    pub fn set_zone_effect_id(&self, node_id: u8, zone_id: u8, v: u16) {
        self.mutate_zone(node_id, zone_id, ZONE_EFFECT_ID, |z| z.effect_id = v, |z| z.effect_id != v);
    }

    pub fn set_zone_brightness(&self, node_id: u8, zone_id: u8, v: u8) {
        self.mutate_zone(node_id, zone_id, ZONE_BRIGHTNESS, |z| z.brightness = v, |z| z.brightness != v);
    }

    pub fn set_zone_speed(&self, node_id: u8, zone_id: u8, v: u8) {
        self.mutate_zone(node_id, zone_id, ZONE_SPEED, |z| z.speed = v, |z| z.speed != v);
    }

    pub fn set_zone_palette_id(&self, node_id: u8, zone_id: u8, v: u16) {
        self.mutate_zone(node_id, zone_id, ZONE_PALETTE_ID, |z| z.palette_id = v, |z| z.palette_id != v);
    }

    pub fn set_zone_blend_mode(&self, node_id: u8, zone_id: u8, v: u8) {
        self.mutate_zone(node_id, zone_id, ZONE_BLEND_MODE, |z| z.blend_mode = v, |z| z.blend_mode != v);
    }

    fn mutate_zone(
        &self,
        node_id: u8,
        zone_id: u8,
        bit: u8,
        apply: impl FnOnce(&mut ZoneSettings),
        changed: impl FnOnce(&ZoneSettings) -> bool,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.zones.entry((node_id, zone_id)).or_insert_with(|| (ZoneSettings::default(), 0));
        if changed(&entry.0) {
            apply(&mut entry.0);
            entry.1 |= bit;
        }
    }

    /// Snapshot the current global params and clear the dirty mask in one
    /// critical section (P4).
    pub fn consume_global_delta(&self) -> (u16, GlobalParams) {
        let mut inner = self.inner.lock().unwrap();
        let mask = inner.global_dirty;
        inner.global_dirty = 0;
        (mask, inner.global)
    }

    /// Drain up to `max` pending zone deltas, clearing each mask as it's
    /// emitted.
    pub fn consume_zone_deltas(&self, max: usize) -> Vec<ZoneDelta> {
        let mut inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for (&(node_id, zone_id), (values, mask)) in inner.zones.iter_mut() {
            if *mask == 0 {
                continue;
            }
            out.push(ZoneDelta { node_id, zone_id, mask: *mask, values: *values });
            *mask = 0;
            if out.len() >= max {
                break;
            }
        }
        out
    }

    /// Full {global, zones} snapshot for a newly-joined node, used to build
    /// the WELCOME-time `state.snapshot`.
    pub fn full_snapshot(&self, node_id: u8) -> (GlobalParams, Vec<(u8, ZoneSettings)>) {
        let inner = self.inner.lock().unwrap();
        let zones = (0..MAX_ZONES)
            .filter_map(|zone_id| inner.zones.get(&(node_id, zone_id)).map(|(v, _)| (zone_id, *v)))
            .collect();
        (inner.global, zones)
    }
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setter_only_marks_dirty_on_actual_change() {
        let state = HubState::new();
        assert!(!state.has_dirty());
        state.set_brightness(128); // default already 128
        assert!(!state.has_dirty());
        state.set_brightness(200);
        assert!(state.has_dirty());
    }

    /// P4: consume-then-set cannot race the next mutator past the lock.
    #[test]
    fn consume_global_delta_clears_mask() {
        let state = HubState::new();
        state.set_effect_id(7);
        let (mask, snap) = state.consume_global_delta();
        assert_eq!(mask, GLOBAL_EFFECT_ID);
        assert_eq!(snap.effect_id, 7);
        assert!(!state.has_dirty());
    }

    #[test]
    fn consume_zone_deltas_clears_emitted_masks() {
        let state = HubState::new();
        state.set_zone_brightness(1, 0, 200);
        let deltas = state.consume_zone_deltas(16);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].values.brightness, 200);
        assert!(!state.has_dirty());
    }

    #[test]
    fn full_snapshot_only_includes_touched_zones() {
        let state = HubState::new();
        state.set_zone_effect_id(3, 1, 9);
        let (_, zones) = state.full_snapshot(3);
        assert_eq!(zones, vec![(1, ZoneSettings { effect_id: 9, ..Default::default() })]);
    }
}
