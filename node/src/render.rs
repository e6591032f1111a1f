//! The out-of-scope LED render engine, modelled as an injected boundary
//! (§1/§9's guidance on treating external collaborators as typed traits
//! instead of function pointers). `TracingRenderSink` is the only
//! implementation shipped here; real firmware supplies its own.

use tracing::info;

use crate::scheduler::{Cmd, ParamDeltaCmd, ZoneUpdateCmd};

pub trait RenderSink: Send {
    fn apply_scene_change(&mut self, effect_id: u16, palette_id: Option<u16>);
    fn apply_param_delta(&mut self, delta: &ParamDeltaCmd);
    fn apply_zone_update(&mut self, zone: &ZoneUpdateCmd);
    fn apply_beat_tick(&mut self, bpm_x100: u16, phase: u8, flags: u8);
}

/// Logs every applied command instead of driving real LEDs, so the node
/// binary runs end-to-end without hardware.
#[derive(Default)]
pub struct TracingRenderSink;

impl RenderSink for TracingRenderSink {
    fn apply_scene_change(&mut self, effect_id: u16, palette_id: Option<u16>) {
        info!(effect_id, ?palette_id, "render: scene change");
    }

    fn apply_param_delta(&mut self, delta: &ParamDeltaCmd) {
        info!(?delta, "render: param delta");
    }

    fn apply_zone_update(&mut self, zone: &ZoneUpdateCmd) {
        info!(?zone, "render: zone update");
    }

    fn apply_beat_tick(&mut self, bpm_x100: u16, phase: u8, flags: u8) {
        info!(bpm_x100, phase, flags, "render: beat tick");
    }
}

/// Apply one extracted batch in the stable order the render boundary
/// requires, regardless of each command's relative position within the
/// batch: SceneChange → ParamDelta → ZoneUpdate → BeatTick (§4.10).
pub fn apply_batch(sink: &mut dyn RenderSink, cmds: Vec<Cmd>) {
    let mut scenes = Vec::new();
    let mut params = Vec::new();
    let mut zones = Vec::new();
    let mut beats = Vec::new();

    for cmd in cmds {
        match cmd {
            Cmd::SceneChange { effect_id, palette_id } => scenes.push((effect_id, palette_id)),
            Cmd::ParamDelta(p) => params.push(p),
            Cmd::ZoneUpdate(z) => zones.push(z),
            Cmd::BeatTick { bpm_x100, phase, flags } => beats.push((bpm_x100, phase, flags)),
        }
    }

    for (effect_id, palette_id) in scenes {
        sink.apply_scene_change(effect_id, palette_id);
    }
    for p in &params {
        sink.apply_param_delta(p);
    }
    for z in &zones {
        sink.apply_zone_update(z);
    }
    for (bpm_x100, phase, flags) in beats {
        sink.apply_beat_tick(bpm_x100, phase, flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        order: Vec<&'static str>,
    }

    impl RenderSink for RecordingSink {
        fn apply_scene_change(&mut self, _effect_id: u16, _palette_id: Option<u16>) {
            self.order.push("scene");
        }
        fn apply_param_delta(&mut self, _delta: &ParamDeltaCmd) {
            self.order.push("param");
        }
        fn apply_zone_update(&mut self, _zone: &ZoneUpdateCmd) {
            self.order.push("zone");
        }
        fn apply_beat_tick(&mut self, _bpm_x100: u16, _phase: u8, _flags: u8) {
            self.order.push("beat");
        }
    }

    /// §4.10: application order is fixed regardless of extraction order.
    #[test]
    fn batch_applies_in_fixed_priority_order() {
        let mut sink = RecordingSink::default();
        let cmds = vec![
            Cmd::BeatTick { bpm_x100: 12000, phase: 0, flags: 0 },
            Cmd::ZoneUpdate(ZoneUpdateCmd { zone_id: 0, effect_id: None, brightness: None, speed: None, palette_id: None, blend_mode: None }),
            Cmd::ParamDelta(ParamDeltaCmd::default()),
            Cmd::SceneChange { effect_id: 3, palette_id: Some(1) },
        ];
        apply_batch(&mut sink, cmds);
        assert_eq!(sink.order, vec!["scene", "param", "zone", "beat"]);
    }
}
