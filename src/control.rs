//! Control surface routing.
//!
//! Translates incoming MIDI into loop engine commands. One channel is
//! reserved for the fader/button surface (per-layer volume, mute, and arm
//! controls plus arm/clear/keep buttons), another for a pair of drum pads
//! mapped to keep and arm. Everything else is performance input headed for
//! the loop, except that the sustain pedal can double as the keep control
//! and program changes and system noise are filtered out.

use crate::looper::{Loop, MAX_LAYERS};
use crate::midi::{self, MidiEvent};

/// A command for the loop engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    Arm,
    Clear,
    Keep,
    LayerArm(usize),
    LayerMute(usize, bool),
    LayerVolume(usize, u8),
}

/// What to do with one incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Drive the engine.
    Command(LoopCommand),
    /// Performance input: play and record.
    Record(MidiEvent),
    /// Not for the engine at all.
    Ignore,
}

/// CC and pad assignments for the control surface. The defaults follow a
/// nanoKONTROL-style layout on channel 16 with pads on channel 2.
#[derive(Debug, Clone)]
pub struct ControlMap {
    /// Channel (0-15) the fader/button surface sends on.
    pub control_channel: u8,
    /// Channel (0-15) of the keep/arm pads.
    pub pad_channel: u8,
    pub volume_ccs: [u8; MAX_LAYERS],
    pub mute_ccs: [u8; MAX_LAYERS],
    pub layer_arm_ccs: [u8; MAX_LAYERS],
    pub arm_cc: u8,
    pub clear_cc: u8,
    pub keep_cc: u8,
    pub keep_pad: u8,
    pub arm_pad: u8,
    /// Sustain pedal on performance channels acts as keep.
    pub sustain_keeps: bool,
}

impl Default for ControlMap {
    fn default() -> Self {
        Self {
            control_channel: 15,
            pad_channel: 1,
            volume_ccs: [2, 3, 4, 5, 6, 8, 9, 11, 12],
            mute_ccs: [23, 24, 25, 26, 27, 28, 29, 30, 31],
            layer_arm_ccs: [33, 34, 35, 36, 37, 38, 39, 40, 41],
            arm_cc: 44,
            clear_cc: 46,
            keep_cc: 49,
            keep_pad: 48,
            arm_pad: 42,
            sustain_keeps: true,
        }
    }
}

impl ControlMap {
    /// Classify one incoming event.
    pub fn route(&self, ev: MidiEvent) -> Routed {
        if ev.channel() == self.control_channel {
            self.route_control(ev)
        } else if ev.channel() == self.pad_channel {
            self.route_pad(ev)
        } else {
            self.route_performance(ev)
        }
    }

    fn route_control(&self, ev: MidiEvent) -> Routed {
        if ev.kind() != midi::CONTROL_CHANGE {
            return Routed::Ignore;
        }
        if let Some(layer) = cc_position(&self.volume_ccs, ev.data1) {
            return Routed::Command(LoopCommand::LayerVolume(layer, ev.data2));
        }
        if let Some(layer) = cc_position(&self.mute_ccs, ev.data1) {
            return Routed::Command(LoopCommand::LayerMute(layer, ev.data2 != 0));
        }
        if ev.data2 == 0 {
            return Routed::Ignore; // button release
        }
        if let Some(layer) = cc_position(&self.layer_arm_ccs, ev.data1) {
            return Routed::Command(LoopCommand::LayerArm(layer));
        }
        match ev.data1 {
            n if n == self.arm_cc => Routed::Command(LoopCommand::Arm),
            n if n == self.clear_cc => Routed::Command(LoopCommand::Clear),
            n if n == self.keep_cc => Routed::Command(LoopCommand::Keep),
            _ => Routed::Ignore,
        }
    }

    fn route_pad(&self, ev: MidiEvent) -> Routed {
        if ev.is_note_on() {
            if ev.data1 == self.keep_pad {
                return Routed::Command(LoopCommand::Keep);
            }
            if ev.data1 == self.arm_pad {
                return Routed::Command(LoopCommand::Arm);
            }
        }
        // pad strikes never reach the loop
        Routed::Ignore
    }

    fn route_performance(&self, ev: MidiEvent) -> Routed {
        match ev.kind() {
            midi::CONTROL_CHANGE if self.sustain_keeps && ev.data1 == midi::CC_SUSTAIN => {
                if ev.data2 != 0 {
                    Routed::Command(LoopCommand::Keep)
                } else {
                    Routed::Ignore
                }
            }
            midi::NOTE_OFF
            | midi::NOTE_ON
            | midi::POLY_PRESSURE
            | midi::CONTROL_CHANGE
            | midi::CHANNEL_PRESSURE
            | midi::PITCH_BEND => Routed::Record(ev),
            // program change and anything above 0xEF stay out of the loop
            _ => Routed::Ignore,
        }
    }
}

fn cc_position(ccs: &[u8; MAX_LAYERS], cc: u8) -> Option<usize> {
    ccs.iter().position(|&c| c == cc)
}

/// Apply a routed command to the engine.
pub fn apply(cmd: LoopCommand, engine: &mut Loop) {
    match cmd {
        LoopCommand::Arm => engine.arm(),
        LoopCommand::Clear => engine.clear(),
        LoopCommand::Keep => engine.keep(),
        LoopCommand::LayerArm(layer) => engine.layer_arm(layer),
        LoopCommand::LayerMute(layer, muted) => engine.layer_mute(layer, muted),
        LoopCommand::LayerVolume(layer, vol) => engine.layer_volume(layer, vol),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> ControlMap {
        ControlMap::default()
    }

    fn cc(channel: u8, controller: u8, value: u8) -> MidiEvent {
        MidiEvent::new(0xB0 | channel, controller, value)
    }

    #[test]
    fn test_volume_fader_routes_continuously() {
        let m = map();
        assert_eq!(
            m.route(cc(15, 3, 90)),
            Routed::Command(LoopCommand::LayerVolume(1, 90))
        );
        // faders route even at zero
        assert_eq!(
            m.route(cc(15, 2, 0)),
            Routed::Command(LoopCommand::LayerVolume(0, 0))
        );
    }

    #[test]
    fn test_mute_buttons_toggle() {
        let m = map();
        assert_eq!(
            m.route(cc(15, 23, 127)),
            Routed::Command(LoopCommand::LayerMute(0, true))
        );
        assert_eq!(
            m.route(cc(15, 31, 0)),
            Routed::Command(LoopCommand::LayerMute(8, false))
        );
    }

    #[test]
    fn test_layer_arm_on_press_only() {
        let m = map();
        assert_eq!(
            m.route(cc(15, 35, 127)),
            Routed::Command(LoopCommand::LayerArm(2))
        );
        assert_eq!(m.route(cc(15, 35, 0)), Routed::Ignore);
    }

    #[test]
    fn test_transport_buttons_on_press_only() {
        let m = map();
        assert_eq!(m.route(cc(15, 44, 127)), Routed::Command(LoopCommand::Arm));
        assert_eq!(m.route(cc(15, 46, 127)), Routed::Command(LoopCommand::Clear));
        assert_eq!(m.route(cc(15, 49, 127)), Routed::Command(LoopCommand::Keep));
        assert_eq!(m.route(cc(15, 49, 0)), Routed::Ignore);
    }

    #[test]
    fn test_unmapped_control_ignored() {
        let m = map();
        assert_eq!(m.route(cc(15, 7, 127)), Routed::Ignore);
        // notes on the control channel are not performance input
        assert_eq!(m.route(MidiEvent::new(0x9F, 60, 100)), Routed::Ignore);
    }

    #[test]
    fn test_pads_map_to_keep_and_arm() {
        let m = map();
        assert_eq!(
            m.route(MidiEvent::new(0x91, 48, 100)),
            Routed::Command(LoopCommand::Keep)
        );
        assert_eq!(
            m.route(MidiEvent::new(0x91, 42, 100)),
            Routed::Command(LoopCommand::Arm)
        );
        // pad release and other pads are swallowed
        assert_eq!(m.route(MidiEvent::new(0x81, 48, 0)), Routed::Ignore);
        assert_eq!(m.route(MidiEvent::new(0x91, 36, 100)), Routed::Ignore);
    }

    #[test]
    fn test_performance_notes_are_recorded() {
        let m = map();
        let ev = MidiEvent::new(0x90, 60, 100);
        assert_eq!(m.route(ev), Routed::Record(ev));
        let off = MidiEvent::new(0x80, 60, 0);
        assert_eq!(m.route(off), Routed::Record(off));
        let bend = MidiEvent::new(0xE0, 0, 64);
        assert_eq!(m.route(bend), Routed::Record(bend));
    }

    #[test]
    fn test_sustain_pedal_keeps() {
        let m = map();
        assert_eq!(
            m.route(cc(0, midi::CC_SUSTAIN, 127)),
            Routed::Command(LoopCommand::Keep)
        );
        // release does nothing and is not recorded either
        assert_eq!(m.route(cc(0, midi::CC_SUSTAIN, 0)), Routed::Ignore);
    }

    #[test]
    fn test_sustain_pedal_recordable_when_disabled() {
        let mut m = map();
        m.sustain_keeps = false;
        let pedal = cc(0, midi::CC_SUSTAIN, 127);
        assert_eq!(m.route(pedal), Routed::Record(pedal));
    }

    #[test]
    fn test_program_change_filtered() {
        let m = map();
        assert_eq!(m.route(MidiEvent::new(0xC0, 12, 0)), Routed::Ignore);
    }

    #[test]
    fn test_other_ccs_on_performance_channel_recorded() {
        let m = map();
        let wheel = cc(2, 1, 64); // mod wheel, channel 3
        assert_eq!(m.route(wheel), Routed::Record(wheel));
    }

    #[test]
    fn test_apply_drives_engine() {
        let mut engine = Loop::with_capacity(8, |_ev: MidiEvent| {});
        apply(LoopCommand::LayerVolume(2, 55), &mut engine);
        apply(LoopCommand::LayerMute(1, true), &mut engine);
        apply(LoopCommand::LayerArm(4), &mut engine);
        let st = engine.status();
        assert_eq!(st.layer_volumes[2], 55);
        assert!(st.layer_mutes[1]);
        assert_eq!(st.active_layer, 4);
        assert!(st.layer_armed);

        apply(LoopCommand::Clear, &mut engine);
        assert!(engine.status().armed);
    }
}
