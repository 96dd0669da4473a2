// src/voice.rs
//
// Voice model: pitch and velocity math, breakpoint envelopes, and the
// in-flight voice record shared by the synthesizers and audio playback.

use serde::{Deserialize, Serialize};

use crate::context::AudioContext;
use crate::graph::NodeId;
use crate::parameter::{AudioParam, ParamKind};

/// Level exponential envelopes decay towards; treated as silence.
pub const ENVELOPE_FLOOR: f32 = 0.001;

/// Shortest envelope stage, so ramps never collapse onto one instant.
const MIN_STAGE: f64 = 0.001;

/// Equal-tempered frequency of a MIDI note, A4 (69) = 440 Hz.
#[inline]
pub fn midi_to_freq(note: u8) -> f64 {
    440.0 * 2.0_f64.powf((note as f64 - 69.0) / 12.0)
}

/// Curved velocity mapping: `(velocity / 127)^1.5 * master`.
#[inline]
pub fn velocity_to_gain(velocity: u8, master: f32) -> f32 {
    let v = velocity.min(127) as f32 / 127.0;
    v.powf(1.5) * master
}

// ═══════════════════════════════════════════════════════════════════
// ADSR
// ═══════════════════════════════════════════════════════════════════

/// Envelope times in seconds; `sustain` is a fraction of the peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Adsr {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f32,
    pub release: f64,
}

impl Default for Adsr {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.3,
        }
    }
}

impl Adsr {
    pub const fn new(attack: f64, decay: f64, sustain: f32, release: f64) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }

    #[inline]
    pub fn release_time(&self) -> f64 {
        self.release.max(MIN_STAGE)
    }

    /// Onset breakpoints: hold `base` at `start`, rise linearly to `peak`
    /// over the attack, then fall exponentially to the sustain level.
    ///
    /// The sustain level sits `sustain` of the way from `base` to `peak`
    /// and never below [`ENVELOPE_FLOOR`].
    pub fn schedule_onset(&self, param: &mut AudioParam, start: f64, base: f32, peak: f32) {
        let attack_end = start + self.attack.max(MIN_STAGE);
        let decay_end = attack_end + self.decay.max(MIN_STAGE);
        let sustain = (base + (peak - base) * self.sustain.clamp(0.0, 1.0)).max(ENVELOPE_FLOOR);

        param.cancel_scheduled_values(start);
        param.set_value_at_time(base, start);
        param.linear_ramp_to_value_at_time(peak, attack_end);
        param.exponential_ramp_to_value_at_time(sustain, decay_end);
    }

    /// Release breakpoints: freeze whatever the envelope is doing at `at`,
    /// then decay exponentially to `floor`. Returns the end of the release.
    pub fn schedule_release(&self, param: &mut AudioParam, at: f64, floor: f32) -> f64 {
        let end = at + self.release_time();
        param.cancel_and_hold_at_time(at);
        param.exponential_ramp_to_value_at_time(floor, end);
        end
    }
}

// ═══════════════════════════════════════════════════════════════════
// Voice
// ═══════════════════════════════════════════════════════════════════

/// Identity of a tracked voice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VoiceKey {
    Note {
        track_id: String,
        channel: u8,
        pitch: u8,
        /// Scheduled start rounded to whole milliseconds.
        start_ms: i64,
    },
    Region {
        track_id: String,
        region_id: String,
    },
}

impl VoiceKey {
    pub fn note(track_id: &str, channel: u8, pitch: u8, start: f64) -> Self {
        VoiceKey::Note {
            track_id: track_id.to_string(),
            channel,
            pitch,
            start_ms: (start * 1000.0).round() as i64,
        }
    }

    pub fn region(track_id: &str, region_id: &str) -> Self {
        VoiceKey::Region {
            track_id: track_id.to_string(),
            region_id: region_id.to_string(),
        }
    }

    pub fn track_id(&self) -> &str {
        match self {
            VoiceKey::Note { track_id, .. } | VoiceKey::Region { track_id, .. } => track_id,
        }
    }
}

/// One in-flight synthesized tone, drum hit or audio region.
#[derive(Debug, Clone)]
pub struct Voice {
    pub track_id: String,

    /// Every node the voice created; removed together.
    pub nodes: Vec<NodeId>,

    /// Scheduled sources to stop on release.
    pub sources: Vec<NodeId>,

    /// Final gain stage; its gain param carries the amplitude envelope.
    pub output: NodeId,

    pub release: f64,
    pub start_time: f64,

    /// When the sources stop, including the release tail.
    pub end_time: f64,
}

impl Voice {
    /// True once the voice has been silent for `safety` seconds.
    #[inline]
    pub fn is_finished(&self, now: f64, safety: f64) -> bool {
        now >= self.end_time + safety
    }

    /// True if nothing of the voice has sounded yet at `now`.
    #[inline]
    pub fn is_pending(&self, now: f64) -> bool {
        self.start_time > now
    }

    /// Fade out from whatever level the voice has at `at` and stop its
    /// sources at the end of the fade. Stopping an already stopping voice
    /// only ever moves the end earlier.
    pub fn release(&mut self, ctx: &mut AudioContext, at: f64) {
        let at = at.max(self.start_time);
        let end = at + self.release.max(MIN_STAGE);
        if end >= self.end_time {
            return;
        }
        if let Some(gain) = ctx.param_mut(self.output, ParamKind::Gain) {
            gain.cancel_and_hold_at_time(at);
            gain.exponential_ramp_to_value_at_time(ENVELOPE_FLOOR, end);
        }
        for source in &self.sources {
            ctx.stop(*source, end);
        }
        self.end_time = end;
    }

    /// Remove every node immediately.
    pub fn dispose(&self, ctx: &mut AudioContext) {
        ctx.remove_nodes(&self.nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::AutomationEvent;

    #[test]
    fn test_a4_and_octaves() {
        assert_eq!(midi_to_freq(69), 440.0);
        for n in 0..=115u8 {
            let ratio = midi_to_freq(n + 12) / midi_to_freq(n);
            assert!((ratio - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_velocity_gain_is_monotonic_and_bounded() {
        let master = 0.8;
        let mut last = -1.0;
        for v in 0..=127u8 {
            let g = velocity_to_gain(v, master);
            assert!(g >= last);
            assert!(g <= master);
            last = g;
        }
        assert!((velocity_to_gain(127, master) - master).abs() < 1e-6);
    }

    #[test]
    fn test_onset_breakpoints() {
        let env = Adsr::new(0.1, 0.2, 0.5, 0.3);
        let mut p = AudioParam::unbounded(0.0);
        env.schedule_onset(&mut p, 1.0, 0.0, 0.8);

        assert!(p.value_at(0.9).abs() < 1e-6);
        assert!((p.value_at(1.05) - 0.4).abs() < 1e-4);
        assert!((p.value_at(1.1) - 0.8).abs() < 1e-4);
        assert!((p.value_at(2.0) - 0.4).abs() < 1e-4);
    }

    #[test]
    fn test_release_holds_then_decays_to_floor() {
        let env = Adsr::new(0.1, 0.2, 0.5, 0.3);
        let mut p = AudioParam::unbounded(0.0);
        env.schedule_onset(&mut p, 0.0, 0.0, 1.0);
        let end = env.schedule_release(&mut p, 0.05, ENVELOPE_FLOOR);

        assert!((end - 0.35).abs() < 1e-12);
        assert!((p.value_at(0.05) - 0.5).abs() < 1e-4);
        assert!((p.value_at(0.35) - ENVELOPE_FLOOR).abs() < 1e-6);
        assert!(matches!(
            p.events().last(),
            Some(AutomationEvent::ExponentialRamp { .. })
        ));
    }

    #[test]
    fn test_note_keys_round_start_to_millis() {
        let a = VoiceKey::note("t1", 0, 60, 1.0004);
        let b = VoiceKey::note("t1", 0, 60, 0.9996);
        assert_eq!(a, b);
        assert_eq!(a.track_id(), "t1");
    }
}
