// src/state/instrument.rs
//
// Instrument definitions: subtractive synth patches and the drum kit.

use serde::{Deserialize, Serialize};

use crate::nodes::{FilterKind, Waveform};
use crate::voice::Adsr;

// ═══════════════════════════════════════════════════════════════════════════
// Synth patches
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LfoTarget {
    #[default]
    Pitch,
    Filter,
    Amplitude,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LfoParams {
    /// Hz
    pub rate: f64,
    /// 0–1; zero disables the LFO.
    pub amount: f32,
    pub target: LfoTarget,
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            rate: 5.0,
            amount: 0.0,
            target: LfoTarget::Pitch,
        }
    }
}

impl LfoParams {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.amount > 0.0 && self.rate > 0.0
    }
}

/// Patch for the subtractive MIDI synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SynthParams {
    pub osc1_waveform: Waveform,
    pub osc2_waveform: Waveform,
    /// Cents
    pub osc2_detune: f32,
    /// 0–1
    pub osc2_level: f32,
    /// 0–1, one octave below osc1
    pub sub_level: f32,

    pub filter_type: FilterKind,
    /// Hz
    pub filter_cutoff: f32,
    /// Q
    pub filter_resonance: f32,
    /// 0–1, fraction of the way from cutoff to the top of the range.
    pub filter_env_amount: f32,

    pub amp_envelope: Adsr,
    pub filter_envelope: Adsr,
    pub lfo: LfoParams,

    /// 0–1
    pub master_volume: f32,
    /// 0–1; zero bypasses the shaper.
    pub drive: f32,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            osc1_waveform: Waveform::Sawtooth,
            osc2_waveform: Waveform::Square,
            osc2_detune: 7.0,
            osc2_level: 0.5,
            sub_level: 0.3,
            filter_type: FilterKind::Lowpass,
            filter_cutoff: 2000.0,
            filter_resonance: 1.0,
            filter_env_amount: 0.3,
            amp_envelope: Adsr::new(0.01, 0.2, 0.7, 0.3),
            filter_envelope: Adsr::new(0.01, 0.3, 0.4, 0.3),
            lfo: LfoParams::default(),
            master_volume: 0.7,
            drive: 0.0,
        }
    }
}

impl SynthParams {
    /// Built-in patch by id.
    pub fn preset(id: &str) -> Option<Self> {
        let base = Self::default();
        let params = match id {
            "default" | "synth" => base,
            "piano" => Self {
                osc1_waveform: Waveform::Triangle,
                osc2_waveform: Waveform::Sine,
                osc2_detune: 3.0,
                osc2_level: 0.4,
                sub_level: 0.1,
                filter_cutoff: 3500.0,
                filter_env_amount: 0.4,
                amp_envelope: Adsr::new(0.005, 0.8, 0.3, 0.4),
                filter_envelope: Adsr::new(0.005, 0.5, 0.2, 0.4),
                ..base
            },
            "bass" => Self {
                osc1_waveform: Waveform::Sawtooth,
                osc2_waveform: Waveform::Square,
                osc2_detune: -5.0,
                osc2_level: 0.4,
                sub_level: 0.7,
                filter_cutoff: 600.0,
                filter_resonance: 2.0,
                filter_env_amount: 0.25,
                amp_envelope: Adsr::new(0.005, 0.15, 0.8, 0.15),
                filter_envelope: Adsr::new(0.005, 0.2, 0.2, 0.15),
                drive: 0.2,
                ..base
            },
            "lead" => Self {
                osc1_waveform: Waveform::Sawtooth,
                osc2_waveform: Waveform::Sawtooth,
                osc2_detune: 12.0,
                osc2_level: 0.6,
                sub_level: 0.0,
                filter_cutoff: 2500.0,
                filter_resonance: 4.0,
                amp_envelope: Adsr::new(0.02, 0.1, 0.8, 0.2),
                lfo: LfoParams {
                    rate: 5.5,
                    amount: 0.15,
                    target: LfoTarget::Pitch,
                },
                ..base
            },
            "pad" => Self {
                osc1_waveform: Waveform::Sawtooth,
                osc2_waveform: Waveform::Triangle,
                osc2_detune: 9.0,
                osc2_level: 0.7,
                sub_level: 0.2,
                filter_cutoff: 1200.0,
                filter_env_amount: 0.2,
                amp_envelope: Adsr::new(0.6, 0.5, 0.8, 1.2),
                filter_envelope: Adsr::new(0.8, 1.0, 0.5, 1.2),
                lfo: LfoParams {
                    rate: 0.5,
                    amount: 0.3,
                    target: LfoTarget::Filter,
                },
                master_volume: 0.6,
                ..base
            },
            "organ" => Self {
                osc1_waveform: Waveform::Sine,
                osc2_waveform: Waveform::Sine,
                osc2_detune: 1200.0,
                osc2_level: 0.5,
                sub_level: 0.5,
                filter_cutoff: 6000.0,
                filter_env_amount: 0.0,
                amp_envelope: Adsr::new(0.01, 0.05, 1.0, 0.1),
                lfo: LfoParams {
                    rate: 6.0,
                    amount: 0.2,
                    target: LfoTarget::Amplitude,
                },
                ..base
            },
            _ => return None,
        };
        Some(params)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Drum kit
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrumKind {
    Kick,
    Snare,
    HiHat,
    OpenHat,
    Crash,
    Ride,
    Tom,
    Clap,
    Rim,
    Cowbell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseColor {
    #[default]
    White,
    Pink,
    Brown,
}

/// Exponential pitch sweep from `start * frequency` to `end * frequency`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchSweep {
    pub start_multiplier: f32,
    pub end_multiplier: f32,
    /// Seconds
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrumFilter {
    pub kind: FilterKind,
    pub frequency: f32,
    pub q: f32,
}

/// One drum sound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrumParams {
    pub kind: DrumKind,
    pub waveform: Waveform,
    /// Hz
    pub frequency: f32,
    pub pitch_sweep: Option<PitchSweep>,
    /// 0–1 mix of the noise layer
    pub noise_level: f32,
    pub noise_color: NoiseColor,
    pub filter: Option<DrumFilter>,
    pub envelope: Adsr,
    /// 0–1
    pub volume: f32,
}

impl DrumParams {
    fn new(kind: DrumKind, waveform: Waveform, frequency: f32, envelope: Adsr) -> Self {
        Self {
            kind,
            waveform,
            frequency,
            pitch_sweep: None,
            noise_level: 0.0,
            noise_color: NoiseColor::White,
            filter: None,
            envelope,
            volume: 0.8,
        }
    }

    fn sweep(mut self, start_multiplier: f32, end_multiplier: f32, time: f64) -> Self {
        self.pitch_sweep = Some(PitchSweep {
            start_multiplier,
            end_multiplier,
            time,
        });
        self
    }

    fn noise(mut self, level: f32, color: NoiseColor) -> Self {
        self.noise_level = level;
        self.noise_color = color;
        self
    }

    fn filtered(mut self, kind: FilterKind, frequency: f32, q: f32) -> Self {
        self.filter = Some(DrumFilter { kind, frequency, q });
        self
    }

    fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// General MIDI percussion preset for `note`, or `None` if unmapped.
    pub fn for_note(note: u8) -> Option<Self> {
        use DrumKind::*;
        let hit = match note {
            35 | 36 => Self::new(Kick, Waveform::Sine, 55.0, Adsr::new(0.001, 0.35, 0.0, 0.1))
                .sweep(3.0, 1.0, 0.08)
                .volume(1.0),
            38 | 40 => Self::new(Snare, Waveform::Triangle, 180.0, Adsr::new(0.001, 0.18, 0.0, 0.08))
                .noise(0.7, NoiseColor::White)
                .filtered(FilterKind::Highpass, 1000.0, 0.7),
            42 | 44 => Self::new(HiHat, Waveform::Square, 0.0, Adsr::new(0.001, 0.05, 0.0, 0.03))
                .noise(1.0, NoiseColor::White)
                .filtered(FilterKind::Highpass, 7000.0, 1.0)
                .volume(0.5),
            46 => Self::new(OpenHat, Waveform::Square, 0.0, Adsr::new(0.001, 0.3, 0.1, 0.2))
                .noise(1.0, NoiseColor::White)
                .filtered(FilterKind::Highpass, 6500.0, 1.0)
                .volume(0.5),
            49 | 57 => Self::new(Crash, Waveform::Square, 420.0, Adsr::new(0.001, 1.2, 0.0, 0.6))
                .noise(0.8, NoiseColor::White)
                .filtered(FilterKind::Highpass, 4500.0, 0.7)
                .volume(0.45),
            51 | 59 => Self::new(Ride, Waveform::Square, 510.0, Adsr::new(0.001, 0.8, 0.1, 0.4))
                .noise(0.4, NoiseColor::Pink)
                .filtered(FilterKind::Bandpass, 5000.0, 1.5)
                .volume(0.4),
            41 | 43 | 45 | 47 | 48 | 50 => {
                let freq = match note {
                    41 => 80.0,
                    43 => 100.0,
                    45 => 120.0,
                    47 => 140.0,
                    48 => 165.0,
                    _ => 190.0,
                };
                Self::new(Tom, Waveform::Sine, freq, Adsr::new(0.001, 0.4, 0.0, 0.15))
                    .sweep(1.8, 1.0, 0.12)
                    .noise(0.1, NoiseColor::Brown)
                    .volume(0.8)
            }
            39 => Self::new(Clap, Waveform::Triangle, 0.0, Adsr::new(0.001, 0.2, 0.0, 0.1))
                .noise(1.0, NoiseColor::White)
                .filtered(FilterKind::Bandpass, 1200.0, 1.2)
                .volume(0.7),
            37 => Self::new(Rim, Waveform::Triangle, 1700.0, Adsr::new(0.001, 0.03, 0.0, 0.02))
                .filtered(FilterKind::Highpass, 800.0, 0.7)
                .volume(0.6),
            56 => Self::new(Cowbell, Waveform::Square, 587.0, Adsr::new(0.001, 0.25, 0.0, 0.1))
                .filtered(FilterKind::Bandpass, 800.0, 1.5)
                .volume(0.5),
            _ => return None,
        };
        Some(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gm_map_covers_kit() {
        assert_eq!(DrumParams::for_note(36).unwrap().kind, DrumKind::Kick);
        assert_eq!(DrumParams::for_note(38).unwrap().kind, DrumKind::Snare);
        assert_eq!(DrumParams::for_note(42).unwrap().kind, DrumKind::HiHat);
        assert_eq!(DrumParams::for_note(46).unwrap().kind, DrumKind::OpenHat);
        assert_eq!(DrumParams::for_note(49).unwrap().kind, DrumKind::Crash);
        assert_eq!(DrumParams::for_note(51).unwrap().kind, DrumKind::Ride);
        assert_eq!(DrumParams::for_note(39).unwrap().kind, DrumKind::Clap);
        assert_eq!(DrumParams::for_note(37).unwrap().kind, DrumKind::Rim);
        assert_eq!(DrumParams::for_note(56).unwrap().kind, DrumKind::Cowbell);
        assert!(DrumParams::for_note(60).is_none());
    }

    #[test]
    fn test_toms_rise_in_pitch() {
        let low = DrumParams::for_note(41).unwrap();
        let high = DrumParams::for_note(50).unwrap();
        assert_eq!(low.kind, DrumKind::Tom);
        assert!(high.frequency > low.frequency);
    }

    #[test]
    fn test_presets_resolve() {
        for id in ["default", "piano", "bass", "lead", "pad", "organ"] {
            assert!(SynthParams::preset(id).is_some(), "{id}");
        }
        assert!(SynthParams::preset("theremin").is_none());
    }

    #[test]
    fn test_partial_patch_uses_defaults() {
        let p: SynthParams = serde_json::from_str(r#"{ "filterCutoff": 800 }"#).unwrap();
        assert_eq!(p.filter_cutoff, 800.0);
        assert_eq!(p.amp_envelope, SynthParams::default().amp_envelope);
    }
}
