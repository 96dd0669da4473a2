// Periodic oscillator source.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::audio_buffer::AudioBuffer;
use crate::node::{Node, ParamBlock, ParamSpec, ProcessContext};
use crate::parameter::ParamKind;

use super::params;

/// Oscillator shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// One sample at normalized phase `p` in [0, 1).
    #[inline]
    pub fn sample(self, p: f64) -> f32 {
        let v = match self {
            Waveform::Sine => (p * TAU).sin(),
            Waveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            // Starts at zero, rising.
            Waveform::Sawtooth => 2.0 * (p + 0.5).fract() - 1.0,
            Waveform::Triangle => {
                if p < 0.25 {
                    4.0 * p
                } else if p < 0.75 {
                    2.0 - 4.0 * p
                } else {
                    4.0 * p - 4.0
                }
            }
        };
        v as f32
    }
}

// ═══════════════════════════════════════════════════════════════════
// Oscillator
// ═══════════════════════════════════════════════════════════════════

const OSC_PARAMS: &[ParamSpec] = &[
    ParamSpec::new(ParamKind::Frequency, 440.0, 0.0, 100_000.0),
    ParamSpec::new(ParamKind::Detune, 0.0, -153_600.0, 153_600.0),
];

/// Naive (non-bandlimited) oscillator with frequency and detune in cents.
pub struct OscillatorNode {
    waveform: Waveform,
    phase: f64,
    sample_rate: f64,
}

impl OscillatorNode {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            phase: 0.0,
            sample_rate: 48_000.0,
        }
    }
}

impl Node for OscillatorNode {
    fn prepare(&mut self, sample_rate: f64, _max_block: usize) {
        self.sample_rate = sample_rate;
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        _input: &AudioBuffer,
        params: &ParamBlock,
        output: &mut AudioBuffer,
    ) -> bool {
        let freq = params.get(params::FREQUENCY);
        let detune = params.get(params::DETUNE);
        let nyquist = self.sample_rate * 0.5;
        let out = output.channel_mut(0);

        for i in ctx.active.clone() {
            let f = freq[i] as f64 * 2.0_f64.powf(detune[i] as f64 / 1200.0);
            let f = f.clamp(-nyquist, nyquist);
            out[i] = self.waveform.sample(self.phase);
            self.phase = (self.phase + f / self.sample_rate).rem_euclid(1.0);
        }

        false
    }

    fn output_channels(&self, _input_channels: usize) -> usize {
        1
    }

    fn params(&self) -> &'static [ParamSpec] {
        OSC_PARAMS
    }

    fn is_source(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(waveform: Waveform, freq: f32, frames: usize, sr: f64) -> Vec<f32> {
        let mut osc = OscillatorNode::new(waveform);
        osc.prepare(sr, frames);
        let ctx = ProcessContext::new(frames, sr, 0);
        let params = ParamBlock::constant(&[freq, 0.0], frames);
        let mut out = AudioBuffer::new(1, frames);
        out.begin_block(frames);
        osc.process(&ctx, &AudioBuffer::new(1, frames), &params, &mut out);
        out.channel(0).to_vec()
    }

    #[test]
    fn test_square_alternates_each_half_period() {
        // 4 frames per period
        let out = run(Waveform::Square, 25.0, 8, 100.0);
        assert_eq!(out, vec![1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_triangle_peaks_at_quarter_period() {
        let out = run(Waveform::Triangle, 25.0, 4, 100.0);
        assert!((out[1] - 1.0).abs() < 1e-6);
        assert!((out[3] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sine_starts_at_zero() {
        let out = run(Waveform::Sine, 440.0, 4, 48_000.0);
        assert_eq!(out[0], 0.0);
        assert!(out[1] > 0.0);
    }

    #[test]
    fn test_only_active_frames_are_written() {
        let mut osc = OscillatorNode::new(Waveform::Square);
        osc.prepare(100.0, 8);
        let ctx = ProcessContext::new(8, 100.0, 0).with_active(3..6);
        let params = ParamBlock::constant(&[25.0, 0.0], 8);
        let mut out = AudioBuffer::new(1, 8);
        out.begin_block(8);
        osc.process(&ctx, &AudioBuffer::new(1, 8), &params, &mut out);

        let ch = out.channel(0);
        assert_eq!(ch[2], 0.0);
        assert_eq!(ch[3], 1.0);
        assert_eq!(ch[6], 0.0);
    }
}
