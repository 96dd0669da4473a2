// Audio effect nodes.

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use crate::audio_buffer::{AudioBuffer, SampleBuffer};
use crate::config::ReverbConfig;
use crate::node::{Node, ParamBlock, ParamSpec, ProcessContext};
use crate::parameter::ParamKind;

use super::params;

// ═══════════════════════════════════════════════════════════════════
// Gain Node
// ═══════════════════════════════════════════════════════════════════

const GAIN_PARAMS: &[ParamSpec] = &[ParamSpec::new(ParamKind::Gain, 1.0, f32::MIN, f32::MAX)];

/// Linear gain, automatable per frame.
#[derive(Default)]
pub struct GainNode;

impl GainNode {
    pub fn new() -> Self {
        Self
    }
}

impl Node for GainNode {
    fn prepare(&mut self, _sample_rate: f64, _max_block: usize) {}

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        params: &ParamBlock,
        output: &mut AudioBuffer,
    ) -> bool {
        let gain = params.get(params::GAIN);
        if gain.iter().all(|g| *g == 0.0) {
            return true;
        }

        for ch in 0..output.channels {
            let src = input.channel(ch);
            let out = output.channel_mut(ch);
            for i in 0..ctx.frames {
                out[i] = src[i] * gain[i];
            }
        }

        false
    }

    fn params(&self) -> &'static [ParamSpec] {
        GAIN_PARAMS
    }
}

// ═══════════════════════════════════════════════════════════════════
// Stereo Panner (equal power)
// ═══════════════════════════════════════════════════════════════════

const PAN_PARAMS: &[ParamSpec] = &[ParamSpec::new(ParamKind::Pan, 0.0, -1.0, 1.0)];

/// Equal-power stereo panner. Mono input is placed in the field; stereo
/// input has the far channel folded towards the pan side.
#[derive(Default)]
pub struct StereoPannerNode;

impl StereoPannerNode {
    pub fn new() -> Self {
        Self
    }
}

impl Node for StereoPannerNode {
    fn prepare(&mut self, _sample_rate: f64, _max_block: usize) {}

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        params: &ParamBlock,
        output: &mut AudioBuffer,
    ) -> bool {
        let pan = params.get(params::PAN);
        let stereo_in = input.channels >= 2;

        for i in 0..ctx.frames {
            let p = pan[i];
            let (l, r) = if stereo_in {
                let (in_l, in_r) = (input.channel(0)[i], input.channel(1)[i]);
                if p <= 0.0 {
                    let x = (p + 1.0) * FRAC_PI_2;
                    (in_l + in_r * x.cos(), in_r * x.sin())
                } else {
                    let x = p * FRAC_PI_2;
                    (in_l * x.cos(), in_r + in_l * x.sin())
                }
            } else {
                let x = (p + 1.0) * 0.5 * FRAC_PI_2;
                let s = input.channel(0)[i];
                (s * x.cos(), s * x.sin())
            };
            output.channel_mut(0)[i] = l;
            output.channel_mut(1)[i] = r;
        }

        false
    }

    fn output_channels(&self, _input_channels: usize) -> usize {
        2
    }

    fn params(&self) -> &'static [ParamSpec] {
        PAN_PARAMS
    }
}

// ═══════════════════════════════════════════════════════════════════
// Convolver
// ═══════════════════════════════════════════════════════════════════

/// Sparse stereo impulse response: per-channel `(delay, gain)` taps.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    taps: [Vec<(usize, f32)>; 2],
    length: usize,
}

impl ImpulseResponse {
    /// Decaying velvet noise: one signed impulse at a random position in
    /// every `1 / density` second window, shaped by `(1 - t/len)^decay` and
    /// normalized to unit energy per channel.
    pub fn velvet(config: &ReverbConfig, sample_rate: f64) -> Self {
        let length = (config.duration * sample_rate).ceil().max(1.0) as usize;
        let period = (sample_rate / config.density.max(1.0)).max(1.0);
        let mut taps: [Vec<(usize, f32)>; 2] = [Vec::new(), Vec::new()];

        for (ch, channel_taps) in taps.iter_mut().enumerate() {
            let mut rng = fastrand::Rng::with_seed(config.seed.wrapping_add(ch as u64));
            let mut window = 0.0;
            while window < length as f64 {
                let pos = (window + rng.f64() * period) as usize;
                window += period;
                if pos >= length {
                    break;
                }
                let sign = if rng.bool() { 1.0 } else { -1.0 };
                let env = (1.0 - pos as f64 / length as f64).powf(config.decay);
                channel_taps.push((pos, (sign * env) as f32));
            }
            normalize(channel_taps);
        }

        Self { taps, length }
    }

    /// Keep the non-zero samples of a dense response.
    pub fn from_buffer(buffer: &SampleBuffer) -> Self {
        let sparse = |ch: usize| -> Vec<(usize, f32)> {
            buffer
                .channel(ch)
                .iter()
                .enumerate()
                .filter(|(_, s)| **s != 0.0)
                .map(|(i, s)| (i, *s))
                .collect()
        };
        Self {
            taps: [sparse(0), sparse(1)],
            length: buffer.frames().max(1),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.taps.iter().all(Vec::is_empty)
    }

    pub fn taps(&self, ch: usize) -> &[(usize, f32)] {
        &self.taps[ch.min(1)]
    }
}

fn normalize(taps: &mut [(usize, f32)]) {
    let energy: f32 = taps.iter().map(|(_, g)| g * g).sum();
    if energy > 0.0 {
        let scale = energy.sqrt().recip();
        for (_, g) in taps.iter_mut() {
            *g *= scale;
        }
    }
}

/// Direct-form convolution against a sparse impulse response.
pub struct ConvolverNode {
    ir: Arc<ImpulseResponse>,
    history: [Vec<f32>; 2],
    write_pos: usize,

    // Once the input has been silent longer than the response, the tail is over.
    silent_frames: usize,
    flushed: bool,
}

impl ConvolverNode {
    pub fn new(ir: Arc<ImpulseResponse>) -> Self {
        let len = ir.len();
        Self {
            ir,
            history: [vec![0.0; len], vec![0.0; len]],
            write_pos: 0,
            silent_frames: 0,
            flushed: true,
        }
    }
}

impl Node for ConvolverNode {
    fn prepare(&mut self, _sample_rate: f64, _max_block: usize) {}

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        _params: &ParamBlock,
        output: &mut AudioBuffer,
    ) -> bool {
        let len = self.ir.len();
        if input.is_silent() {
            self.silent_frames = self.silent_frames.saturating_add(ctx.frames);
        } else {
            self.silent_frames = 0;
            self.flushed = false;
        }
        if self.flushed {
            return true;
        }
        if self.silent_frames > len {
            for h in &mut self.history {
                h.fill(0.0);
            }
            self.flushed = true;
            return true;
        }

        let in_channels = input.channels;
        for i in 0..ctx.frames {
            let pos = self.write_pos;
            for ch in 0..2 {
                self.history[ch][pos] = input.channel(ch.min(in_channels - 1))[i];
            }
            for ch in 0..2 {
                let hist = &self.history[ch];
                let mut acc = 0.0;
                for &(delay, gain) in self.ir.taps(ch) {
                    let idx = if delay <= pos { pos - delay } else { pos + len - delay };
                    acc += hist[idx] * gain;
                }
                output.channel_mut(ch)[i] = acc;
            }
            self.write_pos = (pos + 1) % len;
        }

        false
    }

    fn output_channels(&self, _input_channels: usize) -> usize {
        2
    }

    fn has_tail(&self) -> bool {
        !self.flushed
    }

    fn reset(&mut self) {
        for h in &mut self.history {
            h.fill(0.0);
        }
        self.write_pos = 0;
        self.silent_frames = 0;
        self.flushed = true;
    }
}

// ═══════════════════════════════════════════════════════════════════
// Wave Shaper
// ═══════════════════════════════════════════════════════════════════

/// Soft clipper: `tanh(k x) / tanh(k)`.
pub struct WaveShaperNode {
    k: f32,
    norm: f32,
}

impl WaveShaperNode {
    /// `drive` in 0..=1 maps to a curve steepness of 1..=21.
    pub fn new(drive: f32) -> Self {
        let k = 1.0 + 20.0 * drive.clamp(0.0, 1.0);
        Self {
            k,
            norm: k.tanh().recip(),
        }
    }

    #[inline]
    pub fn shape(&self, x: f32) -> f32 {
        (self.k * x).tanh() * self.norm
    }
}

impl Node for WaveShaperNode {
    fn prepare(&mut self, _sample_rate: f64, _max_block: usize) {}

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        _params: &ParamBlock,
        output: &mut AudioBuffer,
    ) -> bool {
        for ch in 0..output.channels {
            let src = input.channel(ch);
            let out = output.channel_mut(ch);
            for i in 0..ctx.frames {
                out[i] = self.shape(src[i]);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(samples: &[f32]) -> AudioBuffer {
        let mut b = AudioBuffer::new(2, samples.len());
        b.begin_block_with(1, samples.len());
        b.channel_mut(0).copy_from_slice(samples);
        b
    }

    fn out(channels: usize, frames: usize) -> AudioBuffer {
        let mut b = AudioBuffer::new(2, frames);
        b.begin_block_with(channels, frames);
        b
    }

    #[test]
    fn test_centered_mono_pan_is_equal_power() {
        let mut pan = StereoPannerNode::new();
        let input = mono(&[1.0]);
        let mut output = out(2, 1);
        let ctx = ProcessContext::new(1, 48_000.0, 0);
        pan.process(&ctx, &input, &ParamBlock::constant(&[0.0], 1), &mut output);

        let (l, r) = (output.channel(0)[0], output.channel(1)[0]);
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hard_left_mutes_right() {
        let mut pan = StereoPannerNode::new();
        let input = mono(&[1.0]);
        let mut output = out(2, 1);
        let ctx = ProcessContext::new(1, 48_000.0, 0);
        pan.process(&ctx, &input, &ParamBlock::constant(&[-1.0], 1), &mut output);

        assert!((output.channel(0)[0] - 1.0).abs() < 1e-6);
        assert!(output.channel(1)[0].abs() < 1e-6);
    }

    #[test]
    fn test_gain_scales_input() {
        let mut gain = GainNode::new();
        let input = mono(&[0.5, -0.5]);
        let mut output = out(1, 2);
        let ctx = ProcessContext::new(2, 48_000.0, 0);
        gain.process(&ctx, &input, &ParamBlock::constant(&[0.5], 2), &mut output);
        assert_eq!(output.channel(0), &[0.25, -0.25]);
    }

    #[test]
    fn test_convolver_reproduces_taps() {
        let ir = ImpulseResponse::from_buffer(&SampleBuffer::from_channels(
            vec![vec![0.0, 0.5, 0.0, 0.25], vec![1.0, 0.0, 0.0, 0.0]],
            48_000.0,
        ));
        let mut conv = ConvolverNode::new(Arc::new(ir));
        let input = mono(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let mut output = out(2, 6);
        let ctx = ProcessContext::new(6, 48_000.0, 0);
        conv.process(&ctx, &input, &ParamBlock::default(), &mut output);

        assert_eq!(output.channel(0), &[0.0, 0.5, 0.0, 0.25, 0.0, 0.0]);
        assert_eq!(output.channel(1), &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_velvet_response_is_deterministic_and_normalized() {
        let config = ReverbConfig::default();
        let a = ImpulseResponse::velvet(&config, 8_000.0);
        let b = ImpulseResponse::velvet(&config, 8_000.0);
        assert_eq!(a, b);

        let energy: f32 = a.taps(0).iter().map(|(_, g)| g * g).sum();
        assert!((energy - 1.0).abs() < 1e-3);
        assert!(a.taps(0).iter().all(|(d, _)| *d < a.len()));
    }

    #[test]
    fn test_shaper_keeps_unit_peak() {
        let shaper = WaveShaperNode::new(0.7);
        assert!((shaper.shape(1.0) - 1.0).abs() < 1e-6);
        assert!(shaper.shape(0.1) > 0.1);
    }
}
