// src/synth/noise.rs
//
// Looped noise buffers for percussion, one per color and context.

use crate::audio_buffer::{SampleBuffer, SharedSampleBuffer};
use crate::context::AudioContext;
use crate::state::NoiseColor;

/// Length of a noise loop in seconds.
const NOISE_SECONDS: f64 = 1.0;

const NOISE_SEED: u64 = 0x0D15_EA5E;

const NOISE_PEAK: f32 = 0.9;

/// Shared noise buffer of `color` for `ctx`, generated on first use.
pub fn noise_buffer(ctx: &mut AudioContext, color: NoiseColor) -> SharedSampleBuffer {
    let key = match color {
        NoiseColor::White => "noise:white",
        NoiseColor::Pink => "noise:pink",
        NoiseColor::Brown => "noise:brown",
    };
    ctx.cached_buffer(key, |sample_rate| generate(color, sample_rate))
}

/// Generate a mono noise loop. Deterministic for a given color and rate.
pub fn generate(color: NoiseColor, sample_rate: f64) -> SampleBuffer {
    let frames = (NOISE_SECONDS * sample_rate).ceil() as usize;
    let mut rng = fastrand::Rng::with_seed(NOISE_SEED ^ color as u64);
    let mut white = move || rng.f32() * 2.0 - 1.0;

    let mut samples: Vec<f32> = match color {
        NoiseColor::White => (0..frames).map(|_| white()).collect(),

        // Paul Kellet's economy pink filter.
        NoiseColor::Pink => {
            let (mut b0, mut b1, mut b2) = (0.0_f32, 0.0_f32, 0.0_f32);
            (0..frames)
                .map(|_| {
                    let w = white();
                    b0 = 0.99765 * b0 + w * 0.0990460;
                    b1 = 0.96300 * b1 + w * 0.2965164;
                    b2 = 0.57000 * b2 + w * 1.0526913;
                    (b0 + b1 + b2 + w * 0.1848) * 0.25
                })
                .collect()
        }

        // Leaky integrator.
        NoiseColor::Brown => {
            let mut last = 0.0_f32;
            (0..frames)
                .map(|_| {
                    last = (last + 0.02 * white()) / 1.02;
                    last * 3.5
                })
                .collect()
        }
    };

    // Colored noise wanders; bring every color to the same peak.
    let peak = samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        let scale = NOISE_PEAK / peak;
        samples.iter_mut().for_each(|s| *s *= scale);
    }

    SampleBuffer::from_channels(vec![samples], sample_rate)
}
