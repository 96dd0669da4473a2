// src/nodes/filters.rs
//
// State Variable Filter (SVF) with automatable cutoff and Q.
// Lowpass, highpass, bandpass and notch come from the same topology.

use serde::{Deserialize, Serialize};

use crate::audio_buffer::AudioBuffer;
use crate::node::{Node, ParamBlock, ParamSpec, ProcessContext};
use crate::parameter::ParamKind;

use super::params;

/// Filter response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
}

const FILTER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new(ParamKind::Frequency, 350.0, 10.0, 24_000.0),
    ParamSpec::new(ParamKind::Q, 1.0, 0.0001, 1000.0),
];

const MAX_CHANNELS: usize = 2;

#[derive(Debug, Clone, Copy, Default)]
struct SvfState {
    ic1eq: f32,
    ic2eq: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Coefficients {
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
}

pub struct SvfFilter {
    kind: FilterKind,
    state: [SvfState; MAX_CHANNELS],
    coeffs: Coefficients,

    // Values the coefficients were computed for
    last_cutoff: f32,
    last_q: f32,
    sample_rate: f64,
}

impl SvfFilter {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            state: [SvfState::default(); MAX_CHANNELS],
            coeffs: Coefficients::default(),
            last_cutoff: f32::NAN,
            last_q: f32::NAN,
            sample_rate: 48_000.0,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    fn update_coefficients(&mut self, cutoff: f32, q: f32) {
        if cutoff == self.last_cutoff && q == self.last_q {
            return;
        }
        self.last_cutoff = cutoff;
        self.last_q = q;

        let nyquist_guard = (self.sample_rate as f32 * 0.49).max(20.0);
        let cutoff = cutoff.clamp(10.0, nyquist_guard);

        let g = (std::f32::consts::PI * cutoff / self.sample_rate as f32).tan();
        let k = 1.0 / q.max(0.0001);
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        self.coeffs = Coefficients {
            k,
            a1,
            a2,
            a3: g * a2,
        };
    }

    #[inline]
    fn tick(kind: FilterKind, c: &Coefficients, s: &mut SvfState, input: f32) -> f32 {
        let v3 = input - s.ic2eq;
        let v1 = c.a1 * s.ic1eq + c.a2 * v3;
        let v2 = s.ic2eq + c.a2 * s.ic1eq + c.a3 * v3;

        s.ic1eq = 2.0 * v1 - s.ic1eq;
        s.ic2eq = 2.0 * v2 - s.ic2eq;

        match kind {
            FilterKind::Lowpass => v2,
            FilterKind::Highpass => input - c.k * v1 - v2,
            FilterKind::Bandpass => v1,
            FilterKind::Notch => input - c.k * v1,
        }
    }
}

impl Node for SvfFilter {
    fn prepare(&mut self, sample_rate: f64, _max_block: usize) {
        self.sample_rate = sample_rate;
        self.last_cutoff = f32::NAN;
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        params: &ParamBlock,
        output: &mut AudioBuffer,
    ) -> bool {
        let cutoff = params.get(params::FREQUENCY);
        let q = params.get(params::Q);
        let channels = output.channels.min(MAX_CHANNELS);

        for i in 0..ctx.frames {
            self.update_coefficients(cutoff[i], q[i]);
            for ch in 0..channels {
                let x = input.channel(ch)[i];
                let y = Self::tick(self.kind, &self.coeffs, &mut self.state[ch], x);
                output.channel_mut(ch)[i] = y;
            }
        }

        false
    }

    fn params(&self) -> &'static [ParamSpec] {
        FILTER_PARAMS
    }

    fn reset(&mut self) {
        self.state = [SvfState::default(); MAX_CHANNELS];
    }
}
