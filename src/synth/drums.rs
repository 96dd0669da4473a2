// src/synth/drums.rs
//
// Percussion synthesizer.
//
// Every hit shares one amplitude envelope on one output gain. What feeds
// that gain depends on the drum type:
//
//   kick / tom     pitch-swept oscillator (+ a little noise for toms)
//   snare          tone + filtered noise
//   clap           filtered noise re-triggered in three bursts
//   hihat / open   high-passed noise
//   crash / ride   filtered noise + two detuned metallic partials
//   rim / cowbell  two oscillators through a filter, no noise

use crate::context::AudioContext;
use crate::graph::NodeId;
use crate::nodes::{BufferSourceOptions, FilterKind, Waveform};
use crate::parameter::ParamKind;
use crate::state::{DrumKind, DrumParams};
use crate::voice::{ENVELOPE_FLOOR, Voice, velocity_to_gain};

use super::noise::noise_buffer;

/// Frequency ratio of the second cymbal partial.
const CYMBAL_RATIO: f32 = 1.4837;
/// Second cowbell partial (Hz) over a 587 Hz fundamental.
const COWBELL_RATIO: f32 = 845.0 / 587.0;
/// Rim click body below the click partial.
const RIM_RATIO: f32 = 0.28;

/// Gap between clap bursts, in seconds.
const CLAP_BURST_SPACING: f64 = 0.011;

#[derive(Debug, Default, Clone, Copy)]
pub struct DrumSynth;

/// Nodes and sources accumulated while building a hit.
struct HitBuilder {
    nodes: Vec<NodeId>,
    sources: Vec<NodeId>,
}

impl HitBuilder {
    fn oscillator(&mut self, ctx: &mut AudioContext, waveform: Waveform, freq: f32) -> NodeId {
        let osc = ctx.create_oscillator(waveform);
        ctx.set_param_now(osc, ParamKind::Frequency, freq);
        self.nodes.push(osc);
        self.sources.push(osc);
        osc
    }

    fn gain(&mut self, ctx: &mut AudioContext, value: f32) -> NodeId {
        let gain = ctx.create_gain(value);
        self.nodes.push(gain);
        gain
    }

    fn filter(&mut self, ctx: &mut AudioContext, kind: FilterKind, freq: f32, q: f32) -> NodeId {
        let filter = ctx.create_filter(kind);
        ctx.set_param_now(filter, ParamKind::Frequency, freq);
        ctx.set_param_now(filter, ParamKind::Q, q);
        self.nodes.push(filter);
        filter
    }
}

impl DrumSynth {
    pub fn new() -> Self {
        Self
    }

    /// Schedule one hit at `start` feeding `output`.
    ///
    /// Sounds with a sustain level hold it until `end` and release there.
    /// One-shots (zero sustain) release right after their decay, and every
    /// hit lasts at least attack plus decay.
    #[allow(clippy::too_many_arguments)]
    pub fn start_hit(
        &self,
        ctx: &mut AudioContext,
        output: NodeId,
        track_id: &str,
        params: &DrumParams,
        velocity: u8,
        start: f64,
        end: f64,
    ) -> Voice {
        let mut hit = HitBuilder {
            nodes: Vec::with_capacity(10),
            sources: Vec::with_capacity(3),
        };

        let amp = hit.gain(ctx, 0.0);
        let peak = velocity_to_gain(velocity, params.volume);
        let env = &params.envelope;
        let onset_end = start + env.attack.max(0.0) + env.decay.max(0.0);
        let release_at = if env.sustain > 0.0 {
            onset_end.max(end)
        } else {
            onset_end
        };
        let stop_at = match ctx.param_mut(amp, ParamKind::Gain) {
            Some(p) => {
                env.schedule_onset(p, start, 0.0, peak);
                env.schedule_release(p, release_at, ENVELOPE_FLOOR)
            }
            None => release_at + env.release_time(),
        };

        // Filter shared by the noise layer (and partials, for cymbals/bells).
        let filter = params
            .filter
            .map(|f| hit.filter(ctx, f.kind, f.frequency, f.q));
        if let Some(filter) = filter {
            ctx.connect(filter, amp);
        }
        let filtered_sink = filter.unwrap_or(amp);

        let tone_level = 1.0 - params.noise_level.clamp(0.0, 1.0) * 0.5;

        match params.kind {
            DrumKind::Kick | DrumKind::Tom | DrumKind::Snare => {
                let osc = hit.oscillator(ctx, params.waveform, params.frequency);
                if let Some(sweep) = params.pitch_sweep {
                    if let Some(p) = ctx.param_mut(osc, ParamKind::Frequency) {
                        // Independent of the amplitude envelope.
                        p.set_value_at_time(params.frequency * sweep.start_multiplier, start);
                        p.exponential_ramp_to_value_at_time(
                            params.frequency * sweep.end_multiplier,
                            start + sweep.time.max(0.001),
                        );
                    }
                }
                let level = hit.gain(ctx, tone_level);
                ctx.connect(osc, level);
                // Snare tone bypasses the noise high-pass.
                ctx.connect(level, amp);
            }
            DrumKind::Crash | DrumKind::Ride => {
                let partial_gain = hit.gain(ctx, 0.15);
                for freq in [params.frequency, params.frequency * CYMBAL_RATIO] {
                    let osc = hit.oscillator(ctx, Waveform::Square, freq);
                    ctx.connect(osc, partial_gain);
                }
                ctx.connect(partial_gain, filtered_sink);
            }
            DrumKind::Cowbell | DrumKind::Rim => {
                let (second_wave, ratio) = match params.kind {
                    DrumKind::Cowbell => (Waveform::Square, COWBELL_RATIO),
                    _ => (Waveform::Square, RIM_RATIO),
                };
                let mix = hit.gain(ctx, 0.5);
                let a = hit.oscillator(ctx, params.waveform, params.frequency);
                let b = hit.oscillator(ctx, second_wave, params.frequency * ratio);
                ctx.connect(a, mix);
                ctx.connect(b, mix);
                ctx.connect(mix, filtered_sink);
            }
            DrumKind::HiHat | DrumKind::OpenHat | DrumKind::Clap => {}
        }

        if params.noise_level > 0.0 {
            let buffer = noise_buffer(ctx, params.noise_color);
            let noise = ctx.create_buffer_source(
                buffer,
                BufferSourceOptions {
                    offset: 0.0,
                    looping: true,
                },
            );
            hit.nodes.push(noise);
            hit.sources.push(noise);

            let level = hit.gain(ctx, params.noise_level);
            if params.kind == DrumKind::Clap {
                if let Some(p) = ctx.param_mut(level, ParamKind::Gain) {
                    schedule_clap_bursts(p, params.noise_level, start);
                }
            }
            ctx.connect(noise, level);
            ctx.connect(level, filtered_sink);
        }

        ctx.connect(amp, output);
        for source in &hit.sources {
            ctx.start(*source, start);
            ctx.stop(*source, stop_at);
        }

        Voice {
            track_id: track_id.to_string(),
            nodes: hit.nodes,
            sources: hit.sources,
            output: amp,
            release: env.release_time(),
            start_time: start,
            end_time: stop_at,
        }
    }
}

/// Three sharp bursts a few milliseconds apart; the last one is left open
/// for the shared envelope to shape.
fn schedule_clap_bursts(p: &mut crate::parameter::AudioParam, level: f32, start: f64) {
    for burst in 0..3 {
        let t = start + burst as f64 * CLAP_BURST_SPACING;
        p.set_value_at_time(level, t);
        if burst < 2 {
            p.linear_ramp_to_value_at_time(level * 0.1, t + CLAP_BURST_SPACING * 0.9);
        }
    }
}
