// src/synth/midi.rs
//
// Subtractive MIDI synthesizer.
//
// One note becomes: three oscillators (primary, detuned secondary, sub an
// octave down) with per-oscillator gain → resonant filter → optional drive →
// optional tremolo → amplitude envelope gain → caller's output node.
// Everything is scheduled ahead on the context's clock; nothing runs later.

use crate::context::AudioContext;
use crate::graph::NodeId;
use crate::nodes::Waveform;
use crate::parameter::ParamKind;
use crate::state::{LfoTarget, SynthParams};
use crate::voice::{ENVELOPE_FLOOR, Voice, midi_to_freq, velocity_to_gain};

/// Top of the filter envelope range, in Hz.
pub const MAX_FILTER_CUTOFF: f32 = 20_000.0;

/// LFO pitch depth in cents at full amount.
const LFO_PITCH_CENTS: f32 = 100.0;

/// Pitch, velocity and channel of a note to synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteOn {
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MidiSynth;

impl MidiSynth {
    pub fn new() -> Self {
        Self
    }

    /// Schedule a note sounding from `start` until `end` plus release on
    /// `ctx`, feeding `output`.
    pub fn start_note(
        &self,
        ctx: &mut AudioContext,
        output: NodeId,
        track_id: &str,
        params: &SynthParams,
        note: NoteOn,
        start: f64,
        end: f64,
    ) -> Voice {
        let freq = midi_to_freq(note.pitch) as f32;
        let peak = velocity_to_gain(note.velocity, params.master_volume);
        let norm = 1.0 / (1.0 + params.osc2_level.max(0.0) + params.sub_level.max(0.0));

        let mut nodes = Vec::with_capacity(12);
        let mut sources = Vec::with_capacity(4);
        let mut detunable = Vec::with_capacity(3);

        // Oscillator bank
        let filter = ctx.create_filter(params.filter_type);
        nodes.push(filter);

        let layers = [
            (params.osc1_waveform, freq, 0.0, 1.0),
            (params.osc2_waveform, freq, params.osc2_detune, params.osc2_level),
            (Waveform::Sine, freq * 0.5, 0.0, params.sub_level),
        ];
        for (waveform, f, detune, level) in layers {
            if level <= 0.0 {
                continue;
            }
            let osc = ctx.create_oscillator(waveform);
            ctx.set_param_now(osc, ParamKind::Frequency, f);
            ctx.set_param_now(osc, ParamKind::Detune, detune);
            let gain = ctx.create_gain(level * norm);
            ctx.connect(osc, gain);
            ctx.connect(gain, filter);
            nodes.extend([osc, gain]);
            sources.push(osc);
            detunable.push(osc);
        }

        // Filter and its envelope
        ctx.set_param_now(filter, ParamKind::Q, params.filter_resonance);
        let cutoff = params.filter_cutoff.clamp(10.0, MAX_FILTER_CUTOFF);
        if let Some(p) = ctx.param_mut(filter, ParamKind::Frequency) {
            p.set_value(cutoff);
            if params.filter_env_amount > 0.0 {
                let top = cutoff + params.filter_env_amount.min(1.0) * (MAX_FILTER_CUTOFF - cutoff);
                params.filter_envelope.schedule_onset(p, start, cutoff, top);
                params.filter_envelope.schedule_release(p, end, cutoff);
            }
        }

        let mut tail = filter;

        if params.drive > 0.0 {
            let shaper = ctx.create_wave_shaper(params.drive);
            ctx.connect(tail, shaper);
            nodes.push(shaper);
            tail = shaper;
        }

        // Amplitude envelope
        let amp = ctx.create_gain(0.0);
        nodes.push(amp);
        let stop_at = match ctx.param_mut(amp, ParamKind::Gain) {
            Some(p) => {
                params.amp_envelope.schedule_onset(p, start, 0.0, peak);
                params.amp_envelope.schedule_release(p, end, ENVELOPE_FLOOR)
            }
            None => end + params.amp_envelope.release_time(),
        };

        // LFO
        if params.lfo.is_active() {
            let lfo = ctx.create_oscillator(Waveform::Sine);
            ctx.set_param_now(lfo, ParamKind::Frequency, params.lfo.rate as f32);
            let amount = params.lfo.amount.min(1.0);
            let depth = ctx.create_gain(0.0);
            ctx.connect(lfo, depth);
            nodes.extend([lfo, depth]);
            sources.push(lfo);

            match params.lfo.target {
                LfoTarget::Pitch => {
                    ctx.set_param_now(depth, ParamKind::Gain, amount * LFO_PITCH_CENTS);
                    for osc in &detunable {
                        ctx.connect_param(depth, *osc, ParamKind::Detune);
                    }
                }
                LfoTarget::Filter => {
                    ctx.set_param_now(depth, ParamKind::Gain, amount * cutoff);
                    ctx.connect_param(depth, filter, ParamKind::Frequency);
                }
                LfoTarget::Amplitude => {
                    let tremolo = ctx.create_gain(1.0 - amount * 0.5);
                    ctx.set_param_now(depth, ParamKind::Gain, amount * 0.5);
                    ctx.connect_param(depth, tremolo, ParamKind::Gain);
                    ctx.connect(tail, tremolo);
                    nodes.push(tremolo);
                    tail = tremolo;
                }
            }
        }

        ctx.connect(tail, amp);
        ctx.connect(amp, output);

        for source in &sources {
            ctx.start(*source, start);
            ctx.stop(*source, stop_at);
        }

        Voice {
            track_id: track_id.to_string(),
            nodes,
            sources,
            output: amp,
            release: params.amp_envelope.release_time(),
            start_time: start,
            end_time: stop_at,
        }
    }

    /// Release a voice early: hold its current level, ramp to silence over
    /// the patch release and stop its oscillators at the end of the ramp.
    pub fn stop_note(&self, ctx: &mut AudioContext, voice: &mut Voice, params: &SynthParams, at: f64) {
        voice.release = params.amp_envelope.release_time();
        voice.release(ctx, at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::parameter::AutomationEvent;
    use crate::voice::Adsr;

    fn offline(seconds: f64) -> AudioContext {
        let config = EngineConfig::with_sample_rate(8_000.0);
        AudioContext::offline(&config, (seconds * 8_000.0) as usize).unwrap()
    }

    fn note(pitch: u8, velocity: u8) -> NoteOn {
        NoteOn {
            pitch,
            velocity,
            channel: 0,
        }
    }

    #[test]
    fn test_voice_spans_note_plus_release() {
        let mut ctx = offline(3.0);
        let out = ctx.destination();
        let params = SynthParams::default();
        let voice = MidiSynth::new().start_note(&mut ctx, out, "t", &params, note(60, 100), 0.0, 2.0);

        assert!((voice.end_time - (2.0 + params.amp_envelope.release)).abs() < 1e-9);
        for source in &voice.sources {
            let s = ctx.schedule(*source).unwrap();
            assert_eq!(s.start, Some(0.0));
            assert_eq!(s.stop, Some(voice.end_time));
        }
    }

    #[test]
    fn test_amp_envelope_breakpoints() {
        let mut ctx = offline(3.0);
        let out = ctx.destination();
        let params = SynthParams {
            amp_envelope: Adsr::new(0.1, 0.2, 0.5, 0.3),
            master_volume: 1.0,
            ..SynthParams::default()
        };
        let voice = MidiSynth::new().start_note(&mut ctx, out, "t", &params, note(60, 127), 0.0, 1.0);

        let gain = ctx.param(voice.output, ParamKind::Gain).unwrap();
        assert!(gain.value_at(0.0).abs() < 1e-6);
        assert!((gain.value_at(0.1) - 1.0).abs() < 1e-4);
        assert!((gain.value_at(0.5) - 0.5).abs() < 1e-4);
        assert!((gain.value_at(1.3) - ENVELOPE_FLOOR).abs() < 1e-6);
    }

    #[test]
    fn test_stop_note_shortens_voice() {
        let mut ctx = offline(3.0);
        let out = ctx.destination();
        let params = SynthParams::default();
        let synth = MidiSynth::new();
        let mut voice = synth.start_note(&mut ctx, out, "t", &params, note(64, 90), 0.0, 2.0);

        synth.stop_note(&mut ctx, &mut voice, &params, 0.5);
        let expected = 0.5 + params.amp_envelope.release;
        assert!((voice.end_time - expected).abs() < 1e-9);
        let gain = ctx.param(voice.output, ParamKind::Gain).unwrap();
        assert!(matches!(
            gain.events().last(),
            Some(AutomationEvent::ExponentialRamp { .. })
        ));
        for source in &voice.sources {
            assert_eq!(ctx.schedule(*source).unwrap().stop, Some(expected));
        }
    }

    #[test]
    fn test_lfo_and_drive_add_nodes() {
        let mut ctx = offline(1.0);
        let out = ctx.destination();
        let plain = SynthParams::default();
        let rich = SynthParams {
            drive: 0.5,
            lfo: crate::state::LfoParams {
                rate: 4.0,
                amount: 0.5,
                target: LfoTarget::Amplitude,
            },
            ..SynthParams::default()
        };
        let synth = MidiSynth::new();
        let a = synth.start_note(&mut ctx, out, "t", &plain, note(60, 100), 0.0, 0.5);
        let b = synth.start_note(&mut ctx, out, "t", &rich, note(60, 100), 0.0, 0.5);
        // shaper + lfo + depth + tremolo
        assert_eq!(b.nodes.len(), a.nodes.len() + 4);
        assert_eq!(b.sources.len(), a.sources.len() + 1);
    }

    #[test]
    fn test_filter_envelope_breakpoints() {
        let mut ctx = offline(2.0);
        let out = ctx.destination();
        let params = SynthParams {
            filter_cutoff: 1_000.0,
            filter_env_amount: 0.5,
            filter_envelope: Adsr::new(0.1, 0.2, 0.5, 0.3),
            ..SynthParams::default()
        };
        let voice = MidiSynth::new().start_note(&mut ctx, out, "t", &params, note(60, 100), 0.0, 1.0);

        // The filter is the first node of every voice.
        let cutoff = ctx.param(voice.nodes[0], ParamKind::Frequency).unwrap();
        let top = 1_000.0 + 0.5 * (MAX_FILTER_CUTOFF - 1_000.0);
        let sustain = 1_000.0 + (top - 1_000.0) * 0.5;
        assert!((cutoff.value_at(0.0) - 1_000.0).abs() < 1e-2);
        assert!((cutoff.value_at(0.1) - top).abs() < 1e-1);
        assert!((cutoff.value_at(0.6) - sustain).abs() < 1e-1);
        assert!((cutoff.value_at(1.3) - 1_000.0).abs() < 1e-1);
    }

    /// Render `frames` in 16-frame blocks so the last block is known.
    fn render_until(ctx: &mut AudioContext, frames: usize) {
        let mut l = vec![0.0; frames];
        let mut r = vec![0.0; frames];
        ctx.render(&mut [&mut l[..], &mut r[..]]);
    }

    fn small_blocks() -> AudioContext {
        let mut config = EngineConfig::with_sample_rate(8_000.0);
        config.max_block_size = 16;
        AudioContext::offline(&config, 8_000).unwrap()
    }

    #[test]
    fn test_pitch_lfo_modulates_detune() {
        let mut ctx = small_blocks();
        let out = ctx.destination();
        let params = SynthParams {
            osc2_level: 0.0,
            sub_level: 0.0,
            lfo: crate::state::LfoParams {
                rate: 2.0,
                amount: 0.5,
                target: LfoTarget::Pitch,
            },
            ..SynthParams::default()
        };
        let voice = MidiSynth::new().start_note(&mut ctx, out, "t", &params, note(69, 100), 0.0, 1.0);
        let osc = voice.sources[0];

        // LFO crest at 0.125 s (frame 1000); last block is frames 992..1008.
        render_until(&mut ctx, 1_008);
        let crest = ctx.param_values(osc, ParamKind::Detune).unwrap();
        assert!(crest.iter().all(|c| *c > 49.0 && *c <= 50.0));

        // Trough at 0.375 s (frame 3000).
        render_until(&mut ctx, 2_000);
        let trough = ctx.param_values(osc, ParamKind::Detune).unwrap();
        assert!(trough.iter().all(|c| *c < -49.0 && *c >= -50.0));

        // The base detune itself carries no automation.
        assert!(!ctx.param(osc, ParamKind::Detune).unwrap().has_automation());
    }

    #[test]
    fn test_filter_lfo_modulates_cutoff() {
        let mut ctx = small_blocks();
        let out = ctx.destination();
        let params = SynthParams {
            filter_cutoff: 1_000.0,
            filter_env_amount: 0.0,
            lfo: crate::state::LfoParams {
                rate: 2.0,
                amount: 0.5,
                target: LfoTarget::Filter,
            },
            ..SynthParams::default()
        };
        let voice = MidiSynth::new().start_note(&mut ctx, out, "t", &params, note(60, 100), 0.0, 1.0);
        let filter = voice.nodes[0];

        render_until(&mut ctx, 1_008);
        let crest = ctx.param_values(filter, ParamKind::Frequency).unwrap();
        assert!(crest.iter().all(|f| *f > 1_490.0 && *f <= 1_500.0));

        render_until(&mut ctx, 2_000);
        let trough = ctx.param_values(filter, ParamKind::Frequency).unwrap();
        assert!(trough.iter().all(|f| *f < 510.0 && *f >= 500.0));
    }

    #[test]
    fn test_rendered_note_is_audible_then_silent() {
        let mut ctx = offline(1.0);
        let out = ctx.destination();
        let params = SynthParams {
            amp_envelope: Adsr::new(0.01, 0.05, 0.8, 0.05),
            ..SynthParams::default()
        };
        MidiSynth::new().start_note(&mut ctx, out, "t", &params, note(57, 110), 0.1, 0.4);
        let buffer = ctx.start_rendering();

        let window = |a: f64, b: f64| {
            let ch = buffer.channel(0);
            ch[(a * 8_000.0) as usize..(b * 8_000.0) as usize]
                .iter()
                .fold(0.0_f32, |m, s| m.max(s.abs()))
        };
        assert_eq!(window(0.0, 0.1), 0.0);
        assert!(window(0.2, 0.3) > 0.05);
        assert_eq!(window(0.6, 1.0), 0.0);
    }
}
