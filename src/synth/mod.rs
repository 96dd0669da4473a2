// src/synth/mod.rs
//
// Voice builders. Each turns one note into a scheduled node sub-graph on an
// `AudioContext` and hands back the `Voice` that owns it.

mod drums;
mod midi;
mod noise;

pub use drums::DrumSynth;
pub use midi::{MAX_FILTER_CUTOFF, MidiSynth, NoteOn};
pub use noise::{generate as generate_noise, noise_buffer};
