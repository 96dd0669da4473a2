// src/lib.rs
//
// Library entry point for the browser host and Rust consumers.

mod audio_buffer;
mod config;
mod context;
mod engine;
mod error;
mod graph;
mod node;
mod nodes;
mod offline;
mod parameter;
mod scheduler;
mod state;
mod synth;
mod track_graph;
mod transport;
mod voice;
mod voice_registry;

#[cfg(feature = "web")]
pub mod wasm;

// Re-export key types for Rust consumers
pub use audio_buffer::{SampleBuffer, SharedSampleBuffer};
pub use config::{EngineConfig, ReverbConfig};
pub use context::{AudioContext, RenderMode};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use graph::NodeId;
pub use nodes::{FilterKind, ImpulseResponse, Waveform};
pub use offline::{OfflineRenderer, RenderOptions, RenderOutput, frames_for};
pub use parameter::{AudioParam, AutomationEvent, ParamKind};
pub use scheduler::{ScheduleReport, ScheduledSpan, SpanKind, TimelineScheduler};
pub use state::{
    AudioPool, DecodedBufferSource, DrumKind, DrumParams, LfoParams, LfoTarget, MidiNote,
    NoiseColor, Project, Region, RegionContent, SynthParams, Track, TrackId, TrackType,
};
pub use synth::{DrumSynth, MidiSynth, NoteOn};
pub use track_graph::{ReverbUpdate, TrackGraphManager, TrackNodes};
pub use transport::{PlayAnchor, PlaybackClock, PositionListener, Tempo, TransportState};
pub use voice::{Adsr, Voice, VoiceKey, midi_to_freq, velocity_to_gain};
pub use voice_registry::VoiceRegistry;
