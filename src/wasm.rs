//! WebAssembly bindings via wasm-bindgen for browser integration.
//!
//! This module is only compiled when the `web` feature is enabled.
//!
//! # Usage
//!
//! Build with wasm-pack:
//! ```bash
//! wasm-pack build --target web --features web
//! ```
//!
//! # JavaScript Example
//!
//! ```javascript
//! import init, { trackweave_init, TrackweaveEngine } from './trackweave.js';
//!
//! await init();
//! trackweave_init();
//!
//! const engine = new TrackweaveEngine(sampleRate);
//! engine.load_project(JSON.stringify(project));
//! engine.register_buffer("take-1", channelData, 1, decoded.sampleRate);
//!
//! // UI thread
//! engine.play(performance.now() / 1000);
//! requestAnimationFrame(function tick() {
//!     const pos = engine.advance(performance.now() / 1000);
//!     requestAnimationFrame(tick);
//! });
//!
//! // AudioWorklet
//! engine.render(left, right);
//! ```

use wasm_bindgen::prelude::*;

use crate::audio_buffer::SampleBuffer;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::offline::RenderOptions;
use crate::track_graph::ReverbUpdate;

// ═══════════════════════════════════════════════════════════════════════════
// Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize the wasm module. Call this once before using any other functions.
/// Sets up panic hooks and console logging.
#[wasm_bindgen]
pub fn trackweave_init() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Debug).ok();
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════

/// Playback engine handle. Wall-clock arguments are seconds.
#[wasm_bindgen]
pub struct TrackweaveEngine {
    inner: Engine,
}

#[wasm_bindgen]
impl TrackweaveEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f64) -> Result<TrackweaveEngine, JsError> {
        let inner = Engine::new(EngineConfig::with_sample_rate(sample_rate))?;
        Ok(Self { inner })
    }

    /// Create an engine from a (partial) JSON config object.
    pub fn with_config(config_json: &str) -> Result<TrackweaveEngine, JsError> {
        let inner = Engine::new(EngineConfig::from_json(config_json)?)?;
        Ok(Self { inner })
    }

    // --------------------------------
    // Project
    // --------------------------------

    /// Replace the project snapshot. Returns false if the JSON is rejected.
    pub fn load_project(&mut self, json: &str) -> bool {
        match self.inner.load_project_json(json) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Error loading project: {e}");
                false
            }
        }
    }

    /// Register decoded audio as planar channel data laid end to end.
    pub fn register_buffer(&mut self, file_id: &str, data: &[f32], channels: u32, sample_rate: f64) {
        let channels = channels.max(1) as usize;
        let frames = data.len() / channels;
        let planar = (0..channels)
            .map(|ch| data[ch * frames..(ch + 1) * frames].to_vec())
            .collect();
        self.inner
            .register_buffer(file_id, SampleBuffer::from_channels(planar, sample_rate));
    }

    pub fn remove_buffer(&mut self, file_id: &str) -> bool {
        self.inner.remove_buffer(file_id)
    }

    // --------------------------------
    // Transport
    // --------------------------------

    /// Start playback. Returns the number of scheduled voices.
    pub fn play(&mut self, now: f64) -> u32 {
        self.inner.play(now).spans.len() as u32
    }

    pub fn pause(&mut self, now: f64) -> f64 {
        self.inner.pause(now)
    }

    pub fn stop(&mut self, now: f64) -> f64 {
        self.inner.stop(now)
    }

    pub fn seek(&mut self, position: f64, now: f64) {
        self.inner.seek(position, now);
    }

    pub fn set_tempo(&mut self, bpm: f64, beats_per_measure: f64, now: f64) -> bool {
        match self.inner.set_tempo(bpm, beats_per_measure, now) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Error setting tempo: {e}");
                false
            }
        }
    }

    /// Interpolated position in measures. Call once per animation frame.
    pub fn advance(&mut self, now: f64) -> f64 {
        self.inner.advance(now)
    }

    pub fn position(&self) -> f64 {
        self.inner.position()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.is_playing()
    }

    pub fn active_voices(&self) -> u32 {
        self.inner.active_voices() as u32
    }

    // --------------------------------
    // Mix
    // --------------------------------

    pub fn update_volume_mute(&mut self, track_id: &str, volume: f64, muted: bool) {
        self.inner.update_volume_mute(track_id, volume, muted);
    }

    pub fn update_pan(&mut self, track_id: &str, pan: f64) {
        self.inner.update_pan(track_id, pan);
    }

    pub fn update_solo(&mut self, track_id: &str, solo: bool) {
        self.inner.update_solo(track_id, solo);
    }

    /// Returns true if the track had to be restarted to insert the reverb.
    pub fn update_reverb(&mut self, track_id: &str, amount: f64, now: f64) -> bool {
        self.inner.update_reverb(track_id, amount, now) == ReverbUpdate::NeedsRestart
    }

    // --------------------------------
    // Rendering
    // --------------------------------

    /// Render one block into the worklet's output channels.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        if left.len() != right.len() {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }
        self.inner.render(left, right);
    }

    /// Render the project offline. Returns interleaved samples, empty if
    /// there is nothing to render.
    pub fn export(&self, tail_seconds: f64) -> Vec<f32> {
        match self.inner.export(RenderOptions { tail_seconds }) {
            Ok(out) => out.buffer.interleaved(),
            Err(e) => {
                log::error!("Error exporting: {e}");
                Vec::new()
            }
        }
    }
}
