// src/nodes/mod.rs
//
// Standard node types of the render graph.

mod buffer_source;
mod effects;
mod filters;
mod oscillators;
mod utility;

pub use buffer_source::*;
pub use effects::*;
pub use filters::*;
pub use oscillators::*;
pub use utility::*;

// ═══════════════════════════════════════════════════════════════════
// Parameter indices (per-node-type, in declaration order)
// ═══════════════════════════════════════════════════════════════════

pub mod params {
    // Oscillator
    pub const FREQUENCY: usize = 0;
    pub const DETUNE: usize = 1;

    // Filter (FREQUENCY shared with oscillators)
    pub const Q: usize = 1;

    // Gain / panner
    pub const GAIN: usize = 0;
    pub const PAN: usize = 0;
}
