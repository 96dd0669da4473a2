// src/state/mod.rs
//
// Host-owned project state as the engine sees it.
//
// These structures are plain data: serializable, cheap to snapshot, and
// never touched by the render graph directly.

mod audio_pool;
mod instrument;
mod project;

pub use audio_pool::*;
pub use instrument::*;
pub use project::*;
