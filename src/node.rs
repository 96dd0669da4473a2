// src/node.rs

use std::ops::Range;

use crate::audio_buffer::AudioBuffer;
use crate::parameter::ParamKind;

/// Context passed to nodes during processing.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    /// Number of frames in this block
    pub frames: usize,

    pub sample_rate: f64,

    /// Audio-clock frame of the first sample in the block
    pub sample_pos: u64,

    /// Audio-clock time of the first sample in the block, in seconds
    pub time: f64,

    /// Frames in this block during which a scheduled source is running.
    /// Always the full block for non-source nodes.
    pub active: Range<usize>,
}

impl ProcessContext {
    pub fn new(frames: usize, sample_rate: f64, sample_pos: u64) -> Self {
        Self {
            frames,
            sample_rate,
            sample_pos,
            time: sample_pos as f64 / sample_rate,
            active: 0..frames,
        }
    }

    pub fn with_active(&self, active: Range<usize>) -> Self {
        Self {
            active,
            ..self.clone()
        }
    }
}

/// Declaration of one automatable parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub default: f32,
    pub min: f32,
    pub max: f32,
}

impl ParamSpec {
    pub const fn new(kind: ParamKind, default: f32, min: f32, max: f32) -> Self {
        Self {
            kind,
            default,
            min,
            max,
        }
    }
}

/// Per-frame parameter values for one block, in declaration order.
#[derive(Debug, Default)]
pub struct ParamBlock {
    values: Vec<Vec<f32>>,
    frames: usize,
}

impl ParamBlock {
    pub fn new(count: usize, max_block: usize) -> Self {
        Self {
            values: vec![vec![0.0; max_block]; count],
            frames: max_block,
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> &[f32] {
        &self.values[index][..self.frames]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, index: usize) -> &mut [f32] {
        let frames = self.frames;
        &mut self.values[index][..frames]
    }

    #[inline]
    pub(crate) fn set_frames(&mut self, frames: usize) {
        self.frames = frames;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Test helper: a block where every parameter is held constant.
    #[cfg(test)]
    pub fn constant(values: &[f32], frames: usize) -> Self {
        Self {
            values: values.iter().map(|v| vec![*v; frames]).collect(),
            frames,
        }
    }
}

/// Core DSP node trait.
///
/// Nodes:
/// - do NOT know about scheduling
/// - do NOT allocate while processing
/// - ONLY process audio for the given context
pub trait Node: Send {
    /// Called once when the node enters a graph.
    fn prepare(&mut self, sample_rate: f64, max_block: usize);

    /// Process one block.
    ///
    /// `input` is the sum of every connected upstream node, already up- or
    /// down-mixed. `params` holds per-frame values for [`Node::params`].
    /// `output` is zeroed and sized by [`Node::output_channels`].
    ///
    /// Returns `true` if the output is silent.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        params: &ParamBlock,
        output: &mut AudioBuffer,
    ) -> bool;

    /// Output channel count given the live input channel count.
    fn output_channels(&self, input_channels: usize) -> usize {
        input_channels
    }

    /// Automatable parameters this node reads.
    fn params(&self) -> &'static [ParamSpec] {
        &[]
    }

    /// Scheduled sources only produce output between start and stop.
    fn is_source(&self) -> bool {
        false
    }

    /// True while the node still produces output from past input, so the
    /// graph must keep processing it after its inputs fall silent.
    fn has_tail(&self) -> bool {
        false
    }

    /// Reset DSP state. Called when the graph puts the node to sleep.
    fn reset(&mut self) {}
}
