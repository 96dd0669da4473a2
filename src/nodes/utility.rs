// Utility nodes.

use crate::audio_buffer::AudioBuffer;
use crate::node::{Node, ParamBlock, ProcessContext};

// ═══════════════════════════════════════════════════════════════════
// Destination (final output)
// ═══════════════════════════════════════════════════════════════════

/// Sums everything connected to it into the context's output channels.
pub struct DestinationNode {
    channels: usize,
}

impl DestinationNode {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
        }
    }
}

impl Node for DestinationNode {
    fn prepare(&mut self, _sample_rate: f64, _max_block: usize) {}

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        input: &AudioBuffer,
        _params: &ParamBlock,
        output: &mut AudioBuffer,
    ) -> bool {
        output.mix_from(input);
        false
    }

    fn output_channels(&self, _input_channels: usize) -> usize {
        self.channels
    }
}
