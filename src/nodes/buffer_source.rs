// src/nodes/buffer_source.rs
//
// One-shot playback of a decoded sample buffer.
//
// The source reads from a shared buffer starting at an offset, resampling
// with linear interpolation when the buffer rate differs from the context
// rate. Duration is expressed by the stop time on the graph schedule.

use crate::audio_buffer::{AudioBuffer, SharedSampleBuffer};
use crate::node::{Node, ParamBlock, ProcessContext};

/// Playback settings fixed at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BufferSourceOptions {
    /// Seconds into the buffer where playback begins.
    pub offset: f64,
    /// Wrap to the start at the end of the buffer.
    pub looping: bool,
}

pub struct BufferSourceNode {
    buffer: SharedSampleBuffer,
    options: BufferSourceOptions,

    /// Read position in buffer frames
    position: f64,
    /// Buffer frames advanced per output frame
    step: f64,
    finished: bool,
}

impl BufferSourceNode {
    pub fn new(buffer: SharedSampleBuffer, options: BufferSourceOptions) -> Self {
        let position = options.offset.max(0.0) * buffer.sample_rate;
        Self {
            buffer,
            options,
            position,
            step: 1.0,
            finished: false,
        }
    }

    #[inline]
    fn read(&self, ch: usize, pos: f64) -> f32 {
        let data = self.buffer.channel(ch);
        let len = data.len();
        let i = pos.floor() as usize;
        let frac = (pos - pos.floor()) as f32;
        let a = data.get(i).copied().unwrap_or(0.0);
        let next = if self.options.looping && i + 1 >= len { 0 } else { i + 1 };
        let b = data.get(next).copied().unwrap_or(0.0);
        a + (b - a) * frac
    }
}

impl Node for BufferSourceNode {
    fn prepare(&mut self, sample_rate: f64, _max_block: usize) {
        self.step = self.buffer.sample_rate / sample_rate;
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        _input: &AudioBuffer,
        _params: &ParamBlock,
        output: &mut AudioBuffer,
    ) -> bool {
        let len = self.buffer.frames() as f64;
        if self.finished || len == 0.0 {
            return true;
        }

        let channels = output.channels;
        for i in ctx.active.clone() {
            if self.position >= len {
                if self.options.looping {
                    self.position %= len;
                } else {
                    self.finished = true;
                    break;
                }
            }
            for ch in 0..channels {
                let v = self.read(ch, self.position);
                output.channel_mut(ch)[i] = v;
            }
            self.position += self.step;
        }

        false
    }

    fn output_channels(&self, _input_channels: usize) -> usize {
        self.buffer.num_channels().min(2)
    }

    fn is_source(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audio_buffer::SampleBuffer;

    fn ramp(frames: usize, sr: f64) -> SharedSampleBuffer {
        let data: Vec<f32> = (0..frames).map(|i| i as f32).collect();
        Arc::new(SampleBuffer::from_channels(vec![data], sr))
    }

    fn render(node: &mut BufferSourceNode, frames: usize, sr: f64) -> Vec<f32> {
        node.prepare(sr, frames);
        let ctx = ProcessContext::new(frames, sr, 0);
        let mut out = AudioBuffer::new(2, frames);
        out.begin_block_with(node.output_channels(1), frames);
        node.process(&ctx, &AudioBuffer::new(1, frames), &ParamBlock::default(), &mut out);
        out.channel(0).to_vec()
    }

    #[test]
    fn test_offset_skips_into_buffer() {
        let mut node = BufferSourceNode::new(
            ramp(10, 10.0),
            BufferSourceOptions {
                offset: 0.5,
                looping: false,
            },
        );
        let out = render(&mut node, 4, 10.0);
        assert_eq!(out, vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_stops_at_buffer_end() {
        let mut node = BufferSourceNode::new(ramp(3, 10.0), BufferSourceOptions::default());
        let out = render(&mut node, 5, 10.0);
        assert_eq!(out, vec![0.0, 1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_resamples_with_interpolation() {
        // Buffer at half the context rate: every output frame advances half a frame.
        let mut node = BufferSourceNode::new(ramp(4, 5.0), BufferSourceOptions::default());
        let out = render(&mut node, 4, 10.0);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_looping_wraps() {
        let mut node = BufferSourceNode::new(
            ramp(3, 10.0),
            BufferSourceOptions {
                offset: 0.0,
                looping: true,
            },
        );
        let out = render(&mut node, 5, 10.0);
        assert_eq!(out, vec![0.0, 1.0, 2.0, 0.0, 1.0]);
    }
}
