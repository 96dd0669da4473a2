// src/audio_buffer.rs

use std::sync::Arc;

/// Planar block buffer owned by a graph node.
///
/// Storage is sized once for the largest block and channel count; `frames`
/// and `channels` describe the block currently being rendered.
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    pub channels: usize,
    pub frames: usize,
    max_channels: usize,
    capacity: usize,
    data: Vec<f32>, // planar: ch0[0..capacity], ch1[0..capacity], ...
}

impl AudioBuffer {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            channels,
            frames: capacity,
            max_channels: channels,
            capacity,
            data: vec![0.0; channels * capacity],
        }
    }

    #[inline]
    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Set the active block length and zero it.
    #[inline]
    pub fn begin_block(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity);
        self.clear();
    }

    /// Like [`begin_block`](Self::begin_block), also choosing how many of the
    /// allocated channels are live for this block.
    #[inline]
    pub fn begin_block_with(&mut self, channels: usize, frames: usize) {
        self.channels = channels.clamp(1, self.max_channels.max(1));
        self.begin_block(frames);
    }

    #[inline]
    pub fn clear(&mut self) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.capacity;
        &self.data[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.capacity;
        &mut self.data[start..start + self.frames]
    }

    /// Mix `other` into this buffer, up- or down-mixing channels.
    ///
    /// Mono into stereo duplicates; stereo into mono averages.
    pub fn mix_from(&mut self, other: &AudioBuffer) {
        if other.channels == 0 || self.channels == 0 {
            return;
        }
        let frames = self.frames.min(other.frames);
        match (other.channels, self.channels) {
            (2, 1) => {
                let (l, r) = (other.channel(0), other.channel(1));
                let out = self.channel_mut(0);
                for i in 0..frames {
                    out[i] += 0.5 * (l[i] + r[i]);
                }
            }
            _ => {
                for ch in 0..self.channels {
                    let src = other.channel(ch.min(other.channels - 1));
                    let out = self.channel_mut(ch);
                    for i in 0..frames {
                        out[i] += src[i];
                    }
                }
            }
        }
    }

    /// True when every active sample is exactly zero.
    pub fn is_silent(&self) -> bool {
        (0..self.channels).all(|ch| self.channel(ch).iter().all(|s| *s == 0.0))
    }

    /// True when no active sample reaches `threshold` in magnitude.
    pub fn is_below(&self, threshold: f32) -> bool {
        (0..self.channels).all(|ch| self.channel(ch).iter().all(|s| s.abs() < threshold))
    }
}

/// Multichannel float sample buffer: decoded source audio or a rendered mix.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub sample_rate: f64,
    channels: Vec<Vec<f32>>,
}

pub type SharedSampleBuffer = Arc<SampleBuffer>;

impl SampleBuffer {
    /// Silent buffer of the given shape.
    pub fn new(channels: usize, frames: usize, sample_rate: f64) -> Self {
        Self {
            sample_rate,
            channels: vec![vec![0.0; frames]; channels.max(1)],
        }
    }

    /// Build from per-channel sample vectors. Shorter channels are padded.
    pub fn from_channels(mut channels: Vec<Vec<f32>>, sample_rate: f64) -> Self {
        if channels.is_empty() {
            channels.push(Vec::new());
        }
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        for ch in &mut channels {
            ch.resize(frames, 0.0);
        }
        Self {
            sample_rate,
            channels,
        }
    }

    /// Build from interleaved samples.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: f64) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (ch, sample) in frame.iter().enumerate() {
                planar[ch].push(*sample);
            }
        }
        Self::from_channels(planar, sample_rate)
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate
    }

    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        &self.channels[ch.min(self.channels.len() - 1)]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let last = self.channels.len() - 1;
        &mut self.channels[ch.min(last)]
    }

    /// Interleaved copy (L, R, L, R, ...) for encoders.
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frames();
        let channels = self.num_channels();
        let mut out = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }

    /// Largest absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .fold(0.0_f32, |max, s| max.max(s.abs()))
    }
}
