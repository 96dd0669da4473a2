// src/context.rs
//
// The audio clock and node factory.
//
// An `AudioContext` owns a render graph and a monotonically advancing frame
// counter. Realtime contexts are pulled block by block by the host; offline
// contexts render a fixed number of frames in one call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::audio_buffer::{SampleBuffer, SharedSampleBuffer};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{Graph, NodeId, SourceSchedule};
use crate::nodes::{
    BufferSourceNode, BufferSourceOptions, ConvolverNode, DestinationNode, FilterKind, GainNode,
    ImpulseResponse, OscillatorNode, StereoPannerNode, SvfFilter, WaveShaperNode, Waveform,
};
use crate::parameter::{AudioParam, ParamKind};

/// How the context is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Pulled by the host's audio callback.
    Realtime,
    /// Rendered as fast as possible up to a fixed length.
    Offline { length: usize },
}

pub struct AudioContext {
    graph: Graph,
    destination: NodeId,
    mode: RenderMode,
    channels: usize,
    sample_rate: f64,
    max_block: usize,

    /// Frames rendered so far.
    frame: u64,

    /// Generated buffers shared by every voice on this context.
    buffer_cache: HashMap<String, SharedSampleBuffer>,
}

impl AudioContext {
    /// Realtime context from engine settings.
    pub fn realtime(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, RenderMode::Realtime))
    }

    /// Offline context rendering exactly `length` frames.
    pub fn offline(config: &EngineConfig, length: usize) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, RenderMode::Offline { length }))
    }

    fn build(config: &EngineConfig, mode: RenderMode) -> Self {
        let mut graph = Graph::new(config.sample_rate, config.max_block_size, config.channels);
        let destination = graph.add_node(Box::new(DestinationNode::new(config.channels)));
        log::debug!(
            "audio context: {:?} at {} Hz, {} channels",
            mode,
            config.sample_rate,
            config.channels
        );
        Self {
            graph,
            destination,
            mode,
            channels: config.channels,
            sample_rate: config.sample_rate,
            max_block: config.max_block_size,
            frame: 0,
            buffer_cache: HashMap::new(),
        }
    }

    // -------------------------------
    // MARK: Clock
    // -------------------------------

    /// Current audio-clock time in seconds.
    #[inline]
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    // -------------------------------
    // MARK: Node creation
    // -------------------------------

    pub fn create_oscillator(&mut self, waveform: Waveform) -> NodeId {
        self.graph.add_node(Box::new(OscillatorNode::new(waveform)))
    }

    pub fn create_buffer_source(
        &mut self,
        buffer: SharedSampleBuffer,
        options: BufferSourceOptions,
    ) -> NodeId {
        self.graph
            .add_node(Box::new(BufferSourceNode::new(buffer, options)))
    }

    pub fn create_gain(&mut self, value: f32) -> NodeId {
        let id = self.graph.add_node(Box::new(GainNode::new()));
        self.set_param_now(id, ParamKind::Gain, value);
        id
    }

    pub fn create_filter(&mut self, kind: FilterKind) -> NodeId {
        self.graph.add_node(Box::new(SvfFilter::new(kind)))
    }

    pub fn create_stereo_panner(&mut self) -> NodeId {
        self.graph.add_node(Box::new(StereoPannerNode::new()))
    }

    pub fn create_convolver(&mut self, ir: Arc<ImpulseResponse>) -> NodeId {
        self.graph.add_node(Box::new(ConvolverNode::new(ir)))
    }

    pub fn create_wave_shaper(&mut self, drive: f32) -> NodeId {
        self.graph.add_node(Box::new(WaveShaperNode::new(drive)))
    }

    /// Return the cached buffer under `key`, generating it on first use.
    pub fn cached_buffer(
        &mut self,
        key: &str,
        make: impl FnOnce(f64) -> SampleBuffer,
    ) -> SharedSampleBuffer {
        if let Some(buffer) = self.buffer_cache.get(key) {
            return Arc::clone(buffer);
        }
        let buffer = Arc::new(make(self.sample_rate));
        self.buffer_cache.insert(key.to_string(), Arc::clone(&buffer));
        buffer
    }

    // -------------------------------
    // MARK: Wiring
    // -------------------------------

    pub fn connect(&mut self, src: NodeId, dst: NodeId) -> bool {
        self.graph.connect(src, dst)
    }

    pub fn connect_param(&mut self, src: NodeId, dst: NodeId, kind: ParamKind) -> bool {
        self.graph.connect_param(src, dst, kind)
    }

    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        self.graph.inputs(id)
    }

    /// Remove a node. The destination cannot be removed.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if id == self.destination {
            return false;
        }
        self.graph.remove_node(id)
    }

    pub fn remove_nodes(&mut self, ids: &[NodeId]) {
        let ids: Vec<NodeId> = ids
            .iter()
            .copied()
            .filter(|id| *id != self.destination)
            .collect();
        self.graph.remove_nodes(&ids);
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains(id)
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    // -------------------------------
    // MARK: Parameters and sources
    // -------------------------------

    pub fn param(&self, id: NodeId, kind: ParamKind) -> Option<&AudioParam> {
        self.graph.param(id, kind)
    }

    pub fn param_mut(&mut self, id: NodeId, kind: ParamKind) -> Option<&mut AudioParam> {
        self.graph.param_mut(id, kind)
    }

    #[cfg(test)]
    pub fn param_values(&self, id: NodeId, kind: ParamKind) -> Option<&[f32]> {
        self.graph.param_values(id, kind)
    }

    /// Drop any automation and set the value immediately.
    pub fn set_param_now(&mut self, id: NodeId, kind: ParamKind, value: f32) {
        if let Some(p) = self.graph.param_mut(id, kind) {
            p.set_value(value);
        }
    }

    pub fn start(&mut self, id: NodeId, when: f64) -> bool {
        self.graph.start(id, when)
    }

    pub fn stop(&mut self, id: NodeId, when: f64) -> bool {
        self.graph.stop(id, when)
    }

    pub fn schedule(&self, id: NodeId) -> Option<SourceSchedule> {
        self.graph.schedule(id)
    }

    // -------------------------------
    // MARK: Rendering
    // -------------------------------

    /// Render one block into planar `outputs`, advancing the clock by the
    /// length of the shortest output slice. Missing output channels are
    /// dropped; extra ones receive the last rendered channel.
    pub fn render(&mut self, outputs: &mut [&mut [f32]]) {
        let total = outputs.iter().map(|o| o.len()).min().unwrap_or(0);
        let mut done = 0;

        while done < total {
            let frames = (total - done).min(self.max_block);
            self.graph.prune_automation(self.current_time());
            self.graph.process(frames, self.frame);

            if let Some(buf) = self.graph.output(self.destination) {
                for (ch, out) in outputs.iter_mut().enumerate() {
                    let src = buf.channel(ch.min(buf.channels.saturating_sub(1)));
                    out[done..done + frames].copy_from_slice(&src[..frames]);
                }
            }

            self.frame += frames as u64;
            done += frames;
        }
    }

    /// Render the whole offline length and return the result.
    /// Realtime contexts render nothing.
    pub fn start_rendering(&mut self) -> SampleBuffer {
        self.start_rendering_with(|_| {})
    }

    /// [`start_rendering`](Self::start_rendering), calling `after_block`
    /// between blocks so finished nodes can be removed as the clock moves.
    pub fn start_rendering_with(&mut self, mut after_block: impl FnMut(&mut Self)) -> SampleBuffer {
        let RenderMode::Offline { length } = self.mode else {
            log::warn!("start_rendering called on a realtime context");
            return SampleBuffer::new(self.channels, 0, self.sample_rate);
        };

        let mut out = SampleBuffer::new(self.channels, length, self.sample_rate);
        let mut scratch: Vec<Vec<f32>> = vec![vec![0.0; self.max_block]; self.channels];
        let mut pos = 0;

        while pos < length {
            let frames = (length - pos).min(self.max_block);
            {
                let mut views: Vec<&mut [f32]> =
                    scratch.iter_mut().map(|s| &mut s[..frames]).collect();
                self.render(&mut views);
            }
            for (ch, s) in scratch.iter().enumerate() {
                out.channel_mut(ch)[pos..pos + frames].copy_from_slice(&s[..frames]);
            }
            pos += frames;
            after_block(self);
        }

        log::info!(
            "offline render finished: {} frames, peak {:.3}",
            length,
            out.peak()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline(sr: f64, frames: usize) -> AudioContext {
        AudioContext::offline(&EngineConfig::with_sample_rate(sr), frames).unwrap()
    }

    #[test]
    fn test_oscillator_renders_to_destination() {
        let mut ctx = offline(8_000.0, 800);
        let osc = ctx.create_oscillator(Waveform::Square);
        let gain = ctx.create_gain(0.5);
        ctx.connect(osc, gain);
        ctx.connect(gain, ctx.destination());
        ctx.start(osc, 0.05);
        ctx.stop(osc, 0.06);

        let out = ctx.start_rendering();
        assert_eq!(out.frames(), 800);
        assert_eq!(out.channel(0)[399], 0.0);
        assert_eq!(out.channel(0)[400], 0.5);
        assert_eq!(out.channel(1)[400], 0.5);
        assert_eq!(out.channel(0)[480], 0.0);
    }

    #[test]
    fn test_gain_ramp_is_sample_accurate() {
        let mut ctx = offline(1_000.0, 1_000);
        let osc = ctx.create_oscillator(Waveform::Square);
        ctx.set_param_now(osc, ParamKind::Frequency, 0.0);
        let gain = ctx.create_gain(0.0);
        ctx.connect(osc, gain);
        ctx.connect(gain, ctx.destination());
        ctx.start(osc, 0.0);
        let p = ctx.param_mut(gain, ParamKind::Gain).unwrap();
        p.set_value_at_time(0.0, 0.0);
        p.linear_ramp_to_value_at_time(1.0, 1.0);

        let out = ctx.start_rendering();
        assert!((out.channel(0)[500] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_clock_advances_with_render() {
        let mut ctx = AudioContext::realtime(&EngineConfig::with_sample_rate(48_000.0)).unwrap();
        let mut l = vec![0.0; 480];
        let mut r = vec![0.0; 480];
        ctx.render(&mut [&mut l[..], &mut r[..]]);
        assert!((ctx.current_time() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_destination_survives_remove() {
        let mut ctx = offline(8_000.0, 8);
        let dest = ctx.destination();
        assert!(!ctx.remove_node(dest));
        assert!(ctx.contains(dest));
    }

    #[test]
    fn test_block_hook_can_remove_finished_nodes() {
        let mut ctx = offline(1_000.0, 1_000);
        let osc = ctx.create_oscillator(Waveform::Square);
        ctx.connect(osc, ctx.destination());
        ctx.start(osc, 0.0);
        ctx.stop(osc, 0.2);

        let mut removed_at = None;
        ctx.start_rendering_with(|ctx| {
            if removed_at.is_none() && ctx.schedule(osc).is_some_and(|s| s.has_ended(ctx.current_time())) {
                ctx.remove_node(osc);
                removed_at = Some(ctx.current_time());
            }
        });
        assert!(!ctx.contains(osc));
        assert!(removed_at.is_some_and(|t| t < 0.5));
        assert_eq!(ctx.node_count(), 1);
    }

    #[test]
    fn test_cached_buffer_is_shared() {
        let mut ctx = offline(8_000.0, 8);
        let a = ctx.cached_buffer("noise", |sr| SampleBuffer::new(1, 8, sr));
        let b = ctx.cached_buffer("noise", |_| unreachable!());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
