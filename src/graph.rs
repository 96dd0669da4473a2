//! Audio processing graph with topological sorting and scheduled sources.
//!
//! The graph owns nodes, their buffers and their automation, and processes
//! them in dependency order. Node handles are generational so a handle to a
//! removed node can never address whatever reuses its slot.

use std::ops::Range;

use crate::{
    audio_buffer::AudioBuffer,
    node::{Node, ParamBlock, ProcessContext},
    parameter::{AudioParam, ParamKind},
};

/// Handle to a node in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Start/stop times of a scheduled source, in audio-clock seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceSchedule {
    pub start: Option<f64>,
    pub stop: Option<f64>,
}

impl SourceSchedule {
    /// Frames of the block `[sample_pos, sample_pos + frames)` during which
    /// the source runs.
    pub fn active_range(&self, sample_pos: u64, frames: usize, sample_rate: f64) -> Range<usize> {
        let Some(start) = self.start else {
            return 0..0;
        };
        let block_start = sample_pos as i64;
        let to_frame = |t: f64| (t * sample_rate - 1e-6).ceil() as i64;

        let start_frame = to_frame(start);
        let stop_frame = self.stop.map(to_frame).unwrap_or(i64::MAX);

        let a = (start_frame.saturating_sub(block_start)).clamp(0, frames as i64) as usize;
        let b = (stop_frame.saturating_sub(block_start)).clamp(0, frames as i64) as usize;
        a..b.max(a)
    }

    /// True once the stop time has passed.
    pub fn has_ended(&self, time: f64) -> bool {
        self.stop.is_some_and(|s| s <= time)
    }
}

/// Output level below which a node with silent inputs may go to sleep
/// (about -120 dBFS).
const SLEEP_THRESHOLD: f32 = 1e-6;

struct ParamSlot {
    kind: ParamKind,
    param: AudioParam,
    modulators: Vec<NodeId>,
}

/// One node in the graph
struct GraphNode {
    node: Box<dyn Node>,
    inputs: Vec<NodeId>,
    params: Vec<ParamSlot>,
    values: ParamBlock,
    input: AudioBuffer,
    output: AudioBuffer,
    schedule: Option<SourceSchedule>,
    silent: bool,

    /// Last output stayed under [`SLEEP_THRESHOLD`].
    quiet: bool,
    /// Skipped until an input wakes it; DSP state was reset on entry.
    asleep: bool,
}

impl GraphNode {
    fn param_index(&self, kind: ParamKind) -> Option<usize> {
        self.params.iter().position(|p| p.kind == kind)
    }
}

struct Slot {
    generation: u32,
    node: Option<GraphNode>,
}

/// The audio graph
pub struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,

    pub max_block: usize,
    pub max_channels: usize,
    pub sample_rate: f64,

    /// Topologically sorted evaluation order
    eval_order: Vec<usize>,
    topology_dirty: bool,
}

impl Graph {
    pub fn new(sample_rate: f64, max_block: usize, max_channels: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_block,
            max_channels: max_channels.max(2),
            sample_rate,
            eval_order: Vec::new(),
            topology_dirty: false,
        }
    }

    // -------------------------------
    // MARK: Topology
    // -------------------------------

    /// Add a node to the graph.
    pub fn add_node(&mut self, mut node: Box<dyn Node>) -> NodeId {
        node.prepare(self.sample_rate, self.max_block);

        let params: Vec<ParamSlot> = node
            .params()
            .iter()
            .map(|spec| ParamSlot {
                kind: spec.kind,
                param: AudioParam::new(spec.default, spec.min, spec.max),
                modulators: Vec::new(),
            })
            .collect();

        let schedule = node.is_source().then(SourceSchedule::default);
        let entry = GraphNode {
            values: ParamBlock::new(params.len(), self.max_block),
            input: AudioBuffer::new(self.max_channels, self.max_block),
            output: AudioBuffer::new(self.max_channels, self.max_block),
            node,
            inputs: Vec::new(),
            params,
            schedule,
            silent: true,
            quiet: true,
            asleep: false,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };

        self.live += 1;
        self.topology_dirty = true;
        NodeId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Remove a node and every edge touching it. Stale handles are ignored.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        self.remove_nodes(&[id]) == 1
    }

    /// Remove a batch of nodes with a single pass over the remaining edges.
    /// Returns how many handles were live.
    pub fn remove_nodes(&mut self, ids: &[NodeId]) -> usize {
        let mut removed = Vec::with_capacity(ids.len());
        for &id in ids {
            if !self.contains(id) {
                continue;
            }
            let slot = &mut self.slots[id.index as usize];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            self.live -= 1;
            removed.push(id);
        }
        if removed.is_empty() {
            return 0;
        }

        for node in self.slots.iter_mut().filter_map(|s| s.node.as_mut()) {
            node.inputs.retain(|i| !removed.contains(i));
            for p in &mut node.params {
                p.modulators.retain(|m| !removed.contains(m));
            }
        }
        self.topology_dirty = true;
        removed.len()
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|s| s.generation == id.generation && s.node.is_some())
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.live
    }

    fn get(&self, id: NodeId) -> Option<&GraphNode> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// Add an edge: src -> dst
    pub fn connect(&mut self, src: NodeId, dst: NodeId) -> bool {
        if src == dst || !self.contains(src) {
            return false;
        }
        let Some(node) = self.get_mut(dst) else {
            return false;
        };
        if !node.inputs.contains(&src) {
            node.inputs.push(src);
        }
        self.topology_dirty = true;
        true
    }

    /// Add a modulation edge: src output is added to a parameter of dst.
    pub fn connect_param(&mut self, src: NodeId, dst: NodeId, kind: ParamKind) -> bool {
        if src == dst || !self.contains(src) {
            return false;
        }
        let Some(node) = self.get_mut(dst) else {
            return false;
        };
        let Some(p) = node.param_index(kind) else {
            log::warn!("connect_param: node has no {kind:?} parameter");
            return false;
        };
        if !node.params[p].modulators.contains(&src) {
            node.params[p].modulators.push(src);
        }
        self.topology_dirty = true;
        true
    }

    /// Input handles of a node, for inspection.
    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.inputs.as_slice()).unwrap_or(&[])
    }

    // -------------------------------
    // MARK: Parameters and sources
    // -------------------------------

    pub fn param(&self, id: NodeId, kind: ParamKind) -> Option<&AudioParam> {
        let node = self.get(id)?;
        let p = node.param_index(kind)?;
        Some(&node.params[p].param)
    }

    pub fn param_mut(&mut self, id: NodeId, kind: ParamKind) -> Option<&mut AudioParam> {
        let node = self.get_mut(id)?;
        let p = node.param_index(kind)?;
        Some(&mut node.params[p].param)
    }

    pub fn schedule(&self, id: NodeId) -> Option<SourceSchedule> {
        self.get(id)?.schedule
    }

    /// Schedule a source to start. A source starts at most once.
    pub fn start(&mut self, id: NodeId, when: f64) -> bool {
        let Some(schedule) = self.get_mut(id).and_then(|n| n.schedule.as_mut()) else {
            return false;
        };
        if schedule.start.is_some() {
            log::debug!("source already started, ignoring second start");
            return false;
        }
        schedule.start = Some(when.max(0.0));
        true
    }

    /// Schedule a source to stop. Repeated stops keep the earliest time; a
    /// stop before start is accepted and silences the source for good.
    pub fn stop(&mut self, id: NodeId, when: f64) -> bool {
        let Some(schedule) = self.get_mut(id).and_then(|n| n.schedule.as_mut()) else {
            return false;
        };
        let when = when.max(0.0);
        schedule.stop = Some(schedule.stop.map_or(when, |s| s.min(when)));
        true
    }

    /// Fold finished automation on every parameter.
    pub fn prune_automation(&mut self, now: f64) {
        for node in self.slots.iter_mut().filter_map(|s| s.node.as_mut()) {
            for p in &mut node.params {
                p.param.prune(now);
            }
        }
    }

    /// Per-frame values a parameter took in the last processed block,
    /// modulation included.
    #[cfg(test)]
    pub fn param_values(&self, id: NodeId, kind: ParamKind) -> Option<&[f32]> {
        let node = self.get(id)?;
        let p = node.param_index(kind)?;
        Some(node.values.get(p))
    }

    /// Output of a node from the last processed block.
    pub fn output(&self, id: NodeId) -> Option<&AudioBuffer> {
        self.get(id).map(|n| &n.output)
    }

    // -------------------------------
    // MARK: Processing
    // -------------------------------

    /// Compute topological sort of the graph (Kahn's algorithm).
    /// Parameter modulators count as dependencies.
    fn topological_sort(&self) -> Vec<usize> {
        let n = self.slots.len();
        let mut in_degree = vec![0usize; n];
        let mut out_edges: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (idx, slot) in self.slots.iter().enumerate() {
            let Some(node) = &slot.node else { continue };
            let deps = node
                .inputs
                .iter()
                .chain(node.params.iter().flat_map(|p| p.modulators.iter()));
            for dep in deps {
                in_degree[idx] += 1;
                out_edges[dep.index as usize].push(idx);
            }
        }

        let mut queue: Vec<usize> = (0..n)
            .filter(|&i| self.slots[i].node.is_some() && in_degree[i] == 0)
            .collect();
        let mut result = Vec::with_capacity(self.live);

        while let Some(idx) = queue.pop() {
            result.push(idx);
            for &dependent in &out_edges[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if result.len() < self.live {
            log::error!("graph contains a cycle; nodes in it render silence");
        }
        result
    }

    /// Process one block of `frames` starting at audio-clock frame `sample_pos`.
    pub fn process(&mut self, frames: usize, sample_pos: u64) {
        let frames = frames.min(self.max_block);
        if self.topology_dirty {
            self.eval_order = self.topological_sort();
            self.topology_dirty = false;
        }
        let ctx = ProcessContext::new(frames, self.sample_rate, sample_pos);

        for i in 0..self.eval_order.len() {
            let idx = self.eval_order[i];
            self.process_node(idx, &ctx);
        }
    }

    fn process_node(&mut self, idx: usize, ctx: &ProcessContext) {
        // Take the node out so upstream buffers can be read while it is written.
        let Some(mut gn) = self.slots[idx].node.take() else {
            return;
        };
        let frames = ctx.frames;

        let active = match gn.schedule {
            Some(schedule) => schedule.active_range(ctx.sample_pos, frames, self.sample_rate),
            None => 0..frames,
        };

        if gn.schedule.is_some() && active.is_empty() {
            gn.output.begin_block_with(1, frames);
            gn.silent = true;
            self.slots[idx].node = Some(gn);
            return;
        }

        // A processor fed only silence that has already rung out produces
        // nothing until an input wakes it, so it is skipped.
        let inputs_silent = gn
            .inputs
            .iter()
            .all(|id| self.get(*id).is_none_or(|up| up.silent));
        if gn.schedule.is_none()
            && !gn.inputs.is_empty()
            && inputs_silent
            && gn.quiet
            && !gn.node.has_tail()
        {
            if !gn.asleep {
                gn.node.reset();
                gn.asleep = true;
            }
            gn.output.begin_block_with(1, frames);
            gn.silent = true;
            self.slots[idx].node = Some(gn);
            return;
        }
        gn.asleep = false;

        // Sum audio inputs.
        let in_channels = gn
            .inputs
            .iter()
            .filter_map(|id| self.get(*id))
            .map(|n| n.output.channels)
            .max()
            .unwrap_or(1);
        gn.input.begin_block_with(in_channels, frames);
        for id in &gn.inputs {
            if let Some(up) = self.get(*id) {
                if !up.silent {
                    gn.input.mix_from(&up.output);
                }
            }
        }

        // Render automation, then add modulation.
        gn.values.set_frames(frames);
        for (p, slot) in gn.params.iter().enumerate() {
            let values = gn.values.get_mut(p);
            slot.param.render(ctx.time, self.sample_rate, values);
            if slot.modulators.is_empty() {
                continue;
            }
            for id in &slot.modulators {
                if let Some(m) = self.get(*id) {
                    if m.silent {
                        continue;
                    }
                    let src = m.output.channel(0);
                    for (v, s) in values.iter_mut().zip(src) {
                        *v += *s;
                    }
                }
            }
            for v in values.iter_mut() {
                *v = slot.param.clamp(*v);
            }
        }

        let out_channels = gn.node.output_channels(gn.input.channels);
        gn.output.begin_block_with(out_channels, frames);

        let node_ctx = if gn.schedule.is_some() {
            ctx.with_active(active)
        } else {
            ctx.clone()
        };
        let silent = gn
            .node
            .process(&node_ctx, &gn.input, &gn.values, &mut gn.output);
        gn.silent = silent || (inputs_silent && !gn.inputs.is_empty() && gn.output.is_silent());
        gn.quiet = gn.silent || gn.output.is_below(SLEEP_THRESHOLD);

        self.slots[idx].node = Some(gn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ParamSpec;

    /// Emits a constant on channel 0.
    struct Dc(f32);

    impl Node for Dc {
        fn prepare(&mut self, _: f64, _: usize) {}
        fn process(
            &mut self,
            ctx: &ProcessContext,
            _: &AudioBuffer,
            _: &ParamBlock,
            out: &mut AudioBuffer,
        ) -> bool {
            out.channel_mut(0)[ctx.active.clone()].fill(self.0);
            false
        }
        fn output_channels(&self, _: usize) -> usize {
            1
        }
        fn is_source(&self) -> bool {
            true
        }
    }

    /// Multiplies its input by a gain parameter.
    struct Scale;

    const SCALE_PARAMS: &[ParamSpec] = &[ParamSpec::new(ParamKind::Gain, 1.0, -10.0, 10.0)];

    impl Node for Scale {
        fn prepare(&mut self, _: f64, _: usize) {}
        fn process(
            &mut self,
            _: &ProcessContext,
            input: &AudioBuffer,
            params: &ParamBlock,
            out: &mut AudioBuffer,
        ) -> bool {
            let g = params.get(0);
            for ch in 0..out.channels {
                let src = input.channel(ch);
                for (i, o) in out.channel_mut(ch).iter_mut().enumerate() {
                    *o = src[i] * g[i];
                }
            }
            false
        }
        fn params(&self) -> &'static [ParamSpec] {
            SCALE_PARAMS
        }
    }

    #[test]
    fn test_source_starts_on_exact_frame() {
        let mut g = Graph::new(100.0, 16, 2);
        let dc = g.add_node(Box::new(Dc(1.0)));
        g.start(dc, 0.05);
        g.stop(dc, 0.10);
        g.process(16, 0);

        let out = g.output(dc).unwrap().channel(0);
        assert_eq!(out[4], 0.0);
        assert_eq!(out[5], 1.0);
        assert_eq!(out[9], 1.0);
        assert_eq!(out[10], 0.0);
    }

    #[test]
    fn test_chain_processes_in_dependency_order() {
        let mut g = Graph::new(100.0, 8, 2);
        let scale = g.add_node(Box::new(Scale));
        let dc = g.add_node(Box::new(Dc(0.5)));
        g.connect(dc, scale);
        g.start(dc, 0.0);
        g.param_mut(scale, ParamKind::Gain).unwrap().set_value(4.0);
        g.process(8, 0);

        assert_eq!(g.output(scale).unwrap().channel(0)[3], 2.0);
    }

    #[test]
    fn test_param_modulation_is_added_and_clamped() {
        let mut g = Graph::new(100.0, 8, 2);
        let lfo = g.add_node(Box::new(Dc(20.0)));
        let src = g.add_node(Box::new(Dc(1.0)));
        let scale = g.add_node(Box::new(Scale));
        g.connect(src, scale);
        g.connect_param(lfo, scale, ParamKind::Gain);
        g.start(lfo, 0.0);
        g.start(src, 0.0);
        g.process(8, 0);

        // 1.0 base + 20.0 modulation, clamped at 10.0
        assert_eq!(g.output(scale).unwrap().channel(0)[0], 10.0);
    }

    #[test]
    fn test_removed_handle_is_stale() {
        let mut g = Graph::new(100.0, 8, 2);
        let a = g.add_node(Box::new(Dc(1.0)));
        let b = g.add_node(Box::new(Scale));
        g.connect(a, b);
        assert!(g.remove_node(a));
        assert!(!g.remove_node(a));
        assert!(g.inputs(b).is_empty());

        let c = g.add_node(Box::new(Dc(1.0)));
        assert_ne!(a, c);
        assert!(!g.contains(a));
        assert!(g.contains(c));
        assert!(!g.start(a, 0.0));
    }

    #[test]
    fn test_stop_is_idempotent_and_keeps_earliest() {
        let mut g = Graph::new(100.0, 8, 2);
        let dc = g.add_node(Box::new(Dc(1.0)));
        assert!(g.stop(dc, 2.0));
        assert!(g.stop(dc, 1.0));
        assert!(g.stop(dc, 3.0));
        assert_eq!(g.schedule(dc).unwrap().stop, Some(1.0));
    }

    /// Pass-through that counts how often it is processed.
    struct Counting(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl Node for Counting {
        fn prepare(&mut self, _: f64, _: usize) {}
        fn process(
            &mut self,
            _: &ProcessContext,
            input: &AudioBuffer,
            _: &ParamBlock,
            out: &mut AudioBuffer,
        ) -> bool {
            self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            for ch in 0..out.channels {
                out.channel_mut(ch).copy_from_slice(input.channel(ch));
            }
            false
        }
    }

    #[test]
    fn test_processors_behind_idle_sources_sleep() {
        use std::sync::{Arc, atomic::AtomicUsize, atomic::Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let mut g = Graph::new(100.0, 10, 2);
        let dc = g.add_node(Box::new(Dc(1.0)));
        let counting = g.add_node(Box::new(Counting(Arc::clone(&calls))));
        g.connect(dc, counting);
        g.start(dc, 0.2);
        g.stop(dc, 0.3);

        // Pending source: nothing downstream runs.
        g.process(10, 0);
        g.process(10, 10);
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        g.process(10, 20);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(g.output(counting).unwrap().channel(0)[0], 1.0);

        // First silent block flushes the last output, then it sleeps.
        g.process(10, 30);
        g.process(10, 40);
        g.process(10, 50);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert!(g.output(counting).unwrap().is_silent());
    }

    #[test]
    fn test_batch_remove_drops_all_edges() {
        let mut g = Graph::new(100.0, 8, 2);
        let a = g.add_node(Box::new(Dc(1.0)));
        let b = g.add_node(Box::new(Dc(1.0)));
        let scale = g.add_node(Box::new(Scale));
        g.connect(a, scale);
        g.connect(b, scale);
        g.connect_param(b, scale, ParamKind::Gain);

        assert_eq!(g.remove_nodes(&[a, b, a]), 2);
        assert!(g.inputs(scale).is_empty());
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn test_unstarted_source_is_silent() {
        let mut g = Graph::new(100.0, 8, 2);
        let dc = g.add_node(Box::new(Dc(1.0)));
        g.process(8, 0);
        assert!(g.output(dc).unwrap().is_silent());
    }
}
