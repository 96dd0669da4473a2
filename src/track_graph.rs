// src/track_graph.rs
//
// Persistent per-track mix chains.
//
//   voices ──► gain ──┬──► dry ─────────────┬──► pan ──► master
//                     └──► convolver ─► wet ┘
//
// The reverb branch only exists once a track has a non-zero send. Chains
// are created lazily and survive across play/stop; only enabling reverb
// on a track without one forces a rebuild.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{EngineConfig, ReverbConfig};
use crate::context::AudioContext;
use crate::graph::NodeId;
use crate::nodes::ImpulseResponse;
use crate::parameter::ParamKind;
use crate::state::{Track, TrackId};

/// Reverb send sub-graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverbSend {
    pub dry: NodeId,
    pub convolver: NodeId,
    pub wet: NodeId,
}

/// Node handles of one track chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackNodes {
    /// Chain input; voices connect here.
    pub gain: NodeId,
    pub pan: NodeId,
    pub reverb: Option<ReverbSend>,
}

/// Mix settings last applied to a track.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TrackMix {
    volume: f64,
    muted: bool,
    solo: bool,
    pan: f64,
    reverb: f64,
}

impl TrackMix {
    fn from_track(track: &Track) -> Self {
        Self {
            volume: track.volume,
            muted: track.mute,
            solo: track.solo,
            pan: track.pan,
            reverb: track.reverb,
        }
    }
}

struct TrackEntry {
    nodes: TrackNodes,
    mix: TrackMix,
}

/// Result of a reverb change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbUpdate {
    /// Existing nodes were adjusted in place (or nothing needed to change).
    Updated,
    /// The chain was rebuilt with a reverb branch; the transport was stopped.
    Rebuilt,
    /// A reverb branch is needed while playing: the caller must stop the
    /// track, call [`TrackGraphManager::rebuild`] and reschedule it.
    NeedsRestart,
}

/// Linear gain a track chain should carry.
///
/// Muted tracks, and unsoloed tracks while anything is soloed, are silent.
pub fn effective_gain(volume: f64, muted: bool, solo: bool, any_solo: bool) -> f32 {
    if muted || (any_solo && !solo) {
        0.0
    } else {
        (volume.clamp(0.0, 100.0) / 100.0) as f32
    }
}

/// Pan position for the panner: ±100 → ±1.
#[inline]
pub fn pan_value(pan: f64) -> f32 {
    (pan.clamp(-100.0, 100.0) / 100.0) as f32
}

/// Wet level of the reverb send: 0–100 → 0–1.
#[inline]
pub fn wet_value(amount: f64) -> f32 {
    (amount.clamp(0.0, 100.0) / 100.0) as f32
}

pub struct TrackGraphManager {
    master: NodeId,
    tracks: HashMap<TrackId, TrackEntry>,

    /// Parameter changes are smoothed while the transport runs.
    running: bool,
    time_constant: f64,

    reverb_config: ReverbConfig,
    /// Derived from the reverb config and sample rate; `None` when dirty.
    impulse: Option<Arc<ImpulseResponse>>,
}

impl TrackGraphManager {
    pub fn new(master: NodeId, config: &EngineConfig) -> Self {
        Self {
            master,
            tracks: HashMap::new(),
            running: false,
            time_constant: config.param_time_constant,
            reverb_config: config.reverb.clone(),
            impulse: None,
        }
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn nodes(&self, track_id: &str) -> Option<TrackNodes> {
        self.tracks.get(track_id).map(|e| e.nodes)
    }

    /// Chain input for a track, if it exists.
    pub fn input(&self, track_id: &str) -> Option<NodeId> {
        self.tracks.get(track_id).map(|e| e.nodes.gain)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn any_solo(&self) -> bool {
        self.tracks.values().any(|e| e.mix.solo)
    }

    // -------------------------------
    // MARK: Impulse response
    // -------------------------------

    /// Shared impulse response, generated on first use.
    pub fn impulse(&mut self, sample_rate: f64) -> Arc<ImpulseResponse> {
        if let Some(ir) = &self.impulse {
            return Arc::clone(ir);
        }
        let ir = Arc::new(ImpulseResponse::velvet(&self.reverb_config, sample_rate));
        log::debug!("generated reverb impulse: {} frames", ir.len());
        self.impulse = Some(Arc::clone(&ir));
        ir
    }

    // -------------------------------
    // MARK: Chains
    // -------------------------------

    /// Create the chain for `track` unless it already exists. Idempotent:
    /// an existing chain is returned unchanged.
    pub fn ensure_nodes(&mut self, ctx: &mut AudioContext, track: &Track) -> TrackNodes {
        if let Some(entry) = self.tracks.get(&track.id) {
            return entry.nodes;
        }
        let mix = TrackMix::from_track(track);
        let any_solo = self.any_solo() || mix.solo;
        let nodes = self.build_chain(ctx, &mix, any_solo);
        log::debug!("created chain for track {}", track.id);
        self.tracks.insert(track.id.clone(), TrackEntry { nodes, mix });
        if mix.solo {
            self.refresh_gains(ctx);
        }
        nodes
    }

    fn build_chain(&mut self, ctx: &mut AudioContext, mix: &TrackMix, any_solo: bool) -> TrackNodes {
        let gain = ctx.create_gain(effective_gain(mix.volume, mix.muted, mix.solo, any_solo));
        let pan = ctx.create_stereo_panner();
        ctx.set_param_now(pan, ParamKind::Pan, pan_value(mix.pan));

        let reverb = if mix.reverb > 0.0 {
            let ir = self.impulse(ctx.sample_rate());
            let dry = ctx.create_gain(1.0);
            let convolver = ctx.create_convolver(ir);
            let wet = ctx.create_gain(wet_value(mix.reverb));
            ctx.connect(gain, dry);
            ctx.connect(gain, convolver);
            ctx.connect(convolver, wet);
            ctx.connect(dry, pan);
            ctx.connect(wet, pan);
            Some(ReverbSend {
                dry,
                convolver,
                wet,
            })
        } else {
            ctx.connect(gain, pan);
            None
        };

        ctx.connect(pan, self.master);
        TrackNodes { gain, pan, reverb }
    }

    /// Tear down and recreate a track's chain from its stored mix settings.
    /// Voices feeding the old chain must already be gone.
    pub fn rebuild(&mut self, ctx: &mut AudioContext, track_id: &str) -> Option<TrackNodes> {
        let mix = self.tracks.get(track_id)?.mix;
        self.remove_track(ctx, track_id);
        let any_solo = self.any_solo() || mix.solo;
        let nodes = self.build_chain(ctx, &mix, any_solo);
        self.tracks
            .insert(track_id.to_string(), TrackEntry { nodes, mix });
        log::info!("rebuilt chain for track {track_id}");
        Some(nodes)
    }

    pub fn remove_track(&mut self, ctx: &mut AudioContext, track_id: &str) {
        if let Some(entry) = self.tracks.remove(track_id) {
            let n = entry.nodes;
            ctx.remove_nodes(&[n.gain, n.pan]);
            if let Some(r) = n.reverb {
                ctx.remove_nodes(&[r.dry, r.convolver, r.wet]);
            }
        }
    }

    /// Bring chains in line with a project snapshot: create missing chains,
    /// drop chains of deleted tracks and apply every mix setting. Returns the
    /// ids of tracks whose reverb change needs a restart.
    pub fn sync(&mut self, ctx: &mut AudioContext, tracks: &[Track]) -> Vec<TrackId> {
        let stale: Vec<TrackId> = self
            .tracks
            .keys()
            .filter(|id| !tracks.iter().any(|t| &t.id == *id))
            .cloned()
            .collect();
        for id in stale {
            self.remove_track(ctx, &id);
        }

        let mut restart = Vec::new();
        for track in tracks {
            self.ensure_nodes(ctx, track);
            self.update_pan(ctx, &track.id, track.pan);
            if self.update_reverb(ctx, &track.id, track.reverb) == ReverbUpdate::NeedsRestart {
                restart.push(track.id.clone());
            }
            if let Some(entry) = self.tracks.get_mut(&track.id) {
                entry.mix.solo = track.solo;
            }
            self.update_volume_mute(ctx, &track.id, track.volume, track.mute);
        }
        self.refresh_gains(ctx);
        restart
    }

    // -------------------------------
    // MARK: Live parameters
    // -------------------------------

    /// Smoothed approach while running, immediate set while stopped.
    fn apply(&self, ctx: &mut AudioContext, node: NodeId, kind: ParamKind, value: f32) {
        let now = ctx.current_time();
        let Some(param) = ctx.param_mut(node, kind) else {
            return;
        };
        if self.running {
            param.cancel_scheduled_values(now);
            param.set_target_at_time(value, now, self.time_constant);
        } else {
            param.set_value(value);
        }
    }

    pub fn update_volume_mute(&mut self, ctx: &mut AudioContext, track_id: &str, volume: f64, muted: bool) {
        let any_solo = self.any_solo();
        let Some(entry) = self.tracks.get_mut(track_id) else {
            log::debug!("volume update for unknown track {track_id}");
            return;
        };
        entry.mix.volume = volume;
        entry.mix.muted = muted;
        let (gain, mix) = (entry.nodes.gain, entry.mix);
        self.apply(
            ctx,
            gain,
            ParamKind::Gain,
            effective_gain(mix.volume, mix.muted, mix.solo, any_solo),
        );
    }

    /// Change a track's solo flag; every track's gain is recomputed.
    pub fn update_solo(&mut self, ctx: &mut AudioContext, track_id: &str, solo: bool) {
        let Some(entry) = self.tracks.get_mut(track_id) else {
            return;
        };
        entry.mix.solo = solo;
        self.refresh_gains(ctx);
    }

    fn refresh_gains(&mut self, ctx: &mut AudioContext) {
        let any_solo = self.any_solo();
        let targets: Vec<(NodeId, f32)> = self
            .tracks
            .values()
            .map(|e| {
                let m = e.mix;
                (e.nodes.gain, effective_gain(m.volume, m.muted, m.solo, any_solo))
            })
            .collect();
        for (gain, value) in targets {
            let current = ctx.param(gain, ParamKind::Gain).map(|p| p.value_at(ctx.current_time()));
            if current != Some(value) {
                self.apply(ctx, gain, ParamKind::Gain, value);
            }
        }
    }

    pub fn update_pan(&mut self, ctx: &mut AudioContext, track_id: &str, pan: f64) {
        let Some(entry) = self.tracks.get_mut(track_id) else {
            return;
        };
        if entry.mix.pan == pan && ctx.param(entry.nodes.pan, ParamKind::Pan).is_some() {
            return;
        }
        entry.mix.pan = pan;
        let node = entry.nodes.pan;
        self.apply(ctx, node, ParamKind::Pan, pan_value(pan));
    }

    /// Change a track's reverb send.
    ///
    /// A track that already has a reverb branch only moves its wet level.
    /// A track without one gets rebuilt immediately while stopped, or asks
    /// the caller for a restart while playing.
    pub fn update_reverb(&mut self, ctx: &mut AudioContext, track_id: &str, amount: f64) -> ReverbUpdate {
        let Some(entry) = self.tracks.get_mut(track_id) else {
            return ReverbUpdate::Updated;
        };
        let previous = entry.mix.reverb;
        entry.mix.reverb = amount;
        let existing = entry.nodes.reverb;

        match existing {
            Some(send) => {
                if previous != amount {
                    self.apply(ctx, send.wet, ParamKind::Gain, wet_value(amount));
                }
                ReverbUpdate::Updated
            }
            None if amount <= 0.0 => ReverbUpdate::Updated,
            None if self.running => {
                log::info!("reverb enabled on {track_id} while playing; restart required");
                ReverbUpdate::NeedsRestart
            }
            None => {
                self.rebuild(ctx, track_id);
                ReverbUpdate::Rebuilt
            }
        }
    }
}
