// src/engine.rs

use std::sync::Arc;

use crate::audio_buffer::SampleBuffer;
use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::error::Result;
use crate::offline::{OfflineRenderer, RenderOptions, RenderOutput};
use crate::scheduler::{ScheduleReport, TimelineScheduler};
use crate::state::{AudioPool, Project};
use crate::track_graph::{ReverbUpdate, TrackGraphManager, TrackNodes};
use crate::transport::{PlayAnchor, PlaybackClock, PositionListener, Tempo, TransportState};
use crate::voice_registry::VoiceRegistry;

/// Playback engine for one project.
///
/// Owns the realtime audio clock and everything scheduled on it. The host
/// drives two loops: its audio callback calls [`render`](Self::render), its
/// UI frame loop calls [`advance`](Self::advance). Wall-clock timestamps
/// are passed in by the host in seconds.
pub struct Engine {
    config: EngineConfig,

    /// Realtime audio clock and render graph
    ctx: AudioContext,

    /// Persistent per-track mix chains
    graph: TrackGraphManager,

    /// Voices scheduled on `ctx` that may still need releasing
    voices: VoiceRegistry,

    clock: PlaybackClock,
    scheduler: TimelineScheduler,

    /// Snapshot read by every scheduling pass
    project: Arc<Project>,
    pool: AudioPool,

    last_report: ScheduleReport,
}

impl Engine {
    /// Fails only when no audio clock can be created from `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let ctx = AudioContext::realtime(&config)?;
        let graph = TrackGraphManager::new(ctx.destination(), &config);
        let scheduler = TimelineScheduler::new(&config);
        log::info!("engine ready at {} Hz", config.sample_rate);
        Ok(Self {
            ctx,
            graph,
            voices: VoiceRegistry::new(),
            clock: PlaybackClock::new(Tempo::default()),
            scheduler,
            project: Arc::new(Project::default()),
            pool: AudioPool::new(),
            last_report: ScheduleReport::default(),
            config,
        })
    }

    // -------------------------------
    // MARK: State
    // -------------------------------

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn project(&self) -> &Project {
        &self.project
    }

    #[inline]
    pub fn position(&self) -> f64 {
        self.clock.position()
    }

    #[inline]
    pub fn transport_state(&self) -> TransportState {
        self.clock.state()
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    /// Audio-clock time in seconds.
    #[inline]
    pub fn current_time(&self) -> f64 {
        self.ctx.current_time()
    }

    #[inline]
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Spans dispatched by the most recent scheduling pass.
    #[inline]
    pub fn last_report(&self) -> &ScheduleReport {
        &self.last_report
    }

    pub fn track_graph(&self) -> &TrackGraphManager {
        &self.graph
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    pub fn set_position_listener(&mut self, listener: Option<PositionListener>) {
        self.clock.set_position_listener(listener);
    }

    // -------------------------------
    // MARK: Project
    // -------------------------------

    /// Replace the project snapshot. While playing, everything scheduled is
    /// released and the new snapshot is scheduled from the current position.
    pub fn load_project(&mut self, project: Project) -> Result<()> {
        project.tempo.validate()?;
        let playing = self.clock.is_playing();
        if playing {
            self.release_voices();
        }

        self.clock.rebase_tempo(project.tempo);
        self.project = Arc::new(project);

        // Mix changes glide while playing. Tracks gaining a reverb branch
        // are rebuilt here and picked up by the schedule below.
        let restart = self.graph.sync(&mut self.ctx, &self.project.tracks);
        for track_id in &restart {
            self.rebuild_track(track_id);
        }

        log::info!("loaded project with {} tracks", self.project.tracks.len());
        if playing {
            self.schedule_from(self.current_anchor());
        }
        Ok(())
    }

    pub fn load_project_json(&mut self, json: &str) -> Result<()> {
        self.load_project(Project::from_json(json)?)
    }

    /// Make a decoded buffer available to audio regions referencing `file_id`.
    pub fn register_buffer(&mut self, file_id: impl Into<String>, buffer: SampleBuffer) {
        self.pool.insert(file_id, buffer);
    }

    pub fn remove_buffer(&mut self, file_id: &str) -> bool {
        self.pool.remove(file_id).is_some()
    }

    // -------------------------------
    // MARK: Transport
    // -------------------------------

    /// Start playback from the committed position and schedule every track.
    /// Playing again while playing rebuilds the schedule instead of stacking.
    pub fn play(&mut self, now_wall: f64) -> &ScheduleReport {
        if self.clock.is_playing() {
            self.release_voices();
        }
        let anchor = self.clock.play(now_wall, self.ctx.current_time());
        self.graph.set_running(true);
        self.schedule_from(anchor);
        &self.last_report
    }

    /// Commit the position, release sounding voices and drop pending ones.
    pub fn pause(&mut self, now_wall: f64) -> f64 {
        if self.clock.is_playing() {
            self.release_voices();
        }
        self.graph.set_running(false);
        self.clock.pause(now_wall)
    }

    /// Same as [`pause`](Self::pause). Idempotent.
    pub fn stop(&mut self, now_wall: f64) -> f64 {
        self.pause(now_wall)
    }

    /// Jump to `position`; playback continues from there if it was running.
    pub fn seek(&mut self, position: f64, now_wall: f64) {
        if self.clock.is_playing() {
            self.release_voices();
        }
        if let Some(anchor) = self.clock.seek(position, now_wall, self.ctx.current_time()) {
            self.schedule_from(anchor);
        }
    }

    pub fn set_tempo(&mut self, bpm: f64, beats_per_measure: f64, now_wall: f64) -> Result<()> {
        let tempo = Tempo::new(bpm, beats_per_measure)?;
        if self.clock.is_playing() {
            self.release_voices();
        }
        Arc::make_mut(&mut self.project).tempo = tempo;
        if let Some(anchor) = self.clock.set_tempo(tempo, now_wall, self.ctx.current_time()) {
            self.schedule_from(anchor);
        }
        Ok(())
    }

    /// Interpolated position for the host's frame loop. Performs no
    /// scheduling and is a no-op while stopped.
    pub fn advance(&mut self, now_wall: f64) -> f64 {
        self.clock.advance(now_wall)
    }

    /// Fade out sounding voices and drop pending ones.
    fn release_voices(&mut self) {
        let now = self.ctx.current_time();
        self.voices.release_all(&mut self.ctx, now);
    }

    fn current_anchor(&self) -> PlayAnchor {
        let position = self.clock.position();
        PlayAnchor {
            position,
            audio_time: self.clock.audio_time_of(position),
        }
    }

    fn schedule_from(&mut self, anchor: PlayAnchor) {
        self.last_report = self.scheduler.schedule_project(
            &mut self.ctx,
            &self.project,
            &self.graph,
            &self.pool,
            anchor,
            Some(&mut self.voices),
        );
    }

    // -------------------------------
    // MARK: Mix parameters
    // -------------------------------

    pub fn update_volume_mute(&mut self, track_id: &str, volume: f64, muted: bool) {
        if let Some(track) = Arc::make_mut(&mut self.project).track_mut(track_id) {
            track.volume = volume;
            track.mute = muted;
        }
        self.graph
            .update_volume_mute(&mut self.ctx, track_id, volume, muted);
    }

    pub fn update_pan(&mut self, track_id: &str, pan: f64) {
        if let Some(track) = Arc::make_mut(&mut self.project).track_mut(track_id) {
            track.pan = pan;
        }
        self.graph.update_pan(&mut self.ctx, track_id, pan);
    }

    pub fn update_solo(&mut self, track_id: &str, solo: bool) {
        if let Some(track) = Arc::make_mut(&mut self.project).track_mut(track_id) {
            track.solo = solo;
        }
        self.graph.update_solo(&mut self.ctx, track_id, solo);
    }

    /// Change a reverb send. Enabling reverb on a track without one while
    /// playing restarts that track from the current position; the track
    /// drops out briefly while its chain is rebuilt.
    pub fn update_reverb(&mut self, track_id: &str, amount: f64, now_wall: f64) -> ReverbUpdate {
        if let Some(track) = Arc::make_mut(&mut self.project).track_mut(track_id) {
            track.reverb = amount;
        }
        let update = self.graph.update_reverb(&mut self.ctx, track_id, amount);
        if update == ReverbUpdate::NeedsRestart {
            self.restart_track(track_id, now_wall);
        }
        update
    }

    /// Drop a track's voices and recreate its chain.
    fn rebuild_track(&mut self, track_id: &str) -> Option<TrackNodes> {
        self.voices.remove_track(&mut self.ctx, track_id);
        self.graph.rebuild(&mut self.ctx, track_id)
    }

    fn restart_track(&mut self, track_id: &str, now_wall: f64) {
        let position = self.clock.advance(now_wall);
        let Some(nodes) = self.rebuild_track(track_id) else {
            return;
        };
        let Some(track) = self.project.track(track_id) else {
            return;
        };
        let anchor = PlayAnchor {
            position,
            audio_time: self.clock.audio_time_of(position),
        };
        let report = self.scheduler.schedule_track(
            &mut self.ctx,
            &self.project,
            track,
            nodes.gain,
            &self.pool,
            anchor,
            Some(&mut self.voices),
        );
        log::info!(
            "restarted track {track_id} at position {position:.3}: {} spans",
            report.spans.len()
        );
        self.last_report
            .spans
            .retain(|s| s.track_id != track_id);
        self.last_report.merge(report);
    }

    // -------------------------------
    // MARK: Rendering
    // -------------------------------

    /// Pull one stereo block from the realtime clock, then reap finished
    /// voices.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.render_planar(&mut [left, right]);
    }

    /// Pull one block into any number of planar outputs.
    pub fn render_planar(&mut self, outputs: &mut [&mut [f32]]) {
        self.ctx.render(outputs);
        let now = self.ctx.current_time();
        self.voices.reap(&mut self.ctx, now, self.config.reaper_safety);
    }

    /// Render the current project offline for export.
    pub fn export(&self, options: RenderOptions) -> Result<RenderOutput> {
        OfflineRenderer::new(self.config.clone()).render(&self.project, &self.pool, options)
    }
}
