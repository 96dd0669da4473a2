// src/offline.rs
//
// Non-interactive export: the same chains, synthesizers and scheduling
// pass as live playback, run once against a fixed-length offline clock.

use crate::audio_buffer::SampleBuffer;
use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::error::{EngineError, Result};
use crate::scheduler::{ScheduleReport, TimelineScheduler};
use crate::state::{DecodedBufferSource, Project};
use crate::track_graph::TrackGraphManager;
use crate::transport::PlayAnchor;
use crate::voice_registry::VoiceRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderOptions {
    /// Extra seconds rendered after the last region so release tails and
    /// reverb can ring out.
    pub tail_seconds: f64,
}

/// Rendered mix plus what went into it.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub buffer: SampleBuffer,
    pub report: ScheduleReport,
}

/// Number of frames covering `seconds` at `sample_rate`.
#[inline]
pub fn frames_for(seconds: f64, sample_rate: f64) -> usize {
    (seconds * sample_rate - 1e-9).ceil().max(0.0) as usize
}

pub struct OfflineRenderer {
    config: EngineConfig,
}

impl OfflineRenderer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Render the whole project from position 0.
    pub fn render(
        &self,
        project: &Project,
        buffers: &dyn DecodedBufferSource,
        options: RenderOptions,
    ) -> Result<RenderOutput> {
        if !project.has_regions() {
            return Err(EngineError::EmptyTimeline);
        }
        project.tempo.validate()?;

        let seconds = project.duration_seconds() + options.tail_seconds.max(0.0);
        let length = frames_for(seconds, self.config.sample_rate);
        log::info!(
            "offline render: {} tracks, {seconds:.3}s, {length} frames",
            project.tracks.len()
        );

        let mut session = self.prepare(project, buffers, length)?;
        let buffer = session.run(self.config.reaper_safety);
        Ok(RenderOutput {
            buffer,
            report: session.report,
        })
    }

    /// Build the chains and schedule every voice from position 0.
    fn prepare(
        &self,
        project: &Project,
        buffers: &dyn DecodedBufferSource,
        length: usize,
    ) -> Result<OfflineSession> {
        let mut ctx = AudioContext::offline(&self.config, length)?;
        let mut graph = TrackGraphManager::new(ctx.destination(), &self.config);
        graph.sync(&mut ctx, &project.tracks);

        let anchor = PlayAnchor {
            position: 0.0,
            audio_time: 0.0,
        };
        let mut voices = VoiceRegistry::new();
        let report = TimelineScheduler::new(&self.config).schedule_project(
            &mut ctx,
            project,
            &graph,
            buffers,
            anchor,
            Some(&mut voices),
        );
        Ok(OfflineSession {
            ctx,
            voices,
            report,
        })
    }
}

/// A scheduled offline clock. Voices are registered so their nodes leave
/// the graph once they have played out.
struct OfflineSession {
    ctx: AudioContext,
    voices: VoiceRegistry,
    report: ScheduleReport,
}

impl OfflineSession {
    fn run(&mut self, safety: f64) -> SampleBuffer {
        let voices = &mut self.voices;
        self.ctx.start_rendering_with(|ctx| {
            let now = ctx.current_time();
            voices.reap(ctx, now, safety);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AudioPool, MidiNote, Region, Track, TrackType};
    use crate::transport::Tempo;

    fn one_note_project(region_len: f64) -> Project {
        Project::new(Tempo::default()).with_track(
            Track::new("keys", TrackType::Instrument).with_region(Region::midi(
                "r",
                0.0,
                region_len,
                vec![MidiNote::new(57, 100, 0.0, 0.25)],
            )),
        )
    }

    #[test]
    fn test_ten_second_project_frame_count() {
        // 5 measures at 120 bpm in 4/4 = 10 s
        let project = one_note_project(5.0);
        let renderer = OfflineRenderer::new(EngineConfig::with_sample_rate(44_100.0));
        let out = renderer
            .render(&project, &AudioPool::new(), RenderOptions::default())
            .unwrap();
        assert_eq!(out.buffer.frames(), 441_000);
        assert_eq!(out.buffer.num_channels(), 2);
    }

    #[test]
    fn test_empty_project_is_an_error() {
        let renderer = OfflineRenderer::new(EngineConfig::default());
        let project = Project::new(Tempo::default()).with_track(Track::new("a", TrackType::Audio));
        assert!(matches!(
            renderer.render(&project, &AudioPool::new(), RenderOptions::default()),
            Err(EngineError::EmptyTimeline)
        ));
    }

    #[test]
    fn test_render_is_deterministic_and_audible() {
        let project = one_note_project(1.0);
        let renderer = OfflineRenderer::new(EngineConfig::with_sample_rate(8_000.0));
        let a = renderer
            .render(&project, &AudioPool::new(), RenderOptions::default())
            .unwrap();
        let b = renderer
            .render(&project, &AudioPool::new(), RenderOptions::default())
            .unwrap();
        assert_eq!(a.buffer, b.buffer);
        assert!(a.buffer.peak() > 0.01);
        assert_eq!(a.report.spans.len(), 1);
    }

    #[test]
    fn test_tail_extends_horizon() {
        let project = one_note_project(1.0);
        let renderer = OfflineRenderer::new(EngineConfig::with_sample_rate(8_000.0));
        let out = renderer
            .render(
                &project,
                &AudioPool::new(),
                RenderOptions { tail_seconds: 0.5 },
            )
            .unwrap();
        assert_eq!(out.buffer.frames(), 20_000);
    }

    #[test]
    fn test_played_out_voices_leave_the_graph() {
        let notes = (0..40)
            .map(|i| MidiNote::new(48 + (i % 12) as u8, 100, i as f64 * 0.05, 0.05))
            .collect();
        let project = Project::new(Tempo::default()).with_track(
            Track::new("keys", TrackType::Instrument).with_region(Region::midi("r", 0.0, 2.0, notes)),
        );
        let config = EngineConfig::with_sample_rate(8_000.0);
        let renderer = OfflineRenderer::new(config.clone());
        let length = frames_for(project.duration_seconds() + 1.0, config.sample_rate);
        let mut session = renderer.prepare(&project, &AudioPool::new(), length).unwrap();

        assert_eq!(session.voices.len(), 40);
        let chain_only = {
            let mut ctx = AudioContext::offline(&config, 1).unwrap();
            let mut graph = TrackGraphManager::new(ctx.destination(), &config);
            graph.sync(&mut ctx, &project.tracks);
            ctx.node_count()
        };
        assert!(session.ctx.node_count() > chain_only);

        let buffer = session.run(config.reaper_safety);
        assert_eq!(buffer.frames(), length);
        assert!(buffer.peak() > 0.01);
        assert!(session.voices.is_empty());
        assert_eq!(session.ctx.node_count(), chain_only);
    }

    #[test]
    fn test_audio_region_renders_decoded_buffer() {
        let mut pool = AudioPool::new();
        pool.insert(
            "take",
            SampleBuffer::from_channels(vec![vec![0.25; 16_000]], 8_000.0),
        );
        let project = Project::new(Tempo::default()).with_track(
            Track {
                volume: 100.0,
                ..Track::new("vox", TrackType::Audio)
                    .with_region(Region::audio("r", 0.0, 0.5, "take", 0.0))
            },
        );
        let renderer = OfflineRenderer::new(EngineConfig::with_sample_rate(8_000.0));
        let out = renderer.render(&project, &pool, RenderOptions::default()).unwrap();

        // Centered mono through an equal-power panner.
        let expected = 0.25 * std::f32::consts::FRAC_1_SQRT_2;
        assert!((out.buffer.channel(0)[4_000] - expected).abs() < 1e-3);
        assert!((out.buffer.channel(1)[4_000] - expected).abs() < 1e-3);
    }
}
