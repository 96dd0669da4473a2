// src/scheduler.rs

use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::graph::NodeId;
use crate::nodes::BufferSourceOptions;
use crate::state::{
    DecodedBufferSource, DrumParams, MidiNote, Project, Region, RegionContent, SynthParams, Track,
    TrackType,
};
use crate::synth::{DrumSynth, MidiSynth, NoteOn};
use crate::track_graph::TrackGraphManager;
use crate::transport::{PlayAnchor, Tempo};
use crate::voice::{Voice, VoiceKey};
use crate::voice_registry::VoiceRegistry;

/// What a scheduled span plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Note { pitch: u8 },
    Hit { pitch: u8 },
    Audio,
}

/// One dispatched voice, in score and audio-clock time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSpan {
    pub track_id: String,
    pub region_id: String,
    pub kind: SpanKind,

    /// Position units actually covered after clipping to the window.
    pub start: f64,
    pub end: f64,

    /// Audio-clock seconds of the sounding part.
    pub start_time: f64,
    pub end_time: f64,

    /// When the voice falls silent, release included.
    pub tail_end: f64,
}

/// Outcome of one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleReport {
    pub spans: Vec<ScheduledSpan>,
    /// Regions or notes skipped for missing resources or degenerate timing.
    pub skipped: usize,
}

impl ScheduleReport {
    pub fn merge(&mut self, other: ScheduleReport) {
        self.spans.extend(other.spans);
        self.skipped += other.skipped;
    }

    /// Latest tail end across all spans.
    pub fn last_tail_end(&self) -> Option<f64> {
        self.spans.iter().map(|s| s.tail_end).reduce(f64::max)
    }
}

/// Instrument patch for a track: project instruments first, then the
/// built-in presets. Tracks without an instrument use the default patch.
pub fn resolve_instrument(project: &Project, track: &Track) -> Option<SynthParams> {
    match &track.instrument_id {
        None => Some(SynthParams::default()),
        Some(id) => project
            .instruments
            .get(id)
            .cloned()
            .or_else(|| SynthParams::preset(id)),
    }
}

/// Maps score position onto the audio clock and dispatches regions.
///
/// The same pass serves realtime playback and offline export. Voices handed
/// to a registry can later be released and reaped.
pub struct TimelineScheduler {
    midi: MidiSynth,
    drums: DrumSynth,

    min_note_duration: f64,
    late_start_tolerance: f64,
    /// Fade applied when an audio region is cut short.
    region_fade: f64,
}

/// Per-pass inputs shared by every track.
struct Pass<'a> {
    tempo: Tempo,
    anchor: PlayAnchor,
    now: f64,
    buffers: &'a dyn DecodedBufferSource,
}

impl Pass<'_> {
    /// Audio-clock time at which position `pos` sounds.
    #[inline]
    fn time_of(&self, pos: f64) -> f64 {
        self.anchor.audio_time + self.tempo.pos_to_time(pos - self.anchor.position)
    }
}

impl TimelineScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            midi: MidiSynth::new(),
            drums: DrumSynth::new(),
            min_note_duration: config.min_note_duration,
            late_start_tolerance: config.late_start_tolerance,
            region_fade: config.param_time_constant * 3.0,
        }
    }

    /// Schedule every track with a chain in `graph`, from `anchor` onwards.
    pub fn schedule_project(
        &self,
        ctx: &mut AudioContext,
        project: &Project,
        graph: &TrackGraphManager,
        buffers: &dyn DecodedBufferSource,
        anchor: PlayAnchor,
        mut voices: Option<&mut VoiceRegistry>,
    ) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        for track in &project.tracks {
            let Some(output) = graph.input(&track.id) else {
                log::debug!("track {} has no chain; not scheduled", track.id);
                continue;
            };
            report.merge(self.schedule_track(
                ctx,
                project,
                track,
                output,
                buffers,
                anchor,
                voices.as_deref_mut(),
            ));
        }
        log::debug!(
            "scheduled {} spans from position {:.3} ({} skipped)",
            report.spans.len(),
            anchor.position,
            report.skipped
        );
        report
    }

    /// Schedule one track's regions into `output`.
    ///
    /// Regions ending before the anchor are skipped, regions in progress
    /// start mid-way, future regions are scheduled ahead.
    #[allow(clippy::too_many_arguments)]
    pub fn schedule_track(
        &self,
        ctx: &mut AudioContext,
        project: &Project,
        track: &Track,
        output: NodeId,
        buffers: &dyn DecodedBufferSource,
        anchor: PlayAnchor,
        mut voices: Option<&mut VoiceRegistry>,
    ) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        if track.track_type == TrackType::Microphone {
            return report;
        }

        let pass = Pass {
            tempo: project.tempo,
            anchor,
            now: ctx.current_time(),
            buffers,
        };

        // Resolved lazily; audio-only tracks never need a patch.
        let mut patch: Option<Option<SynthParams>> = None;

        for (index, region) in track.regions.iter().enumerate() {
            if region.duration <= 0.0 || region.end() <= anchor.position {
                continue;
            }
            let region_id = if region.id.is_empty() {
                index.to_string()
            } else {
                region.id.clone()
            };

            match &region.content {
                RegionContent::Audio {
                    file_id,
                    audio_start_offset,
                    audio_end_offset,
                } => {
                    let clip = AudioClip {
                        file_id,
                        start_offset: *audio_start_offset,
                        end_offset: *audio_end_offset,
                    };
                    match self.schedule_audio(ctx, &pass, track, &region_id, region, clip, output) {
                        Some((span, voice)) => {
                            if let Some(reg) = voices.as_deref_mut() {
                                reg.insert(ctx, VoiceKey::region(&track.id, &region_id), voice);
                            }
                            report.spans.push(span);
                        }
                        None => report.skipped += 1,
                    }
                }
                RegionContent::Midi { midi_notes } => {
                    let drums = track.track_type == TrackType::Drums;
                    let params = if drums {
                        None
                    } else {
                        let resolved = patch.get_or_insert_with(|| resolve_instrument(project, track));
                        match resolved {
                            Some(p) => Some(&*p),
                            None => {
                                log::warn!(
                                    "unknown instrument {:?} on track {}; region {region_id} skipped",
                                    track.instrument_id,
                                    track.id
                                );
                                report.skipped += 1;
                                continue;
                            }
                        }
                    };

                    for note in midi_notes {
                        let scheduled = match params {
                            Some(p) => self.schedule_note(ctx, &pass, track, region, note, p, output),
                            None => self.schedule_hit(ctx, &pass, track, region, note, output),
                        };
                        let Some((mut span, voice)) = scheduled else {
                            report.skipped += 1;
                            continue;
                        };
                        span.region_id = region_id.clone();
                        if let Some(reg) = voices.as_deref_mut() {
                            let key = VoiceKey::note(&track.id, note.channel, note.pitch, voice.start_time);
                            reg.insert(ctx, key, voice);
                        }
                        report.spans.push(span);
                    }
                }
            }
        }
        report
    }

    // -------------------------------
    // MARK: Timing
    // -------------------------------

    /// Clip a note to the part of its region still ahead of the anchor.
    /// Returns the covered position range.
    fn clip_note(&self, pass: &Pass, region: &Region, note: &MidiNote) -> Option<(f64, f64)> {
        if note.duration <= 0.0 {
            return None;
        }
        let window_start = region.start.max(pass.anchor.position);
        let window_end = region.end();
        let start = region.start + note.start;
        let end = start + note.duration;
        if end <= window_start || start >= window_end {
            return None;
        }
        Some((start.max(window_start), end.min(window_end)))
    }

    /// Audio-clock start and end for a position range, with late starts
    /// pulled up to now. `None` when too little of it is left.
    fn clock_span(&self, pass: &Pass, start: f64, end: f64) -> Option<(f64, f64)> {
        let mut start_time = pass.time_of(start);
        let end_time = pass.time_of(end);
        if start_time < pass.now {
            let late = pass.now - start_time;
            if late > self.late_start_tolerance {
                log::debug!("start {start_time:.4} is {late:.4}s late; clamped to now");
            }
            start_time = pass.now;
        }
        (end_time - start_time >= self.min_note_duration).then_some((start_time, end_time))
    }

    // -------------------------------
    // MARK: Dispatch
    // -------------------------------

    #[allow(clippy::too_many_arguments)]
    fn schedule_note(
        &self,
        ctx: &mut AudioContext,
        pass: &Pass,
        track: &Track,
        region: &Region,
        note: &MidiNote,
        params: &SynthParams,
        output: NodeId,
    ) -> Option<(ScheduledSpan, Voice)> {
        let (start, end) = self.clip_note(pass, region, note)?;
        let (start_time, end_time) = self.clock_span(pass, start, end)?;
        let on = NoteOn {
            pitch: note.pitch.min(127),
            velocity: note.velocity.min(127),
            channel: note.channel,
        };
        let voice = self
            .midi
            .start_note(ctx, output, &track.id, params, on, start_time, end_time);
        let span = ScheduledSpan {
            track_id: track.id.clone(),
            region_id: region.id.clone(),
            kind: SpanKind::Note { pitch: on.pitch },
            start,
            end,
            start_time,
            end_time,
            tail_end: voice.end_time,
        };
        Some((span, voice))
    }

    /// Drum hits are one-shots: a hit whose onset is already behind the
    /// anchor is not retriggered.
    fn schedule_hit(
        &self,
        ctx: &mut AudioContext,
        pass: &Pass,
        track: &Track,
        region: &Region,
        note: &MidiNote,
        output: NodeId,
    ) -> Option<(ScheduledSpan, Voice)> {
        let (start, end) = self.clip_note(pass, region, note)?;
        if start > region.start + note.start {
            return None;
        }
        let Some(params) = DrumParams::for_note(note.pitch) else {
            log::debug!("no drum mapped to note {} on track {}", note.pitch, track.id);
            return None;
        };
        let (start_time, end_time) = self.clock_span(pass, start, end)?;
        let voice = self.drums.start_hit(
            ctx,
            output,
            &track.id,
            &params,
            note.velocity.min(127),
            start_time,
            end_time,
        );
        // The hit's own length, which differs from the note's for one-shots.
        let span = ScheduledSpan {
            track_id: track.id.clone(),
            region_id: region.id.clone(),
            kind: SpanKind::Hit { pitch: note.pitch },
            start,
            end,
            start_time,
            end_time: voice.end_time - voice.release,
            tail_end: voice.end_time,
        };
        Some((span, voice))
    }

    /// Play the remaining part of an audio region through its own fade gain.
    #[allow(clippy::too_many_arguments)]
    fn schedule_audio(
        &self,
        ctx: &mut AudioContext,
        pass: &Pass,
        track: &Track,
        region_id: &str,
        region: &Region,
        clip: AudioClip,
        output: NodeId,
    ) -> Option<(ScheduledSpan, Voice)> {
        let Some(buffer) = pass.buffers.decoded_buffer(clip.file_id) else {
            log::warn!(
                "no decoded buffer for {} (track {}, region {region_id}); skipped",
                clip.file_id,
                track.id
            );
            return None;
        };

        let start = region.start.max(pass.anchor.position);
        let end = region.end();
        let nominal_start = pass.time_of(start);
        let (start_time, mut end_time) = self.clock_span(pass, start, end)?;

        // Offset into the file: region trim, time already elapsed in the
        // region, and any late-start correction.
        let play_offset = pass.tempo.pos_to_time(start - region.start);
        let offset = clip.start_offset.max(0.0) + play_offset + (start_time - nominal_start);

        let file_end = clip
            .end_offset
            .unwrap_or(buffer.duration())
            .min(buffer.duration());
        if offset >= file_end {
            log::debug!("region {region_id} starts past the end of {}", clip.file_id);
            return None;
        }
        end_time = end_time.min(start_time + (file_end - offset));

        let source = ctx.create_buffer_source(
            buffer,
            BufferSourceOptions {
                offset,
                looping: false,
            },
        );
        let fade = ctx.create_gain(1.0);
        ctx.connect(source, fade);
        ctx.connect(fade, output);
        ctx.start(source, start_time);
        ctx.stop(source, end_time);

        let voice = Voice {
            track_id: track.id.clone(),
            nodes: vec![source, fade],
            sources: vec![source],
            output: fade,
            release: self.region_fade,
            start_time,
            end_time,
        };
        let span = ScheduledSpan {
            track_id: track.id.clone(),
            region_id: region_id.to_string(),
            kind: SpanKind::Audio,
            start,
            end,
            start_time,
            end_time,
            tail_end: end_time,
        };
        Some((span, voice))
    }
}

#[derive(Debug, Clone, Copy)]
struct AudioClip<'a> {
    file_id: &'a str,
    start_offset: f64,
    end_offset: Option<f64>,
}
