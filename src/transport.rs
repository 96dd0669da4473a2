// src/transport.rs
//
// Tempo conversion and the interactive playback clock.
//
// Score positions are fractional measures ("position units"). The clock
// interpolates position from wall-clock time while playing and commits it
// whenever the transport stops, seeks or changes tempo.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

//
// ===============================
// MARK: Tempo
// ===============================
//

/// Tempo and meter used for position ↔ time conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tempo {
    pub bpm: f64,
    pub beats_per_measure: f64,
}

impl Default for Tempo {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            beats_per_measure: 4.0,
        }
    }
}

impl Tempo {
    pub fn new(bpm: f64, beats_per_measure: f64) -> Result<Self> {
        let tempo = Self {
            bpm,
            beats_per_measure,
        };
        tempo.validate()?;
        Ok(tempo)
    }

    pub fn validate(&self) -> Result<()> {
        let usable = |v: f64| v.is_finite() && v > 0.0;
        if usable(self.bpm) && usable(self.beats_per_measure) {
            Ok(())
        } else {
            Err(EngineError::InvalidTempo {
                bpm: self.bpm,
                beats_per_measure: self.beats_per_measure,
            })
        }
    }

    /// Seconds spanned by `pos` position units.
    #[inline]
    pub fn pos_to_time(&self, pos: f64) -> f64 {
        pos * self.beats_per_measure * 60.0 / self.bpm
    }

    /// Position units spanned by `seconds`.
    #[inline]
    pub fn time_to_pos(&self, seconds: f64) -> f64 {
        seconds * self.bpm / (self.beats_per_measure * 60.0)
    }
}

//
// ===================================
// MARK: Playback clock
// ===================================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
}

/// Where a freshly started transport maps score position onto the audio clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayAnchor {
    /// Score position at the moment playback started.
    pub position: f64,
    /// Audio-clock time corresponding to `position`.
    pub audio_time: f64,
}

pub type PositionListener = Box<dyn FnMut(f64) + Send>;

/// Transport state machine with wall-clock interpolation.
///
/// The clock never touches the audio graph. It only answers "where are we"
/// and "when on the audio clock does position X sound".
pub struct PlaybackClock {
    state: TransportState,
    tempo: Tempo,

    /// Position committed at the last start/stop/seek.
    base_position: f64,
    /// Last interpolated position; never decreases while playing.
    position: f64,

    /// Wall-clock seconds captured at play.
    start_wall: f64,
    /// Audio-clock seconds captured at play.
    start_audio: f64,
    /// Most recent wall-clock reading seen.
    last_wall: f64,

    listener: Option<PositionListener>,
}

impl std::fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackClock")
            .field("state", &self.state)
            .field("tempo", &self.tempo)
            .field("base_position", &self.base_position)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl PlaybackClock {
    pub fn new(tempo: Tempo) -> Self {
        Self {
            state: TransportState::Stopped,
            tempo,
            base_position: 0.0,
            position: 0.0,
            start_wall: 0.0,
            start_audio: 0.0,
            last_wall: 0.0,
            listener: None,
        }
    }

    #[inline]
    pub fn state(&self) -> TransportState {
        self.state
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    /// Last known position in position units.
    #[inline]
    pub fn position(&self) -> f64 {
        self.position
    }

    #[inline]
    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    /// Observer called from [`advance`](Self::advance) with every new position.
    pub fn set_position_listener(&mut self, listener: Option<PositionListener>) {
        self.listener = listener;
    }

    // -------------------------------
    // MARK: Transport
    // -------------------------------

    /// Start playback from the committed position.
    ///
    /// Calling this while already playing commits the current position and
    /// re-anchors; the caller is expected to rebuild the schedule.
    pub fn play(&mut self, now_wall: f64, now_audio: f64) -> PlayAnchor {
        if self.is_playing() {
            self.commit(now_wall);
        }
        self.base_position = self.position;
        self.start_wall = now_wall;
        self.start_audio = now_audio;
        self.last_wall = now_wall;
        self.state = TransportState::Playing;
        log::debug!("transport play at position {:.4}", self.position);
        PlayAnchor {
            position: self.base_position,
            audio_time: now_audio,
        }
    }

    /// Interpolated position at `now_wall`. Cheap; performs no scheduling.
    pub fn advance(&mut self, now_wall: f64) -> f64 {
        if self.is_playing() {
            let elapsed = (now_wall - self.start_wall).max(0.0);
            let pos = self.base_position + self.tempo.time_to_pos(elapsed);
            self.position = self.position.max(pos);
            self.last_wall = now_wall;
            if let Some(listener) = self.listener.as_mut() {
                listener(self.position);
            }
        }
        self.position
    }

    /// Commit `base + delta` and stop interpolating.
    pub fn pause(&mut self, now_wall: f64) -> f64 {
        if self.is_playing() {
            self.commit(now_wall);
            self.state = TransportState::Stopped;
            log::debug!("transport paused at position {:.4}", self.position);
        }
        self.position
    }

    /// Same as [`pause`](Self::pause); the position is kept.
    pub fn stop(&mut self, now_wall: f64) -> f64 {
        self.pause(now_wall)
    }

    /// Jump to `position`. Returns the new anchor when playback restarted.
    pub fn seek(&mut self, position: f64, now_wall: f64, now_audio: f64) -> Option<PlayAnchor> {
        let position = position.max(0.0);
        let was_playing = self.is_playing();
        if was_playing {
            self.pause(now_wall);
        }
        self.base_position = position;
        self.position = position;
        was_playing.then(|| self.play(now_wall, now_audio))
    }

    /// Change tempo, keeping the current position. Returns the new anchor
    /// when playing, since everything scheduled ahead is now mistimed.
    pub fn set_tempo(&mut self, tempo: Tempo, now_wall: f64, now_audio: f64) -> Option<PlayAnchor> {
        let was_playing = self.is_playing();
        if was_playing {
            self.commit(now_wall);
        }
        self.tempo = tempo;
        was_playing.then(|| self.play(now_wall, now_audio))
    }

    /// Change tempo at the last advanced position when no fresh wall-clock
    /// reading is at hand. The run is re-anchored there.
    pub fn rebase_tempo(&mut self, tempo: Tempo) {
        if self.is_playing() {
            self.start_audio = self.audio_time_of(self.position);
            self.base_position = self.position;
            self.start_wall = self.last_wall;
        }
        self.tempo = tempo;
    }

    /// Audio-clock time at which score position `pos` sounds for the current run.
    #[inline]
    pub fn audio_time_of(&self, pos: f64) -> f64 {
        self.start_audio + self.tempo.pos_to_time(pos - self.base_position)
    }

    fn commit(&mut self, now_wall: f64) {
        let elapsed = (now_wall - self.start_wall).max(0.0);
        let pos = self.base_position + self.tempo.time_to_pos(elapsed);
        self.position = self.position.max(pos);
        self.base_position = self.position;
        self.start_wall = now_wall;
        self.last_wall = now_wall;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_position_time_round_trip() {
        let tempo = Tempo::new(97.0, 3.0).unwrap();
        for x in [0.0, 0.25, 1.0, 7.5, 123.456] {
            assert!(close(tempo.time_to_pos(tempo.pos_to_time(x)), x));
        }
    }

    #[test]
    fn test_one_measure_at_120_in_four_is_two_seconds() {
        let tempo = Tempo::default();
        assert_eq!(tempo.pos_to_time(1.0), 2.0);
        assert_eq!(tempo.pos_to_time(5.0), 10.0);
    }

    #[test]
    fn test_invalid_tempo_is_rejected() {
        assert!(matches!(
            Tempo::new(0.0, 4.0),
            Err(EngineError::InvalidTempo { .. })
        ));
        assert!(Tempo::new(120.0, f64::NAN).is_err());
    }

    #[test]
    fn test_advance_interpolates_and_is_monotonic() {
        let mut clock = PlaybackClock::new(Tempo::default());
        clock.play(10.0, 0.0);
        assert!(close(clock.advance(11.0), 0.5));
        // A wall clock stepping backwards never moves the position back.
        assert!(close(clock.advance(10.5), 0.5));
        assert!(close(clock.advance(12.0), 1.0));
    }

    #[test]
    fn test_pause_commits_and_play_resumes() {
        let mut clock = PlaybackClock::new(Tempo::default());
        clock.play(0.0, 0.0);
        assert!(close(clock.pause(2.0), 1.0));
        assert!(close(clock.advance(50.0), 1.0));

        let anchor = clock.play(60.0, 3.0);
        assert!(close(anchor.position, 1.0));
        assert!(close(clock.audio_time_of(2.0), 5.0));
    }

    #[test]
    fn test_seek_while_playing_restarts() {
        let mut clock = PlaybackClock::new(Tempo::default());
        clock.play(0.0, 0.0);
        let anchor = clock.seek(4.0, 1.0, 1.0).unwrap();
        assert!(clock.is_playing());
        assert!(close(anchor.position, 4.0));
        assert!(close(clock.advance(3.0), 5.0));
    }

    #[test]
    fn test_seek_while_stopped_only_moves() {
        let mut clock = PlaybackClock::new(Tempo::default());
        assert!(clock.seek(3.0, 0.0, 0.0).is_none());
        assert!(!clock.is_playing());
        assert!(close(clock.position(), 3.0));
    }

    #[test]
    fn test_redundant_play_reanchors() {
        let mut clock = PlaybackClock::new(Tempo::default());
        clock.play(0.0, 0.0);
        let anchor = clock.play(2.0, 2.0);
        assert!(close(anchor.position, 1.0));
        assert!(close(clock.advance(4.0), 2.0));
    }

    #[test]
    fn test_tempo_change_keeps_position() {
        let mut clock = PlaybackClock::new(Tempo::default());
        clock.play(0.0, 0.0);
        clock.set_tempo(Tempo::new(60.0, 4.0).unwrap(), 2.0, 2.0);
        assert!(close(clock.position(), 1.0));
        // One measure at 60 bpm in 4/4 takes four seconds.
        assert!(close(clock.advance(6.0), 2.0));
    }

    #[test]
    fn test_rebase_tempo_anchors_at_last_position() {
        let mut clock = PlaybackClock::new(Tempo::default());
        clock.play(0.0, 0.0);
        clock.advance(2.0);
        clock.rebase_tempo(Tempo::new(60.0, 4.0).unwrap());
        assert!(close(clock.audio_time_of(1.0), 2.0));
        assert!(close(clock.advance(6.0), 2.0));
    }

    #[test]
    fn test_listener_sees_positions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut clock = PlaybackClock::new(Tempo::default());
        clock.set_position_listener(Some(Box::new(move |p| sink.lock().unwrap().push(p))));
        clock.play(0.0, 0.0);
        clock.advance(1.0);
        clock.advance(2.0);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
