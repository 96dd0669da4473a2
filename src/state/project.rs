// src/state/project.rs
//
// Project snapshot: tracks, regions and notes.
//
// The host owns the project and hands the engine an immutable snapshot.
// Field names follow the host's camelCase JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::instrument::SynthParams;
use crate::error::Result;
use crate::transport::Tempo;

pub type TrackId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    #[default]
    Instrument,
    Drums,
    Audio,
    Microphone,
}

/// A MIDI note inside a region. Times are position units relative to the
/// region start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiNote {
    pub pitch: u8,
    pub velocity: u8,
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub channel: u8,
}

impl MidiNote {
    pub fn new(pitch: u8, velocity: u8, start: f64, duration: f64) -> Self {
        Self {
            pitch,
            velocity,
            start,
            duration,
            channel: 0,
        }
    }

    #[inline]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// What a region plays.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionContent {
    Audio {
        file_id: String,
        /// Seconds into the decoded file where the region begins.
        audio_start_offset: f64,
        /// Seconds into the decoded file where the region ends.
        audio_end_offset: Option<f64>,
    },
    Midi {
        midi_notes: Vec<MidiNote>,
    },
}

/// A time-positioned block of audio or MIDI on a track.
///
/// On the wire an audio region carries its file reference in a nested
/// `audio` object. The same fields placed directly on the region are
/// accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RegionJson", into = "RegionJson")]
pub struct Region {
    pub id: String,
    pub start: f64,
    pub duration: f64,
    pub content: RegionContent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RegionKind {
    Audio,
    Midi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioRef {
    file_id: String,
    #[serde(default)]
    audio_start_offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_end_offset: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegionJson {
    #[serde(default)]
    id: String,
    start: f64,
    duration: f64,
    #[serde(rename = "type")]
    kind: RegionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<AudioRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    midi_notes: Option<Vec<MidiNote>>,

    // Flat audio fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_start_offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_end_offset: Option<f64>,
}

impl TryFrom<RegionJson> for Region {
    type Error = String;

    fn try_from(json: RegionJson) -> std::result::Result<Self, Self::Error> {
        let content = match json.kind {
            RegionKind::Midi => RegionContent::Midi {
                midi_notes: json.midi_notes.unwrap_or_default(),
            },
            RegionKind::Audio => match json.audio {
                Some(audio) => RegionContent::Audio {
                    file_id: audio.file_id,
                    audio_start_offset: audio.audio_start_offset,
                    audio_end_offset: audio.audio_end_offset,
                },
                None => RegionContent::Audio {
                    file_id: json
                        .file_id
                        .ok_or_else(|| format!("audio region {:?} has no fileId", json.id))?,
                    audio_start_offset: json.audio_start_offset.unwrap_or(0.0),
                    audio_end_offset: json.audio_end_offset,
                },
            },
        };
        Ok(Self {
            id: json.id,
            start: json.start,
            duration: json.duration,
            content,
        })
    }
}

impl From<Region> for RegionJson {
    fn from(region: Region) -> Self {
        let (kind, audio, midi_notes) = match region.content {
            RegionContent::Audio {
                file_id,
                audio_start_offset,
                audio_end_offset,
            } => (
                RegionKind::Audio,
                Some(AudioRef {
                    file_id,
                    audio_start_offset,
                    audio_end_offset,
                }),
                None,
            ),
            RegionContent::Midi { midi_notes } => (RegionKind::Midi, None, Some(midi_notes)),
        };
        Self {
            id: region.id,
            start: region.start,
            duration: region.duration,
            kind,
            audio,
            midi_notes,
            file_id: None,
            audio_start_offset: None,
            audio_end_offset: None,
        }
    }
}

impl Region {
    pub fn midi(id: &str, start: f64, duration: f64, notes: Vec<MidiNote>) -> Self {
        Self {
            id: id.to_string(),
            start,
            duration,
            content: RegionContent::Midi { midi_notes: notes },
        }
    }

    pub fn audio(id: &str, start: f64, duration: f64, file_id: &str, offset: f64) -> Self {
        Self {
            id: id.to_string(),
            start,
            duration,
            content: RegionContent::Audio {
                file_id: file_id.to_string(),
                audio_start_offset: offset,
                audio_end_offset: None,
            },
        }
    }

    #[inline]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    /// 0–100
    pub volume: f64,
    /// −100–100
    pub pan: f64,
    /// Reverb send, 0–100
    #[serde(rename = "reverbSend", alias = "reverb")]
    pub reverb: f64,
    pub mute: bool,
    pub solo: bool,
    #[serde(rename = "instrument", alias = "instrumentId")]
    pub instrument_id: Option<String>,
    pub track_type: TrackType,
    pub regions: Vec<Region>,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            volume: 80.0,
            pan: 0.0,
            reverb: 0.0,
            mute: false,
            solo: false,
            instrument_id: None,
            track_type: TrackType::Instrument,
            regions: Vec::new(),
        }
    }
}

impl Track {
    pub fn new(id: &str, track_type: TrackType) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            track_type,
            ..Self::default()
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub tempo: Tempo,
    pub tracks: Vec<Track>,
    /// Instrument definitions that override the built-in presets by id.
    pub instruments: HashMap<String, SynthParams>,
}

impl Project {
    pub fn new(tempo: Tempo) -> Self {
        Self {
            tempo,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let project: Self = serde_json::from_str(json)?;
        project.tempo.validate()?;
        Ok(project)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.solo)
    }

    pub fn has_regions(&self) -> bool {
        self.tracks.iter().any(|t| !t.regions.is_empty())
    }

    /// End of the last region, in position units.
    pub fn end_position(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.regions.iter())
            .map(Region::end)
            .fold(0.0, f64::max)
    }

    /// End of the last region, in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.tempo.pos_to_time(self.end_position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    const JSON: &str = r#"{
        "tempo": { "bpm": 90, "beatsPerMeasure": 3 },
        "tracks": [
            {
                "id": "keys",
                "volume": 64,
                "instrumentId": "pad",
                "trackType": "instrument",
                "regions": [
                    { "id": "r1", "start": 1, "duration": 2, "type": "midi",
                      "midiNotes": [ { "pitch": 60, "velocity": 100, "start": 0, "duration": 0.5 } ] }
                ]
            },
            {
                "id": "vox",
                "trackType": "audio",
                "regions": [
                    { "start": 0, "duration": 4, "type": "audio",
                      "fileId": "take-1", "audioStartOffset": 1.5 }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_host_json() {
        let project = Project::from_json(JSON).unwrap();
        assert_eq!(project.tempo.beats_per_measure, 3.0);

        let keys = project.track("keys").unwrap();
        assert_eq!(keys.volume, 64.0);
        assert_eq!(keys.pan, 0.0);
        match &keys.regions[0].content {
            RegionContent::Midi { midi_notes } => assert_eq!(midi_notes[0].pitch, 60),
            other => panic!("unexpected content {other:?}"),
        }

        let vox = project.track("vox").unwrap();
        assert_eq!(vox.track_type, TrackType::Audio);
        match &vox.regions[0].content {
            RegionContent::Audio {
                file_id,
                audio_start_offset,
                audio_end_offset,
            } => {
                assert_eq!(file_id, "take-1");
                assert_eq!(*audio_start_offset, 1.5);
                assert!(audio_end_offset.is_none());
            }
            other => panic!("unexpected content {other:?}"),
        }
        assert_eq!(project.end_position(), 4.0);
    }

    #[test]
    fn test_parse_nested_audio_and_host_track_names() {
        let json = r#"{
            "tempo": { "bpm": 120, "beatsPerMeasure": 4 },
            "tracks": [
                {
                    "id": "bass",
                    "volume": 50,
                    "pan": -20,
                    "reverbSend": 60,
                    "mute": false,
                    "solo": true,
                    "instrument": "bass",
                    "trackType": "instrument",
                    "regions": []
                },
                {
                    "id": "vox",
                    "trackType": "audio",
                    "regions": [
                        { "start": 1, "duration": 2, "type": "audio",
                          "audio": { "fileId": "take-2", "audioStartOffset": 0.5, "audioEndOffset": 3 } }
                    ]
                }
            ]
        }"#;
        let project = Project::from_json(json).unwrap();

        let bass = project.track("bass").unwrap();
        assert_eq!(bass.reverb, 60.0);
        assert_eq!(bass.instrument_id.as_deref(), Some("bass"));
        assert!(bass.solo);

        let vox = project.track("vox").unwrap();
        assert_eq!(
            vox.regions[0].content,
            RegionContent::Audio {
                file_id: "take-2".into(),
                audio_start_offset: 0.5,
                audio_end_offset: Some(3.0),
            }
        );

        let out = project.to_json().unwrap();
        assert!(out.contains(r#""reverbSend":60"#));
        assert!(out.contains(r#""audio":{"fileId":"take-2""#));
    }

    #[test]
    fn test_audio_region_without_file_is_rejected() {
        let json = r#"{ "tracks": [ { "id": "a", "regions": [
            { "start": 0, "duration": 1, "type": "audio" } ] } ] }"#;
        assert!(matches!(Project::from_json(json), Err(EngineError::Parse(_))));
    }

    #[test]
    fn test_bad_tempo_fails_parse() {
        let result = Project::from_json(r#"{ "tempo": { "bpm": -1, "beatsPerMeasure": 4 } }"#);
        assert!(matches!(result, Err(EngineError::InvalidTempo { .. })));
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        assert!(matches!(
            Project::from_json("{ tracks: "),
            Err(EngineError::Parse(_))
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_camel_case() {
        let project = Project::from_json(JSON).unwrap();
        let json = project.to_json().unwrap();
        assert!(json.contains("audioStartOffset"));
        assert!(json.contains(r#""instrument":"pad""#));
        assert_eq!(Project::from_json(&json).unwrap(), project);
    }
}
