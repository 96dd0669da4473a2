// src/main.rs
//
// Offline render of a small demo arrangement to a WAV file.
//
//   trackweave-render [out.wav] [project.json]

use std::error::Error;

use trackweave::{
    AudioPool, EngineConfig, MidiNote, OfflineRenderer, Project, Region, RenderOptions,
    SampleBuffer, Tempo, Track, TrackType,
};

// ===============================
// Demo project
// ===============================

fn demo_project() -> Project {
    let chord = |start: f64, root: u8| {
        [0u8, 4, 7].map(|step| MidiNote::new(root + step, 90, start, 0.45))
    };
    let keys_notes: Vec<MidiNote> = [(0.0, 60), (0.5, 65), (1.0, 67), (1.5, 60)]
        .into_iter()
        .flat_map(|(start, root)| chord(start, root))
        .collect();

    let bass_notes: Vec<MidiNote> = [36u8, 41, 43, 36]
        .iter()
        .enumerate()
        .flat_map(|(bar, &root)| {
            let start = bar as f64 * 0.5;
            [
                MidiNote::new(root, 110, start, 0.2),
                MidiNote::new(root, 90, start + 0.25, 0.2),
            ]
        })
        .collect();

    let mut drum_notes = Vec::new();
    for step in 0..16 {
        let start = step as f64 * 0.125;
        drum_notes.push(MidiNote::new(42, 70, start, 0.05));
        if step % 4 == 0 {
            drum_notes.push(MidiNote::new(36, 120, start, 0.1));
        }
        if step % 4 == 2 {
            drum_notes.push(MidiNote::new(38, 110, start, 0.1));
        }
    }
    drum_notes.push(MidiNote::new(49, 100, 0.0, 0.5));

    let keys = Track {
        instrument_id: Some("pad".to_string()),
        volume: 60.0,
        pan: -20.0,
        reverb: 35.0,
        ..Track::new("keys", TrackType::Instrument)
            .with_region(Region::midi("keys-1", 0.0, 2.0, keys_notes))
    };
    let bass = Track {
        instrument_id: Some("bass".to_string()),
        volume: 75.0,
        ..Track::new("bass", TrackType::Instrument)
            .with_region(Region::midi("bass-1", 0.0, 2.0, bass_notes))
    };
    let drums = Track {
        volume: 70.0,
        reverb: 10.0,
        ..Track::new("drums", TrackType::Drums)
            .with_region(Region::midi("drums-1", 0.0, 2.0, drum_notes))
    };
    let drone = Track {
        volume: 30.0,
        pan: 40.0,
        ..Track::new("drone", TrackType::Audio)
            .with_region(Region::audio("drone-1", 1.0, 1.0, "drone", 0.5))
    };

    Project::new(Tempo::default())
        .with_track(keys)
        .with_track(bass)
        .with_track(drums)
        .with_track(drone)
}

/// Stand-in for host-decoded audio: a slowly beating pair of sines.
fn drone_buffer(sample_rate: f64) -> SampleBuffer {
    let frames = (sample_rate * 6.0) as usize;
    let samples = (0..frames)
        .map(|i| {
            let t = i as f64 / sample_rate;
            let s = (t * 220.0 * std::f64::consts::TAU).sin() + (t * 221.5 * std::f64::consts::TAU).sin();
            (s * 0.25) as f32
        })
        .collect();
    SampleBuffer::from_channels(vec![samples], sample_rate)
}

// ===============================
// Main
// ===============================

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let out_path = args.next().unwrap_or_else(|| "demo.wav".to_string());
    let project = match args.next() {
        Some(path) => Project::from_json(&std::fs::read_to_string(path)?)?,
        None => demo_project(),
    };

    let config = EngineConfig::default();
    let mut pool = AudioPool::new();
    pool.insert("drone", drone_buffer(config.sample_rate));

    println!(
        "Rendering {} tracks, {:.2}s at {} Hz…",
        project.tracks.len(),
        project.duration_seconds(),
        config.sample_rate
    );

    let renderer = OfflineRenderer::new(config.clone());
    let out = renderer.render(&project, &pool, RenderOptions { tail_seconds: 1.0 })?;

    println!(
        "Scheduled {} voices ({} skipped), peak {:.3}",
        out.report.spans.len(),
        out.report.skipped,
        out.buffer.peak()
    );

    let spec = hound::WavSpec {
        channels: out.buffer.num_channels() as u16,
        sample_rate: config.sample_rate as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&out_path, spec)?;
    for sample in out.buffer.interleaved() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    println!("Wrote {} frames to {out_path}", out.buffer.frames());
    Ok(())
}
