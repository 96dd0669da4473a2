// src/voice_registry.rs

use std::collections::HashMap;

use crate::context::AudioContext;
use crate::voice::{Voice, VoiceKey};

/// Tracks realtime voices so they can be released, cancelled and reaped.
///
/// Responsibilities:
/// - map voice identity to its nodes
/// - release sounding voices and drop pending ones on pause
/// - evict voices whose tail has finished
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    voices: HashMap<VoiceKey, Voice>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a voice. A voice already under the same key is retired
    /// immediately so a retrigger never stacks.
    pub fn insert(&mut self, ctx: &mut AudioContext, key: VoiceKey, voice: Voice) {
        if let Some(old) = self.voices.insert(key, voice) {
            old.dispose(ctx);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn get(&self, key: &VoiceKey) -> Option<&Voice> {
        self.voices.get(key)
    }

    pub fn count_for_track(&self, track_id: &str) -> usize {
        self.voices.keys().filter(|k| k.track_id() == track_id).count()
    }

    /// Evict voices whose end time plus `safety` has passed.
    /// Returns how many were removed.
    pub fn reap(&mut self, ctx: &mut AudioContext, now: f64, safety: f64) -> usize {
        let before = self.voices.len();
        self.voices.retain(|_, voice| {
            if voice.is_finished(now, safety) {
                voice.dispose(ctx);
                false
            } else {
                true
            }
        });
        let reaped = before - self.voices.len();
        if reaped > 0 {
            log::debug!("reaped {reaped} voices, {} remain", self.voices.len());
        }
        reaped
    }

    /// Pause semantics: sounding voices fade out from `now`, voices that
    /// have not started yet are removed outright.
    pub fn release_all(&mut self, ctx: &mut AudioContext, now: f64) {
        self.voices.retain(|_, voice| {
            if voice.is_pending(now) {
                voice.dispose(ctx);
                return false;
            }
            voice.release(ctx, now);
            true
        });
    }

    /// Remove every voice of a track immediately.
    pub fn remove_track(&mut self, ctx: &mut AudioContext, track_id: &str) {
        self.voices.retain(|key, voice| {
            if key.track_id() == track_id {
                voice.dispose(ctx);
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::nodes::Waveform;

    fn voice(ctx: &mut AudioContext, track: &str, start: f64, end: f64) -> Voice {
        let osc = ctx.create_oscillator(Waveform::Sine);
        let gain = ctx.create_gain(1.0);
        ctx.connect(osc, gain);
        ctx.start(osc, start);
        ctx.stop(osc, end);
        Voice {
            track_id: track.to_string(),
            nodes: vec![osc, gain],
            sources: vec![osc],
            output: gain,
            release: 0.1,
            start_time: start,
            end_time: end,
        }
    }

    fn ctx() -> AudioContext {
        AudioContext::realtime(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_reap_removes_expired_voices_and_nodes() {
        let mut ctx = ctx();
        let mut reg = VoiceRegistry::new();
        let v = voice(&mut ctx, "a", 0.0, 1.0);
        let osc = v.sources[0];
        reg.insert(&mut ctx, VoiceKey::note("a", 0, 60, 0.0), v);
        let v = voice(&mut ctx, "a", 0.0, 5.0);
        reg.insert(&mut ctx, VoiceKey::note("a", 0, 62, 0.0), v);

        assert_eq!(reg.reap(&mut ctx, 1.05, 0.1), 0);
        assert_eq!(reg.reap(&mut ctx, 1.2, 0.1), 1);
        assert_eq!(reg.len(), 1);
        assert!(!ctx.contains(osc));
    }

    #[test]
    fn test_release_all_drops_pending_and_fades_sounding() {
        let mut ctx = ctx();
        let mut reg = VoiceRegistry::new();
        let sounding = voice(&mut ctx, "a", 0.0, 4.0);
        let sounding_osc = sounding.sources[0];
        reg.insert(&mut ctx, VoiceKey::note("a", 0, 60, 0.0), sounding);
        let pending = voice(&mut ctx, "a", 3.0, 4.0);
        let pending_osc = pending.sources[0];
        reg.insert(&mut ctx, VoiceKey::note("a", 0, 64, 3.0), pending);

        reg.release_all(&mut ctx, 1.0);

        assert_eq!(reg.len(), 1);
        assert!(!ctx.contains(pending_osc));
        let stop = ctx.schedule(sounding_osc).unwrap().stop.unwrap();
        assert!((stop - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_same_key_replaces_previous_voice() {
        let mut ctx = ctx();
        let mut reg = VoiceRegistry::new();
        let first = voice(&mut ctx, "a", 0.0, 1.0);
        let first_osc = first.sources[0];
        reg.insert(&mut ctx, VoiceKey::note("a", 0, 60, 0.0), first);
        let second = voice(&mut ctx, "a", 0.0, 1.0);
        reg.insert(&mut ctx, VoiceKey::note("a", 0, 60, 0.0), second);

        assert_eq!(reg.len(), 1);
        assert!(!ctx.contains(first_osc));
    }

    #[test]
    fn test_remove_track_only_touches_that_track() {
        let mut ctx = ctx();
        let mut reg = VoiceRegistry::new();
        let a = voice(&mut ctx, "a", 0.0, 1.0);
        reg.insert(&mut ctx, VoiceKey::note("a", 0, 60, 0.0), a);
        let b = voice(&mut ctx, "b", 0.0, 1.0);
        reg.insert(&mut ctx, VoiceKey::note("b", 0, 60, 0.0), b);

        reg.remove_track(&mut ctx, "a");
        assert_eq!(reg.count_for_track("a"), 0);
        assert_eq!(reg.count_for_track("b"), 1);
    }
}
