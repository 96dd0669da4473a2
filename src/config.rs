// src/config.rs
//
// Engine configuration.
//
// Every field has a default so hosts can pass a partial JSON object.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default render quantum in frames.
pub const DEFAULT_MAX_BLOCK: usize = 128;
pub const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Sample rate in Hz.
    pub sample_rate: f64,

    /// Largest block the graph renders in one pass.
    pub max_block_size: usize,

    /// Output channel count of the master bus.
    pub channels: usize,

    /// Time constant (seconds) of smoothed parameter changes while playing.
    pub param_time_constant: f64,

    /// Extra time a voice is kept after its scheduled end before reaping.
    pub reaper_safety: f64,

    /// Notes shorter than this after clipping are dropped.
    pub min_note_duration: f64,

    /// Start times further than this in the past are clamped to now.
    pub late_start_tolerance: f64,

    pub reverb: ReverbConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_block_size: DEFAULT_MAX_BLOCK,
            channels: 2,
            param_time_constant: 0.01,
            reaper_safety: 0.1,
            min_note_duration: 0.001,
            late_start_tolerance: 0.005,
            reverb: ReverbConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no audio clock can run with.
    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(EngineError::AudioUnavailable(format!(
                "sample rate {} is not usable",
                self.sample_rate
            )));
        }
        if self.max_block_size == 0 {
            return Err(EngineError::AudioUnavailable(
                "block size must be at least one frame".into(),
            ));
        }
        if self.channels == 0 {
            return Err(EngineError::AudioUnavailable(
                "at least one output channel is required".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the generated reverb impulse response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReverbConfig {
    /// Impulse length in seconds.
    pub duration: f64,

    /// Exponent of the `(1 - t/len)` impulse envelope.
    pub decay: f64,

    /// Impulses per second in the sparse tail.
    pub density: f64,

    pub seed: u64,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            duration: 1.5,
            decay: 3.0,
            density: 1000.0,
            seed: 0x5EED_0F_AB,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "sampleRate": 48000 }"#).unwrap();
        assert_eq!(config.sample_rate, 48_000.0);
        assert_eq!(config.max_block_size, DEFAULT_MAX_BLOCK);
        assert!((config.param_time_constant - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_unusable_sample_rate_is_fatal() {
        let result = EngineConfig::from_json(r#"{ "sampleRate": 0 }"#);
        assert!(matches!(result, Err(EngineError::AudioUnavailable(_))));
    }
}
