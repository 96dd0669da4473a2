// src/state/audio_pool.rs
//
// Decoded source audio, keyed by file id.
//
// Decoding and upload happen in the host. The engine only asks for a
// decoded buffer and skips the region when there is none.

use std::collections::HashMap;
use std::sync::Arc;

use crate::audio_buffer::{SampleBuffer, SharedSampleBuffer};

/// Lookup of decoded buffers by file id.
pub trait DecodedBufferSource {
    fn decoded_buffer(&self, file_id: &str) -> Option<SharedSampleBuffer>;
}

/// In-memory pool of decoded audio.
///
/// Using Arc allows cheap sharing between the realtime and offline contexts.
#[derive(Debug, Clone, Default)]
pub struct AudioPool {
    buffers: HashMap<String, SharedSampleBuffer>,
}

impl AudioPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file_id: impl Into<String>, buffer: SampleBuffer) -> SharedSampleBuffer {
        let buffer = Arc::new(buffer);
        self.buffers.insert(file_id.into(), Arc::clone(&buffer));
        buffer
    }

    pub fn remove(&mut self, file_id: &str) -> Option<SharedSampleBuffer> {
        self.buffers.remove(file_id)
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.buffers.contains_key(file_id)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl DecodedBufferSource for AudioPool {
    fn decoded_buffer(&self, file_id: &str) -> Option<SharedSampleBuffer> {
        self.buffers.get(file_id).cloned()
    }
}

impl<F> DecodedBufferSource for F
where
    F: Fn(&str) -> Option<SharedSampleBuffer>,
{
    fn decoded_buffer(&self, file_id: &str) -> Option<SharedSampleBuffer> {
        self(file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_shares_buffers() {
        let mut pool = AudioPool::new();
        let inserted = pool.insert("a", SampleBuffer::new(2, 10, 44_100.0));
        let fetched = pool.decoded_buffer("a").unwrap();
        assert!(Arc::ptr_eq(&inserted, &fetched));
        assert!(pool.decoded_buffer("missing").is_none());
    }

    #[test]
    fn test_closures_act_as_sources() {
        let lookup = |id: &str| (id == "x").then(|| Arc::new(SampleBuffer::new(1, 1, 8_000.0)));
        assert!(lookup.decoded_buffer("x").is_some());
        assert!(lookup.decoded_buffer("y").is_none());
    }
}
