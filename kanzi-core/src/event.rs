//! Block events and listeners.
//!
//! Both streams publish per-block progress events. Entropy-stage events
//! fire inside the serialized bit-stream region and arrive in block order;
//! transform-stage events fire from the workers and may interleave.

use std::fmt;

/// Type of a block event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Compression of a stream started.
    CompressionStart,
    /// Compression of a stream finished.
    CompressionEnd,
    /// A block is about to enter the forward transform sequence.
    BeforeTransform,
    /// A block left the transform sequence (either direction).
    AfterTransform,
    /// A block is about to be entropy coded or decoded.
    BeforeEntropy,
    /// A block left the entropy stage.
    AfterEntropy,
    /// Decompression of a stream started.
    DecompressionStart,
    /// Decompression of a stream finished.
    DecompressionEnd,
    /// The container header was parsed.
    AfterHeaderDecoding,
}

/// A progress event tied to one block (or the whole stream for start/end).
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub event_type: EventType,
    /// 1-based block id, 0 for stream-level events.
    pub block_id: u32,
    /// Byte count relevant to the stage, -1 when unknown.
    pub size: i64,
    /// Block checksum when checksums are enabled.
    pub hash: Option<u32>,
}

impl Event {
    /// Create a new event.
    pub fn new(event_type: EventType, block_id: u32, size: i64, hash: Option<u32>) -> Self {
        Self {
            event_type,
            block_id,
            size,
            hash,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} block {} size {}",
            self.event_type, self.block_id, self.size
        )?;

        if let Some(h) = self.hash {
            write!(f, " hash {:08x}", h)?;
        }

        Ok(())
    }
}

/// Receiver of block events.
///
/// Listeners are shared across worker threads, hence the bounds.
pub trait Listener: Send + Sync {
    /// Called for every published event.
    fn process_event(&self, event: &Event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<u32>>);

    impl Listener for Recorder {
        fn process_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.block_id);
        }
    }

    #[test]
    fn test_listener_receives_events() {
        let rec = Recorder(Mutex::new(Vec::new()));

        for id in 1..=3 {
            rec.process_event(&Event::new(EventType::AfterEntropy, id, 100, None));
        }

        assert_eq!(*rec.0.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_event_display() {
        let evt = Event::new(EventType::AfterTransform, 7, 4096, Some(0xABCD));
        let s = evt.to_string();
        assert!(s.contains("block 7"));
        assert!(s.contains("0000abcd"));
    }
}
