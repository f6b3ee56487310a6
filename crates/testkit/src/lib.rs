#![warn(missing_docs)]
//! Deterministic testing surfaces: steppable time sources, event-stream
//! helpers, and newline-delimited JSON trace sinks.

use anyhow::Result;
use ironveil_core::{SimTick, TimeSource};
use ironveil_net::{ConnectionEvent, EventReceiver};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Manually stepped wall clock for identity-generation tests.
#[derive(Debug)]
pub struct ManualTimeSource {
    now_ms: AtomicU64,
}

impl ManualTimeSource {
    /// Clock frozen at `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Jump the clock to an absolute millisecond (backward jumps allowed).
    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    /// Step the clock forward.
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Wait up to `ms` milliseconds for the next connection event.
pub async fn next_event_within(events: &mut EventReceiver, ms: u64) -> Option<ConnectionEvent> {
    tokio::time::timeout(Duration::from_millis(ms), events.recv())
        .await
        .ok()
        .flatten()
}

/// Collect frame payloads until `count` arrive or `ms` milliseconds lapse.
///
/// Non-frame events are skipped; the result may be shorter than `count` if
/// the deadline hits first.
pub async fn collect_frames(events: &mut EventReceiver, count: usize, ms: u64) -> Vec<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
    let mut frames = Vec::new();
    while frames.len() < count {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::time::sleep_until(deadline) => None,
        };
        match event {
            Some(ConnectionEvent::Frame(payload)) => frames.push(payload),
            Some(_) => {}
            None => break,
        }
    }
    frames
}

/// Primary event record captured by headless tests.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// Simulation tick when the event occurred.
    pub tick: SimTick,
    /// Human-readable kind label.
    pub kind: &'a str,
    /// Free-form payload for smoke tests.
    pub payload: &'a str,
}

/// A sink that writes newline-delimited JSON to disk.
pub struct JsonlSink {
    file: File,
}

impl JsonlSink {
    /// Create a new sink at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self { file })
    }

    /// Append an event to the log.
    pub fn write(&mut self, event: &EventRecord<'_>) -> Result<()> {
        let line = serde_json::to_string(event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironveil_core::IdentityGenerator;
    use std::sync::Arc;

    #[test]
    fn manual_time_source_steps_and_jumps() {
        let clock = ManualTimeSource::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(50);
        assert_eq!(clock.now_millis(), 1_050);
        clock.set(900);
        assert_eq!(clock.now_millis(), 900);
    }

    #[test]
    fn backward_jump_stalls_identity_minting_until_recovery() {
        let clock = Arc::new(ManualTimeSource::new(ironveil_core::EPOCH_MS + 10_000));
        let gen = Arc::new(
            IdentityGenerator::with_time_source(8, Box::new(SharedClock(Arc::clone(&clock))))
                .expect("valid shard"),
        );

        let first = gen.generate();

        // Jump the wall clock backward, then recover it from another thread
        // while the generator spins.
        clock.set(ironveil_core::EPOCH_MS + 9_000);
        let recover = {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                clock.set(ironveil_core::EPOCH_MS + 10_001);
            })
        };

        let second = gen.generate();
        recover.join().expect("recovery thread");

        assert!(second.timestamp_ms() >= first.timestamp_ms());
        assert!(second > first);
    }

    /// Adapter so one manual clock can be shared with a generator.
    struct SharedClock(Arc<ManualTimeSource>);

    impl TimeSource for SharedClock {
        fn now_millis(&self) -> u64 {
            self.0.now_millis()
        }
    }

    #[test]
    fn event_records_serialize_to_jsonl() {
        let path = std::env::temp_dir().join(format!(
            "ironveil_testkit_{}.jsonl",
            std::process::id()
        ));
        let mut sink = JsonlSink::create(&path).expect("create sink");
        sink.write(&EventRecord {
            tick: SimTick::ZERO.advance(4),
            kind: "TickAnnounce",
            payload: "ok",
        })
        .expect("write record");
        drop(sink);

        let contents = std::fs::read_to_string(&path).expect("read log");
        assert!(contents.contains("TickAnnounce"));
        let _ = std::fs::remove_file(&path);
    }
}
