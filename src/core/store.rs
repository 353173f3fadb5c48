//! Shared store of the latest reading per source.
//!
//! Each source owns one slot behind its own lock. A slot is replaced as a
//! unit, so readers never see a half-written reading, and writers to
//! different slots never contend. Snapshots are best-effort: slots are read
//! one after another with no cross-slot consistency.

use crate::source::{Reading, SourceError, SourceKind};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The latest state of one source.
#[derive(Debug, Clone, Default)]
pub struct ReadingSlot {
    /// Most recent successful reading, kept across failures
    pub reading: Option<Arc<Reading>>,
    /// When `reading` was captured
    pub captured_at: Option<Instant>,
    /// True once a poll succeeded and the debounce threshold has not been exceeded since
    pub available: bool,
    /// Failures since the last successful poll
    pub consecutive_failures: u32,
    /// Message of the most recent failure
    pub last_error: Option<String>,
}

impl ReadingSlot {
    /// Time since the held reading was captured.
    pub fn age(&self) -> Option<Duration> {
        self.captured_at.map(|t| t.elapsed())
    }

    /// The reading, but only while the source counts as available.
    pub fn current(&self) -> Option<&Reading> {
        if self.available {
            self.reading.as_deref()
        } else {
            None
        }
    }
}

/// A best-effort simultaneous view of all three slots.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    slots: [ReadingSlot; 3],
}

impl Snapshot {
    pub fn slot(&self, kind: SourceKind) -> &ReadingSlot {
        &self.slots[kind.index()]
    }

    pub fn gps(&self) -> &ReadingSlot {
        self.slot(SourceKind::Gps)
    }

    pub fn environment(&self) -> &ReadingSlot {
        self.slot(SourceKind::Environment)
    }

    pub fn system(&self) -> &ReadingSlot {
        self.slot(SourceKind::System)
    }
}

/// Concurrency-safe mapping from source to its latest reading.
#[derive(Debug)]
pub struct ReadingStore {
    slots: [RwLock<ReadingSlot>; 3],
    debounce_threshold: u32,
}

impl ReadingStore {
    /// Create an empty store. A source is marked unavailable once its
    /// consecutive failures exceed `debounce_threshold`.
    pub fn new(debounce_threshold: u32) -> Self {
        Self {
            slots: Default::default(),
            debounce_threshold,
        }
    }

    pub fn debounce_threshold(&self) -> u32 {
        self.debounce_threshold
    }

    /// Store a fresh reading and clear the failure state.
    pub fn update(&self, reading: Reading) {
        self.update_at(reading, Instant::now());
    }

    /// Like [`update`](Self::update), for a reading captured at `captured_at`.
    pub fn update_at(&self, reading: Reading, captured_at: Instant) {
        let kind = reading.kind();
        let reading = Arc::new(reading);
        let mut slot = self.slots[kind.index()].write();

        if !slot.available && slot.reading.is_some() {
            info!(source = %kind, "source recovered");
        }

        slot.reading = Some(reading);
        slot.captured_at = Some(captured_at);
        slot.available = true;
        slot.consecutive_failures = 0;
        slot.last_error = None;
    }

    /// Record a failed poll. The previous reading is kept; availability drops
    /// only after more than `debounce_threshold` failures in a row.
    ///
    /// Returns whether the source still counts as available.
    pub fn record_failure(&self, kind: SourceKind, error: &SourceError) -> bool {
        let mut slot = self.slots[kind.index()].write();

        slot.consecutive_failures = slot.consecutive_failures.saturating_add(1);
        slot.last_error = Some(error.to_string());

        if slot.available && slot.consecutive_failures > self.debounce_threshold {
            slot.available = false;
            warn!(
                source = %kind,
                failures = slot.consecutive_failures,
                error = %error,
                "source marked unavailable"
            );
        }

        slot.available
    }

    /// Copy of one slot.
    pub fn slot(&self, kind: SourceKind) -> ReadingSlot {
        self.slots[kind.index()].read().clone()
    }

    /// Read every slot. Each slot is copied atomically.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            slots: [
                self.slot(SourceKind::Gps),
                self.slot(SourceKind::Environment),
                self.slot(SourceKind::System),
            ],
        }
    }

    /// Forget all readings (new session).
    pub fn reset(&self) {
        for slot in &self.slots {
            *slot.write() = ReadingSlot::default();
        }
    }
}
