//! Timestamp-ordered retention buffer.
//!
//! Records are kept sorted by *descending* capture timestamp so the oldest
//! record, the next one to emit, sits at the tail of the vector and can be
//! popped in O(1).
//!
//! ## Deadlines
//!
//! A record becomes eligible for emission `retention` after it arrives. When
//! an older record arrives late, every newer record already buffered has its
//! deadline pushed to `now + retention + (newer.ts - older.ts)`, so a newer
//! record is never emitted ahead of an older one that arrived within the
//! window. Deadlines only ever move forward.
//!
//! The timestamp gap is applied at [`GAP_UNIT`] per unit of timestamp
//! difference, so a gap of 5 postpones by 5ms.

use crate::record::{DecodedRecord, Payload};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Extra delay per unit of timestamp gap when postponing newer records.
pub const GAP_UNIT: Duration = Duration::from_millis(1);

/// Upper bound for instant arithmetic, matching tokio's own far-future value.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A decoded record waiting for its deadline.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    /// Capture timestamp in seconds
    pub timestamp: f64,
    /// Body to emit
    pub payload: Payload,
    deadline: Instant,
    arrived_at: Instant,
}

impl PendingRecord {
    fn new(record: DecodedRecord, now: Instant, retention: Duration) -> Self {
        Self {
            timestamp: record.timestamp,
            payload: record.payload,
            deadline: offset_instant(now, retention),
            arrived_at: now,
        }
    }

    /// Instant at which the record may be emitted.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Instant at which the record entered the buffer.
    pub fn arrived_at(&self) -> Instant {
        self.arrived_at
    }

    /// Move the deadline to `candidate` if that is later.
    fn postpone(&mut self, candidate: Instant) -> bool {
        if candidate > self.deadline {
            self.deadline = candidate;
            true
        } else {
            false
        }
    }
}

/// What an insert did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Index of the new record, counted from the newest end
    pub position: usize,
    /// The new record is now the oldest one buffered
    pub is_tail: bool,
    /// Number of newer records whose deadline moved
    pub postponed: usize,
}

/// Buffer of pending records sorted by descending timestamp.
#[derive(Debug)]
pub struct ReorderBuffer {
    records: Vec<PendingRecord>,
    retention: Duration,
}

impl ReorderBuffer {
    /// Create an empty buffer with the given retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            records: Vec::new(),
            retention,
        }
    }

    /// Retention window.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a decoded record that arrived at `now`.
    ///
    /// Equal timestamps keep arrival order: the earlier arrival stays nearer
    /// the tail and is emitted first.
    pub fn insert(&mut self, record: DecodedRecord, now: Instant) -> InsertOutcome {
        let pending = PendingRecord::new(record, now, self.retention);
        let timestamp = pending.timestamp;

        // Everything before `position` is strictly newer.
        let position = self.records.partition_point(|r| r.timestamp > timestamp);
        self.records.insert(position, pending);

        let mut postponed = 0;
        for newer in &mut self.records[..position] {
            let gap = gap_duration(newer.timestamp - timestamp);
            let candidate = offset_instant(now, self.retention.saturating_add(gap));
            if newer.postpone(candidate) {
                postponed += 1;
            }
        }

        let is_tail = position + 1 == self.records.len();

        trace!(
            timestamp,
            position,
            postponed,
            is_tail,
            pending = self.records.len(),
            "Record buffered"
        );

        InsertOutcome {
            position,
            is_tail,
            postponed,
        }
    }

    /// The oldest pending record.
    pub fn tail(&self) -> Option<&PendingRecord> {
        self.records.last()
    }

    /// Deadline of the oldest pending record.
    pub fn tail_deadline(&self) -> Option<Instant> {
        self.tail().map(PendingRecord::deadline)
    }

    /// Remove and return the oldest pending record.
    pub fn pop_oldest(&mut self) -> Option<PendingRecord> {
        self.records.pop()
    }

    /// Pending records from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &PendingRecord> {
        self.records.iter()
    }

    /// Drop every pending record, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.records.len();
        self.records.clear();
        dropped
    }
}

/// Convert a positive timestamp gap to its postponement.
fn gap_duration(gap: f64) -> Duration {
    // Float to int casts saturate, so huge gaps clamp instead of wrapping.
    let nanos = (gap * GAP_UNIT.as_nanos() as f64).round() as u64;
    Duration::from_nanos(nanos).min(FAR_FUTURE)
}

/// `base + offset`, saturating at the far future instead of panicking.
fn offset_instant(base: Instant, offset: Duration) -> Instant {
    base.checked_add(offset.min(FAR_FUTURE))
        .unwrap_or_else(|| base + FAR_FUTURE)
}
