//! Single-timer emission scheduler.
//!
//! The scheduler owns the reorder buffer and exactly one timer. The timer is
//! a single `Sleep` that is reset in place, so there is never more than one
//! pending emission per collector, and it always targets the deadline of the
//! buffer's tail.

use crate::buffer::{InsertOutcome, PendingRecord, ReorderBuffer};
use crate::record::DecodedRecord;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep_until, Instant, Sleep};
use tracing::trace;

/// One resettable timer.
///
/// The underlying `Sleep` is created on first use so the timer can be built
/// outside a runtime.
#[derive(Debug, Default)]
pub struct EmissionTimer {
    sleep: Option<Pin<Box<Sleep>>>,
    deadline: Option<Instant>,
    reschedules: u64,
}

impl EmissionTimer {
    /// Create a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the timer at `deadline`, replacing any previous target.
    pub fn arm(&mut self, deadline: Instant) {
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }
        self.deadline = Some(deadline);
        self.reschedules += 1;
    }

    /// Cancel the pending emission.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Deadline the timer is armed for.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check if an emission is pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Number of times the timer has been (re)armed.
    pub fn reschedules(&self) -> u64 {
        self.reschedules
    }

    /// Complete when the armed deadline is reached; never completes while
    /// disarmed.
    pub async fn expired(&mut self) {
        match (self.deadline, self.sleep.as_mut()) {
            (Some(_), Some(sleep)) => sleep.as_mut().await,
            _ => std::future::pending().await,
        }
    }
}

/// Reorder buffer paired with its emission timer.
#[derive(Debug)]
pub struct EmissionScheduler {
    buffer: ReorderBuffer,
    timer: EmissionTimer,
}

impl EmissionScheduler {
    /// Create a scheduler with the given retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            buffer: ReorderBuffer::new(retention),
            timer: EmissionTimer::new(),
        }
    }

    /// Buffer a record and retarget the timer if it became the oldest.
    pub fn submit(&mut self, record: DecodedRecord, now: Instant) -> InsertOutcome {
        let outcome = self.buffer.insert(record, now);
        if outcome.is_tail {
            if let Some(deadline) = self.buffer.tail_deadline() {
                self.timer.arm(deadline);
            }
        }
        outcome
    }

    /// Pop the oldest record and retarget the timer at the next one.
    ///
    /// Called when the timer expires; removes at most one record.
    pub fn fire(&mut self) -> Option<PendingRecord> {
        let record = self.buffer.pop_oldest();
        match self.buffer.tail_deadline() {
            Some(deadline) => self.timer.arm(deadline),
            None => self.timer.disarm(),
        }
        trace!(
            emitted = record.is_some(),
            pending = self.buffer.len(),
            "Emission timer fired"
        );
        record
    }

    /// Wait for the timer to expire.
    pub async fn expired(&mut self) {
        self.timer.expired().await
    }

    /// Deadline of the next emission.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Number of pending records.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Read access to the buffer.
    pub fn buffer(&self) -> &ReorderBuffer {
        &self.buffer
    }

    /// Number of times the timer has been (re)armed.
    pub fn reschedules(&self) -> u64 {
        self.timer.reschedules()
    }

    /// Cancel the timer and drop every pending record.
    pub fn discard(&mut self) -> usize {
        self.timer.disarm();
        self.buffer.clear()
    }
}
