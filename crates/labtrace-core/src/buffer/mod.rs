//! Retention buffer that restores timestamp order.
//!
//! Records arrive out of order from the transport and are held until their
//! deadline, long enough for late older records to overtake them.

mod reorder;

pub use reorder::{InsertOutcome, PendingRecord, ReorderBuffer, GAP_UNIT};
