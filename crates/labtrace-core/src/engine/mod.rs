//! Collector engine: emission scheduling and task orchestration.

mod collector;
mod scheduler;

pub use collector::{Collector, CollectorSummary, RunningCollector};
pub use scheduler::{EmissionScheduler, EmissionTimer};
