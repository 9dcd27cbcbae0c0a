//! Collector metrics.

mod prometheus;

pub use prometheus::{CollectorMetrics, HoldTimeHistogram, DEFAULT_PREFIX};
