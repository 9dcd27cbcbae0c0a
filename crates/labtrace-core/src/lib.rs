//! labtrace core - timestamp-reordering trace collector
//!
//! Measurement nodes publish timestamped events (structured documents or raw
//! packet captures) over MQTT while an experiment runs. Delivery order is not
//! capture order, so this library:
//!
//! - decodes each message into a capture timestamp plus an opaque payload
//! - holds records in a retention buffer sorted by timestamp
//! - emits them through a single rescheduled timer in non-decreasing
//!   timestamp order
//! - writes them to a JSON-lines or pcap output file

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod record;
pub mod sink;
pub mod transport;

// Re-export commonly used types
pub use config::{Config, RecordFormat};
pub use engine::{Collector, CollectorSummary, RunningCollector};
pub use error::{DecodeError, SinkError, TransportError};
pub use error::{Error, Result};
