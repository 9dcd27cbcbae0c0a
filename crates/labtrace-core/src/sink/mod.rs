//! Durable output for reordered records.
//!
//! Structured records become one JSON document per line; raw captures are
//! written as a pcap file (global header once, then records verbatim).

mod memory;
mod writer;

pub use memory::SharedBuffer;
pub use writer::{SinkWriter, PCAP_GLOBAL_HEADER};
