//! Record decoding: capture timestamp plus opaque payload.

mod extractor;

pub use extractor::{
    CaptureHeader, DecodedRecord, Extractor, Payload, CAPTURE_HEADER_LEN,
};
