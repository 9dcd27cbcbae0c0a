//! Capture timestamp extraction for structured and raw-capture records.

use crate::config::{CollectorConfig, RecordFormat};
use crate::DecodeError;
use bytes::{Buf, Bytes};
use serde_json::Value;

/// Size of the per-record header that prefixes every raw capture.
pub const CAPTURE_HEADER_LEN: usize = 16;

/// Opaque record body, emitted unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Parsed structured document
    Structured(Value),
    /// Raw capture bytes, header included
    Raw(Bytes),
}

impl Payload {
    /// Name of the format this payload belongs to.
    pub fn format(&self) -> RecordFormat {
        match self {
            Payload::Structured(_) => RecordFormat::Structured,
            Payload::Raw(_) => RecordFormat::RawCapture,
        }
    }
}

/// A successfully decoded message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Capture timestamp in seconds
    pub timestamp: f64,
    /// Body to emit
    pub payload: Payload,
}

/// Per-record header of a raw capture, little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    pub seconds: u32,
    pub microseconds: u32,
    pub captured_length: u32,
    pub original_length: u32,
}

impl CaptureHeader {
    /// Parse the first 16 bytes of `data`.
    pub fn parse(mut data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < CAPTURE_HEADER_LEN {
            return Err(DecodeError::Truncated {
                len: data.len(),
                needed: CAPTURE_HEADER_LEN,
            });
        }

        Ok(Self {
            seconds: data.get_u32_le(),
            microseconds: data.get_u32_le(),
            captured_length: data.get_u32_le(),
            original_length: data.get_u32_le(),
        })
    }

    /// Capture time in fractional seconds.
    pub fn timestamp(&self) -> f64 {
        f64::from(self.seconds) + f64::from(self.microseconds) * 1e-6
    }
}

/// Timestamp extraction strategy, fixed when the collector is built.
#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    /// JSON documents carrying a numeric timestamp field
    Structured { timestamp_field: String },
    /// pcap records prefixed with a [`CaptureHeader`]
    RawCapture,
}

impl Extractor {
    /// Build the extractor for a record format.
    pub fn new(format: RecordFormat, timestamp_field: impl Into<String>) -> Self {
        match format {
            RecordFormat::Structured => Extractor::Structured {
                timestamp_field: timestamp_field.into(),
            },
            RecordFormat::RawCapture => Extractor::RawCapture,
        }
    }

    /// Build the extractor described by a collector configuration.
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self::new(config.record_type, config.timestamp_field.clone())
    }

    /// Record format handled by this extractor.
    pub fn format(&self) -> RecordFormat {
        match self {
            Extractor::Structured { .. } => RecordFormat::Structured,
            Extractor::RawCapture => RecordFormat::RawCapture,
        }
    }

    /// Decode a message body into its timestamp and emit-ready payload.
    pub fn decode(&self, message: Bytes) -> Result<DecodedRecord, DecodeError> {
        match self {
            Extractor::Structured { timestamp_field } => {
                let document: Value = serde_json::from_slice(&message)
                    .map_err(|e| DecodeError::Malformed(e.to_string()))?;

                let timestamp = document
                    .as_object()
                    .ok_or_else(|| DecodeError::Malformed("document is not an object".into()))?
                    .get(timestamp_field)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| DecodeError::MissingTimestamp {
                        field: timestamp_field.clone(),
                    })?;

                Ok(DecodedRecord {
                    timestamp,
                    payload: Payload::Structured(document),
                })
            }
            Extractor::RawCapture => {
                let header = CaptureHeader::parse(&message)?;
                Ok(DecodedRecord {
                    timestamp: header.timestamp(),
                    payload: Payload::Raw(message),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(seconds: u32, microseconds: u32, body: &[u8]) -> Bytes {
        let mut data = Vec::with_capacity(CAPTURE_HEADER_LEN + body.len());
        data.extend_from_slice(&seconds.to_le_bytes());
        data.extend_from_slice(&microseconds.to_le_bytes());
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(body);
        Bytes::from(data)
    }

    #[test]
    fn test_raw_capture_timestamp() {
        let extractor = Extractor::RawCapture;
        let record = extractor.decode(capture(1, 500_000, b"frame")).unwrap();
        assert!((record.timestamp - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_raw_capture_keeps_payload_verbatim() {
        let message = capture(1_466_000_000, 42, &[0xde, 0xad, 0xbe, 0xef]);
        let record = Extractor::RawCapture.decode(message.clone()).unwrap();
        assert_eq!(record.payload, Payload::Raw(message));
    }

    #[test]
    fn test_raw_capture_lengths_not_validated() {
        let mut data = capture(3, 0, b"").to_vec();
        // captured length claims far more than is present
        data[8..12].copy_from_slice(&9999u32.to_le_bytes());
        let record = Extractor::RawCapture.decode(Bytes::from(data)).unwrap();
        assert_eq!(record.timestamp, 3.0);
    }

    #[test]
    fn test_raw_capture_truncated() {
        let err = Extractor::RawCapture
            .decode(Bytes::from_static(&[0u8; 15]))
            .unwrap_err();
        assert_eq!(err, DecodeError::Truncated { len: 15, needed: 16 });
    }

    #[test]
    fn test_capture_header_fields() {
        let header = CaptureHeader::parse(&capture(7, 250, b"abc")).unwrap();
        assert_eq!(header.seconds, 7);
        assert_eq!(header.microseconds, 250);
        assert_eq!(header.captured_length, 3);
        assert_eq!(header.original_length, 3);
    }

    #[test]
    fn test_structured_timestamp() {
        let extractor = Extractor::new(RecordFormat::Structured, "timestamp");
        let record = extractor
            .decode(Bytes::from_static(br#"{"node":"a1","timestamp":12.25}"#))
            .unwrap();
        assert_eq!(record.timestamp, 12.25);
        match record.payload {
            Payload::Structured(doc) => assert_eq!(doc["node"], "a1"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_structured_integer_timestamp() {
        let extractor = Extractor::new(RecordFormat::Structured, "ts");
        let record = extractor.decode(Bytes::from_static(br#"{"ts":10}"#)).unwrap();
        assert_eq!(record.timestamp, 10.0);
    }

    #[test]
    fn test_structured_malformed() {
        let extractor = Extractor::new(RecordFormat::Structured, "timestamp");
        let err = extractor.decode(Bytes::from_static(b"{not json")).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));

        let err = extractor.decode(Bytes::from_static(b"[1,2]")).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_structured_missing_timestamp() {
        let extractor = Extractor::new(RecordFormat::Structured, "timestamp");
        let err = extractor
            .decode(Bytes::from_static(br#"{"timestamp":"soon"}"#))
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::MissingTimestamp {
                field: "timestamp".into()
            }
        );
    }

    #[test]
    fn test_extractor_format() {
        assert_eq!(Extractor::RawCapture.format(), RecordFormat::RawCapture);
        let config = CollectorConfig::default();
        assert_eq!(
            Extractor::from_config(&config).format(),
            RecordFormat::Structured
        );
    }
}
