//! Output writer for emitted records.

use crate::config::RecordFormat;
use crate::record::Payload;
use crate::{Error, Result, SinkError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// pcap global header: little-endian magic, version 2.4, UTC, zero
/// accuracy, 65535-byte snapshot length, link type 147 (user-defined DLT 0).
pub const PCAP_GLOBAL_HEADER: [u8; 24] = [
    0xD4, 0xC3, 0xB2, 0xA1, // magic
    0x02, 0x00, 0x04, 0x00, // version major, minor
    0x00, 0x00, 0x00, 0x00, // timezone offset
    0x00, 0x00, 0x00, 0x00, // timestamp accuracy
    0xFF, 0xFF, 0x00, 0x00, // snapshot length
    0x93, 0x00, 0x00, 0x00, // link-layer type
];

/// Appends emitted records to an output destination.
pub struct SinkWriter {
    format: RecordFormat,
    out: Box<dyn Write + Send>,
    destination: String,
    started: bool,
    records_written: u64,
    bytes_written: u64,
}

impl SinkWriter {
    /// Wrap an arbitrary writer.
    pub fn new(
        format: RecordFormat,
        out: impl Write + Send + 'static,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            format,
            out: Box::new(out),
            destination: destination.into(),
            started: false,
            records_written: 0,
            bytes_written: 0,
        }
    }

    /// Create (or truncate) an output file.
    pub fn create(format: RecordFormat, path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            Error::Sink(SinkError::Open {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        })?;

        info!(path = %path.display(), format = %format, "Output file opened");

        Ok(Self::new(
            format,
            BufWriter::new(file),
            path.display().to_string(),
        ))
    }

    /// Start the collection, writing the capture header in raw mode.
    ///
    /// Only the first call writes anything.
    pub fn begin(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        if self.format == RecordFormat::RawCapture {
            self.write_bytes(&PCAP_GLOBAL_HEADER)?;
            self.flush()?;
            debug!(destination = %self.destination, "Capture header written");
        }
        Ok(())
    }

    /// Append one emitted record and flush it through.
    ///
    /// Returns the number of bytes written for the record.
    pub fn write(&mut self, payload: &Payload) -> Result<usize> {
        self.begin()?;

        let written = match (self.format, payload) {
            (RecordFormat::Structured, Payload::Structured(document)) => {
                let mut line = serde_json::to_vec(document)?;
                line.push(b'\n');
                self.write_bytes(&line)?;
                line.len()
            }
            (RecordFormat::RawCapture, Payload::Raw(bytes)) => {
                self.write_bytes(bytes)?;
                bytes.len()
            }
            (expected, other) => {
                return Err(Error::Sink(SinkError::FormatMismatch {
                    expected: expected.as_str(),
                    actual: other.format().as_str(),
                }));
            }
        };

        self.flush()?;
        self.records_written += 1;
        Ok(written)
    }

    /// Flush buffered output.
    pub fn flush(&mut self) -> Result<()> {
        self.out
            .flush()
            .map_err(|e| Error::Sink(SinkError::WriteFailed(e.to_string())))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.out
            .write_all(bytes)
            .map_err(|e| Error::Sink(SinkError::WriteFailed(e.to_string())))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Output format.
    pub fn format(&self) -> RecordFormat {
        self.format
    }

    /// Human-readable destination (file path or label).
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Records written so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Bytes written so far, header included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl std::fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkWriter")
            .field("format", &self.format)
            .field("destination", &self.destination)
            .field("records_written", &self.records_written)
            .finish()
    }
}
