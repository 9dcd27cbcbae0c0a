//! In-memory output destination.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Cloneable byte buffer usable as a sink destination.
///
/// All clones share the same storage, so one clone can be handed to a
/// [`SinkWriter`](super::SinkWriter) while another inspects what was written.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    /// Contents decoded as UTF-8, lossily.
    pub fn contents_utf8(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
