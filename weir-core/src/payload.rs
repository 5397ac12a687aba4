//! Payload records flowing through queues.

use bytes::Bytes;

/// Length of the trace identifier carried in [`PayloadMeta`].
pub const TRACE_ID_LEN: usize = 16;

/// Length of the span identifier carried in [`PayloadMeta`].
pub const SPAN_ID_LEN: usize = 8;

/// Per-record metadata carried with each payload.
///
/// Small, fixed layout, cheap to clone. `enqueue_ts_ns` is stamped by the
/// stage runner at push time; stages never set it themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadMeta {
    /// Monotonic enqueue timestamp in nanoseconds, stamped by the runtime.
    pub enqueue_ts_ns: u64,

    /// W3C-style trace identifier; all zeros means no trace attached.
    pub trace_id: [u8; TRACE_ID_LEN],

    /// Span identifier within the trace.
    pub span_id: [u8; SPAN_ID_LEN],

    /// Bit flags (sampled, error, future use).
    pub flags: u32,

    /// Schema identifier; empty means unset.
    pub schema_id: String,
}

impl PayloadMeta {
    /// True when any trace byte is non-zero.
    pub fn has_trace(&self) -> bool {
        self.trace_id.iter().any(|b| *b != 0)
    }
}

/// A record flowing through queues: an owned, immutable byte buffer plus
/// metadata.
///
/// The buffer is a shared-ownership handle ([`Bytes`]); cloning a payload
/// never copies the bytes, and every holder observes the same immutable
/// contents.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    /// The record bytes.
    pub buffer: Bytes,

    /// Per-record metadata.
    pub meta: PayloadMeta,
}

impl Payload {
    /// Create a payload from a byte buffer with default metadata.
    pub fn new(buffer: impl Into<Bytes>) -> Self {
        Self {
            buffer: buffer.into(),
            meta: PayloadMeta::default(),
        }
    }

    /// Create a payload carrying the given metadata.
    pub fn with_meta(buffer: impl Into<Bytes>, meta: PayloadMeta) -> Self {
        Self {
            buffer: buffer.into(),
            meta,
        }
    }

    /// Number of valid bytes in the buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Read-only view of the record bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_has_zero_len() {
        let p = Payload::default();
        assert!(p.is_empty());
        assert_eq!(p.len(), 0);
    }

    #[test]
    fn clones_share_the_buffer() {
        let p = Payload::new(vec![1u8, 2, 3]);
        let q = p.clone();
        assert_eq!(p.bytes(), q.bytes());
        // Bytes clones are reference counted, not copied.
        assert_eq!(p.buffer.as_ptr(), q.buffer.as_ptr());
    }

    #[test]
    fn has_trace_detects_any_nonzero_byte() {
        let mut meta = PayloadMeta::default();
        assert!(!meta.has_trace());
        meta.trace_id[15] = 1;
        assert!(meta.has_trace());
    }
}
