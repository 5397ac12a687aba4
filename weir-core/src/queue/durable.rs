//! File-backed durable queue.
//!
//! Same interface as the in-memory queue, with every record persisted to a
//! single append-style file:
//!
//! ```text
//! +-------+---------+-----------+----------------------------------+
//! | magic | version | head off. | record | record | record | ...   |
//! | 4 B   | u32     | u64       |                                  |
//! +-------+---------+-----------+----------------------------------+
//! ```
//!
//! A push appends one record and advances the tail; a pop only rewrites
//! the head offset in the file header. The dead prefix left behind by pops
//! is reclaimed by compaction once it exceeds a threshold: the live
//! records are rewritten to a temporary file which atomically replaces the
//! original. Files written before the header existed are upgraded in place
//! on open.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::{Condvar, Mutex};

use super::PayloadQueue;
use crate::error::{Result, WeirError};
use crate::payload::{Payload, PayloadMeta, SPAN_ID_LEN, TRACE_ID_LEN};
use crate::token::StopToken;

const MAGIC: &[u8; 4] = b"WEIQ";
const VERSION: u32 = 1;
const FILE_HEADER_LEN: u64 = 16;
const HEAD_OFFSET_FIELD: u64 = 8;

/// Fixed record header: payload size, enqueue timestamp, flags, schema-id
/// length, trace id, span id.
const RECORD_HEADER_LEN: usize = 8 + 8 + 4 + 4 + TRACE_ID_LEN + SPAN_ID_LEN;

/// Compact once the dead prefix exceeds this many bytes, or half the file.
const COMPACT_BYTES: u64 = 4 * 1024 * 1024;

const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct DurableInner {
    items: VecDeque<Payload>,
    file: File,
    path: PathBuf,
    /// Absolute offset of the first live record.
    head: u64,
    /// Absolute offset one past the last record (append position).
    tail: u64,
    closed: bool,
}

/// A bounded queue whose contents survive process restarts.
///
/// Records are loaded back on construction, starting at the persisted head
/// offset, up to the configured capacity. A push that cannot be persisted
/// fails the push.
#[derive(Debug)]
pub struct DurableQueue {
    capacity: usize,
    inner: Mutex<DurableInner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl DurableQueue {
    /// Open or create a durable queue backed by `path`.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = Self::load(&path, capacity).map_err(|e| WeirError::Io {
            path: path.clone(),
            cause: e.to_string(),
        })?;

        Ok(Self {
            capacity,
            inner: Mutex::new(inner),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    /// The fixed capacity this queue was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// True when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    fn load(path: &Path, capacity: usize) -> io::Result<DurableInner> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let mut inner = DurableInner {
            items: VecDeque::new(),
            file,
            path: path.to_path_buf(),
            head: FILE_HEADER_LEN,
            tail: FILE_HEADER_LEN,
            closed: false,
        };

        if file_len == 0 {
            write_file_header(&mut inner.file, FILE_HEADER_LEN)?;
            return Ok(inner);
        }

        let mut magic = [0u8; 4];
        let legacy = if file_len >= 4 {
            inner.file.read_exact(&mut magic)?;
            &magic != MAGIC
        } else {
            true
        };

        let head = if legacy {
            // Pre-header file: records start at offset zero.
            0
        } else {
            let version = inner.file.read_u32::<LittleEndian>()?;
            if version != VERSION {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported durable queue version {version}"),
                ));
            }
            inner.file.read_u64::<LittleEndian>()?
        };

        inner.file.seek(SeekFrom::Start(head))?;
        let mut overflowed = false;
        let mut offset = head;
        while let Some(payload) = read_record(&mut inner.file)? {
            offset += record_len(&payload);
            if inner.items.len() < capacity {
                inner.items.push_back(payload);
            } else {
                overflowed = true;
            }
        }
        inner.head = head;
        inner.tail = offset;

        if legacy || overflowed {
            if overflowed {
                tracing::warn!(
                    path = %path.display(),
                    capacity,
                    "durable queue file holds more records than capacity; extras dropped"
                );
            }
            // Upgrade legacy layouts (and trim overflow) by rewriting.
            rewrite(&mut inner)?;
        }

        Ok(inner)
    }

    fn append_record(inner: &mut DurableInner, payload: &Payload) -> io::Result<()> {
        let record = encode_record(payload);
        inner.file.seek(SeekFrom::Start(inner.tail))?;
        inner.file.write_all(&record)?;
        inner.file.flush()?;
        inner.tail += record.len() as u64;
        Ok(())
    }

    fn advance_head(inner: &mut DurableInner, popped: &Payload) -> io::Result<()> {
        inner.head += record_len(popped);
        inner.file.seek(SeekFrom::Start(HEAD_OFFSET_FIELD))?;
        inner.file.write_u64::<LittleEndian>(inner.head)?;
        inner.file.flush()?;

        let dead = inner.head - FILE_HEADER_LEN;
        let used = inner.tail - FILE_HEADER_LEN;
        if dead >= COMPACT_BYTES || (dead > 0 && dead * 2 >= used) {
            rewrite(inner)?;
        }
        Ok(())
    }
}

impl PayloadQueue for DurableQueue {
    fn push(&self, item: Payload, stop: &StopToken) -> bool {
        let mut inner = self.inner.lock();
        while !inner.closed && !stop.stop_requested() && inner.items.len() == self.capacity {
            self.not_full.wait_for(&mut inner, WAIT_SLICE);
        }

        if inner.closed || stop.stop_requested() {
            return false;
        }

        if let Err(err) = Self::append_record(&mut inner, &item) {
            tracing::warn!(path = %inner.path.display(), %err, "durable queue push failed to persist");
            return false;
        }

        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    fn pop(&self, stop: &StopToken) -> Option<Payload> {
        let mut inner = self.inner.lock();
        while !inner.closed && !stop.stop_requested() && inner.items.is_empty() {
            self.not_empty.wait_for(&mut inner, WAIT_SLICE);
        }

        let item = inner.items.pop_front()?;
        if let Err(err) = Self::advance_head(&mut inner, &item) {
            tracing::warn!(path = %inner.path.display(), %err, "durable queue failed to persist head offset");
        }
        self.not_full.notify_one();
        Some(item)
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        if let Err(err) = inner.file.flush() {
            tracing::warn!(path = %inner.path.display(), %err, "durable queue flush on close failed");
        }
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

fn write_file_header(file: &mut File, head: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(MAGIC)?;
    file.write_u32::<LittleEndian>(VERSION)?;
    file.write_u64::<LittleEndian>(head)?;
    file.flush()
}

/// Serialized size of one record.
fn record_len(payload: &Payload) -> u64 {
    (RECORD_HEADER_LEN + payload.meta.schema_id.len() + payload.len()) as u64
}

fn encode_record(payload: &Payload) -> Vec<u8> {
    let mut buf = Vec::with_capacity(record_len(payload) as usize);
    // Writes into a Vec cannot fail.
    let _ = buf.write_u64::<LittleEndian>(payload.len() as u64);
    let _ = buf.write_u64::<LittleEndian>(payload.meta.enqueue_ts_ns);
    let _ = buf.write_u32::<LittleEndian>(payload.meta.flags);
    let _ = buf.write_u32::<LittleEndian>(payload.meta.schema_id.len() as u32);
    buf.extend_from_slice(&payload.meta.trace_id);
    buf.extend_from_slice(&payload.meta.span_id);
    buf.extend_from_slice(payload.meta.schema_id.as_bytes());
    buf.extend_from_slice(payload.bytes());
    buf
}

/// Read one record. Returns `Ok(None)` at a clean end of file; a truncated
/// trailing record is treated the same way.
fn read_record(file: &mut File) -> io::Result<Option<Payload>> {
    let mut header = [0u8; RECORD_HEADER_LEN];
    match file.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut cursor = &header[..];
    let payload_size = cursor.read_u64::<LittleEndian>()? as usize;
    let enqueue_ts_ns = cursor.read_u64::<LittleEndian>()?;
    let flags = cursor.read_u32::<LittleEndian>()?;
    let schema_len = cursor.read_u32::<LittleEndian>()? as usize;

    let mut meta = PayloadMeta {
        enqueue_ts_ns,
        flags,
        ..PayloadMeta::default()
    };
    cursor.read_exact(&mut meta.trace_id)?;
    cursor.read_exact(&mut meta.span_id)?;

    let mut schema_id = vec![0u8; schema_len];
    let mut buffer = vec![0u8; payload_size];
    match file
        .read_exact(&mut schema_id)
        .and_then(|()| file.read_exact(&mut buffer))
    {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    meta.schema_id = String::from_utf8_lossy(&schema_id).into_owned();
    Ok(Some(Payload::with_meta(buffer, meta)))
}

/// Rewrite the file from the in-memory queue and atomically swap it in.
/// Called with the queue mutex held, so no intermediate state is ever
/// observable.
fn rewrite(inner: &mut DurableInner) -> io::Result<()> {
    let tmp_path = inner.path.with_extension("tmp");
    let mut tmp = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    write_file_header(&mut tmp, FILE_HEADER_LEN)?;
    let mut tail = FILE_HEADER_LEN;
    for payload in &inner.items {
        let record = encode_record(payload);
        tmp.write_all(&record)?;
        tail += record.len() as u64;
    }
    tmp.flush()?;

    std::fs::rename(&tmp_path, &inner.path)?;
    inner.file = tmp;
    inner.head = FILE_HEADER_LEN;
    inner.tail = tail;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip_preserves_meta() {
        let mut meta = PayloadMeta {
            enqueue_ts_ns: 42,
            flags: 7,
            schema_id: "orders.v1".to_string(),
            ..PayloadMeta::default()
        };
        meta.trace_id[0] = 0xAA;
        meta.span_id[7] = 0x55;
        let payload = Payload::with_meta(vec![1u8, 2, 3], meta.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.q");
        {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .unwrap();
            file.write_all(&encode_record(&payload)).unwrap();
            file.seek(SeekFrom::Start(0)).unwrap();
            let read = read_record(&mut file).unwrap().unwrap();
            assert_eq!(read.bytes(), payload.bytes());
            assert_eq!(read.meta, meta);
        }
    }

    #[test]
    fn truncated_tail_reads_as_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.q");
        let payload = Payload::new(vec![9u8; 100]);
        let record = encode_record(&payload);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .unwrap();
        file.write_all(&record[..record.len() - 10]).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert!(read_record(&mut file).unwrap().is_none());
    }
}
