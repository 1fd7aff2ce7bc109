//! Per-selection history log
//!
//! Each selection with a nonzero clip capacity gets one log file under
//! the data directory, most recent record first. A record is
//! `[u32 LE digest][u64 LE length][payload][separator byte]`; the
//! separator is a fixed sentinel, never used to find record boundaries,
//! only to detect corruption. The whole file may be compressed.
//!
//! Updates are merged rather than appended in place: the new record is
//! written first, older records follow with any record carrying the
//! same digest dropped, and writing stops at capacity. The merged log
//! replaces the old file atomically so a crash mid-write never loses
//! the previous log.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use clipd_utils::{ClipdError, Result};

/// Record separator sentinel
const SEPARATOR: u8 = 0x0A;

/// Bytes of header before each payload: u32 digest + u64 length
const HEADER_LEN: usize = 4 + 8;

/// Chunk size used when streaming record payloads to a visitor
pub const CHUNK_SIZE: usize = 1024;

/// Compression level passed to the zstd encoder
const ZSTD_LEVEL: i32 = 3;

/// Whole-file compression applied to history logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Uncompressed log files
    None,
    /// LZ4 with prepended size, fast with moderate ratio
    Lz4,
    /// Zstandard, better ratio at slightly more CPU
    Zstd,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd
    }
}

/// One streamed slice of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChunk<'a> {
    /// Record position in the log, 0 is most recent
    pub index: usize,
    /// Digest stored with the record
    pub hash: u32,
    /// Total payload length of the record
    pub total: usize,
    /// Offset of this chunk within the payload
    pub offset: usize,
    /// Payload slice, at most [`CHUNK_SIZE`] bytes
    pub chunk: &'a [u8],
}

/// Visitor verdict after each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// History log store rooted at a data directory
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
    compression: Compression,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, compression: Compression) -> Self {
        Self {
            dir: dir.into(),
            compression,
        }
    }

    /// Store rooted at the default data directory
    pub fn open_default(compression: Compression) -> Result<Self> {
        let dir = clipd_utils::paths::data_dir();
        clipd_utils::paths::ensure_dir(&dir)?;
        Ok(Self::new(dir, compression))
    }

    /// Log file path for a named selection
    pub fn log_path(&self, selection: &str) -> PathBuf {
        self.dir.join(format!("{selection}.hist"))
    }

    /// Merge a new record into the log for `selection`
    ///
    /// No-op when `max_clips` is zero. The new record lands at the
    /// front; any older record with the same digest is dropped and the
    /// log is truncated to `max_clips` records. The replacement is
    /// atomic, a failure at any point leaves the previous log intact.
    pub fn append(&self, selection: &str, hash: u32, data: &[u8], max_clips: usize) -> Result<()> {
        if max_clips == 0 {
            return Ok(());
        }

        let path = self.log_path(selection);
        let old = self.load_raw(&path)?;

        let mut merged = Vec::with_capacity(old.len() + data.len() + HEADER_LEN + 1);
        write_record(&mut merged, hash, data);
        let mut written = 1usize;

        let mut records = RecordIter::new(&old, &path);
        while written < max_clips {
            match records.next_record() {
                Some((old_hash, payload)) if old_hash != hash => {
                    write_record(&mut merged, old_hash, payload);
                    written += 1;
                }
                Some(_) => {} // dedup
                None => break,
            }
        }
        debug!(selection, records = written, "merged history log");

        let encoded = self.encode(merged)?;
        self.replace_log(&path, &encoded)
    }

    /// Stream records from the log for `selection`, most recent first
    ///
    /// Payloads are delivered in chunks of up to [`CHUNK_SIZE`] bytes;
    /// zero-length payloads still produce one empty chunk. A missing
    /// log streams nothing. A truncated tail is logged and streaming
    /// stops at the last intact record.
    pub fn stream<F>(&self, selection: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(RecordChunk<'_>) -> Visit,
    {
        let path = self.log_path(selection);
        let raw = self.load_raw(&path)?;

        let mut records = RecordIter::new(&raw, &path);
        let mut index = 0usize;
        while let Some((hash, payload)) = records.next_record() {
            let mut offset = 0;
            loop {
                let end = (offset + CHUNK_SIZE).min(payload.len());
                let verdict = visit(RecordChunk {
                    index,
                    hash,
                    total: payload.len(),
                    offset,
                    chunk: &payload[offset..end],
                });
                if verdict == Visit::Stop {
                    return Ok(());
                }
                offset = end;
                if offset >= payload.len() {
                    break;
                }
            }
            index += 1;
        }
        Ok(())
    }

    /// Most recent record for `selection`, if any
    pub fn latest(&self, selection: &str) -> Result<Option<(u32, Vec<u8>)>> {
        let mut found = None;
        self.stream(selection, |rec| {
            if rec.index > 0 {
                return Visit::Stop;
            }
            let (_, buf) = found.get_or_insert_with(|| (rec.hash, Vec::with_capacity(rec.total)));
            buf.extend_from_slice(rec.chunk);
            Visit::Continue
        })?;
        Ok(found)
    }

    /// Record at `index` (0 is most recent) for `selection`
    pub fn get(&self, selection: &str, index: usize) -> Result<Option<(u32, Vec<u8>)>> {
        let mut found = None;
        self.stream(selection, |rec| {
            if rec.index > index {
                return Visit::Stop;
            }
            if rec.index == index {
                let (_, buf) =
                    found.get_or_insert_with(|| (rec.hash, Vec::with_capacity(rec.total)));
                buf.extend_from_slice(rec.chunk);
            }
            Visit::Continue
        })?;
        Ok(found)
    }

    /// Record with the given digest for `selection`
    pub fn find(&self, selection: &str, hash: u32) -> Result<Option<Vec<u8>>> {
        let mut found: Option<Vec<u8>> = None;
        self.stream(selection, |rec| {
            if rec.hash == hash {
                found
                    .get_or_insert_with(|| Vec::with_capacity(rec.total))
                    .extend_from_slice(rec.chunk);
                if rec.offset + rec.chunk.len() >= rec.total {
                    return Visit::Stop;
                }
            }
            Visit::Continue
        })?;
        Ok(found)
    }

    /// Delete the log for `selection`; missing logs are fine
    pub fn clear(&self, selection: &str) -> Result<()> {
        let path = self.log_path(selection);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClipdError::FileWrite { path, source: e }),
        }
    }

    fn load_raw(&self, path: &Path) -> Result<Vec<u8>> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ClipdError::FileRead {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        if bytes.is_empty() {
            return Ok(bytes);
        }
        self.decode(bytes)
    }

    fn encode(&self, buf: Vec<u8>) -> Result<Vec<u8>> {
        match self.compression {
            Compression::None => Ok(buf),
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(&buf)),
            Compression::Zstd => zstd::encode_all(&buf[..], ZSTD_LEVEL)
                .map_err(|e| ClipdError::compression(format!("zstd encode: {e}"))),
        }
    }

    fn decode(&self, buf: Vec<u8>) -> Result<Vec<u8>> {
        match self.compression {
            Compression::None => Ok(buf),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(&buf)
                .map_err(|e| ClipdError::compression(format!("lz4 decode: {e}"))),
            Compression::Zstd => zstd::decode_all(&buf[..])
                .map_err(|e| ClipdError::compression(format!("zstd decode: {e}"))),
        }
    }

    fn replace_log(&self, path: &Path, encoded: &[u8]) -> Result<()> {
        clipd_utils::paths::ensure_dir(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(encoded)?;
        tmp.flush()?;
        tmp.persist(path)
            .map_err(|e| ClipdError::FileWrite {
                path: path.to_path_buf(),
                source: e.error,
            })?;
        Ok(())
    }
}

fn write_record(out: &mut Vec<u8>, hash: u32, payload: &[u8]) {
    out.extend_from_slice(&hash.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out.push(SEPARATOR);
}

/// Sequential record reader over a decoded log buffer
///
/// Stops at the first truncated or malformed record instead of
/// erroring, the intact prefix of a damaged log stays usable.
struct RecordIter<'a> {
    buf: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> RecordIter<'a> {
    fn new(buf: &'a [u8], path: &'a Path) -> Self {
        Self { buf, pos: 0, path }
    }

    fn next_record(&mut self) -> Option<(u32, &'a [u8])> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.pos..];
        if rest.len() < HEADER_LEN {
            warn!(path = %self.path.display(), "truncated history record header, stopping");
            self.pos = self.buf.len();
            return None;
        }
        let hash = u32::from_le_bytes(rest[0..4].try_into().unwrap());
        let len = u64::from_le_bytes(rest[4..12].try_into().unwrap()) as usize;
        if rest.len() < HEADER_LEN + len + 1 {
            warn!(path = %self.path.display(), "truncated history record payload, stopping");
            self.pos = self.buf.len();
            return None;
        }
        let payload = &rest[HEADER_LEN..HEADER_LEN + len];
        if rest[HEADER_LEN + len] != SEPARATOR {
            warn!(path = %self.path.display(), "bad history record separator, stopping");
            self.pos = self.buf.len();
            return None;
        }
        self.pos += HEADER_LEN + len + 1;
        Some((hash, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn store(compression: Compression) -> (tempfile::TempDir, HistoryStore) {
        let temp = tempfile::TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path(), compression);
        (temp, store)
    }

    fn append(store: &HistoryStore, sel: &str, data: &[u8], max: usize) {
        store.append(sel, hash_bytes(data), data, max).unwrap();
    }

    fn all_records(store: &HistoryStore, sel: &str) -> Vec<Vec<u8>> {
        let mut out: Vec<Vec<u8>> = Vec::new();
        store
            .stream(sel, |rec| {
                if rec.offset == 0 {
                    out.push(Vec::with_capacity(rec.total));
                }
                out.last_mut().unwrap().extend_from_slice(rec.chunk);
                Visit::Continue
            })
            .unwrap();
        out
    }

    #[test]
    fn test_missing_log_streams_nothing() {
        let (_t, store) = store(Compression::None);
        assert!(all_records(&store, "PRIMARY").is_empty());
        assert!(store.latest("PRIMARY").unwrap().is_none());
    }

    #[test]
    fn test_append_and_latest() {
        let (_t, store) = store(Compression::None);
        append(&store, "CLIPBOARD", b"first", 10);
        append(&store, "CLIPBOARD", b"second", 10);

        let (hash, data) = store.latest("CLIPBOARD").unwrap().unwrap();
        assert_eq!(data, b"second");
        assert_eq!(hash, hash_bytes(b"second"));
        assert_eq!(all_records(&store, "CLIPBOARD"), vec![b"second".to_vec(), b"first".to_vec()]);
    }

    #[test]
    fn test_zero_capacity_writes_nothing() {
        let (_t, store) = store(Compression::None);
        append(&store, "SECONDARY", b"data", 0);
        assert!(!store.log_path("SECONDARY").exists());
        assert!(store.latest("SECONDARY").unwrap().is_none());
    }

    #[test]
    fn test_dedup_moves_record_to_front() {
        let (_t, store) = store(Compression::None);
        for data in [&b"A"[..], b"B", b"C"] {
            append(&store, "CLIPBOARD", data, 2);
        }
        // Capacity 2: A evicted
        assert_eq!(all_records(&store, "CLIPBOARD"), vec![b"C".to_vec(), b"B".to_vec()]);

        // Re-appending B drops the old copy and puts B first
        append(&store, "CLIPBOARD", b"B", 2);
        assert_eq!(all_records(&store, "CLIPBOARD"), vec![b"B".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn test_capacity_eviction() {
        let (_t, store) = store(Compression::None);
        for i in 0..6u8 {
            append(&store, "CLIPBOARD", &[b'a' + i], 3);
        }
        assert_eq!(
            all_records(&store, "CLIPBOARD"),
            vec![b"f".to_vec(), b"e".to_vec(), b"d".to_vec()]
        );
    }

    #[test]
    fn test_payload_with_separator_bytes_round_trips() {
        let (_t, store) = store(Compression::None);
        let data = b"line one\nline two\n\nwith \x0A embedded";
        append(&store, "PRIMARY", data, 5);
        append(&store, "PRIMARY", b"next", 5);
        assert_eq!(
            all_records(&store, "PRIMARY"),
            vec![b"next".to_vec(), data.to_vec()]
        );
    }

    #[test]
    fn test_chunked_streaming_large_record() {
        let (_t, store) = store(Compression::None);
        let data = vec![0x42u8; CHUNK_SIZE * 2 + 17];
        append(&store, "CLIPBOARD", &data, 5);

        let mut chunks = Vec::new();
        store
            .stream("CLIPBOARD", |rec| {
                assert_eq!(rec.index, 0);
                assert_eq!(rec.total, data.len());
                chunks.push((rec.offset, rec.chunk.len()));
                Visit::Continue
            })
            .unwrap();
        assert_eq!(
            chunks,
            vec![(0, CHUNK_SIZE), (CHUNK_SIZE, CHUNK_SIZE), (CHUNK_SIZE * 2, 17)]
        );
    }

    #[test]
    fn test_stop_ends_streaming() {
        let (_t, store) = store(Compression::None);
        append(&store, "CLIPBOARD", b"older", 5);
        append(&store, "CLIPBOARD", b"newer", 5);

        let mut seen = 0;
        store
            .stream("CLIPBOARD", |_| {
                seen += 1;
                Visit::Stop
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_get_by_index_and_find_by_hash() {
        let (_t, store) = store(Compression::None);
        append(&store, "CLIPBOARD", b"older", 5);
        append(&store, "CLIPBOARD", b"newer", 5);

        let (_, at1) = store.get("CLIPBOARD", 1).unwrap().unwrap();
        assert_eq!(at1, b"older");
        assert!(store.get("CLIPBOARD", 2).unwrap().is_none());

        let found = store.find("CLIPBOARD", hash_bytes(b"older")).unwrap().unwrap();
        assert_eq!(found, b"older");
        assert!(store.find("CLIPBOARD", 0xDEAD_BEEF).unwrap().is_none());
    }

    #[test]
    fn test_truncated_tail_keeps_intact_prefix() {
        let (_t, store) = store(Compression::None);
        append(&store, "CLIPBOARD", b"intact", 5);

        // Chop bytes off the end of the log
        let path = store.log_path("CLIPBOARD");
        let mut raw = fs::read(&path).unwrap();
        let full = raw.clone();
        raw.extend_from_slice(&full);
        raw.truncate(raw.len() - 3);
        fs::write(&path, &raw).unwrap();

        let records = all_records(&store, "CLIPBOARD");
        assert_eq!(records, vec![b"intact".to_vec()]);
    }

    #[test]
    fn test_clear_removes_log() {
        let (_t, store) = store(Compression::None);
        append(&store, "CLIPBOARD", b"data", 5);
        assert!(store.log_path("CLIPBOARD").exists());

        store.clear("CLIPBOARD").unwrap();
        assert!(!store.log_path("CLIPBOARD").exists());
        // Clearing again is fine
        store.clear("CLIPBOARD").unwrap();
    }

    #[test]
    fn test_compressed_round_trip() {
        for compression in [Compression::Lz4, Compression::Zstd] {
            let (_t, store) = store(compression);
            append(&store, "CLIPBOARD", b"compress me", 5);
            append(&store, "CLIPBOARD", b"and me too", 5);
            assert_eq!(
                all_records(&store, "CLIPBOARD"),
                vec![b"and me too".to_vec(), b"compress me".to_vec()]
            );
        }
    }

    #[test]
    fn test_selections_are_isolated() {
        let (_t, store) = store(Compression::None);
        append(&store, "PRIMARY", b"pri", 5);
        append(&store, "CLIPBOARD", b"clip", 5);

        assert_eq!(store.latest("PRIMARY").unwrap().unwrap().1, b"pri");
        assert_eq!(store.latest("CLIPBOARD").unwrap().unwrap().1, b"clip");
    }
}
