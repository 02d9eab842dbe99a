//! Write-ahead log for the ordered store.
//!
//! Every mutation of the store is appended here before it becomes visible,
//! so the in-memory map can be rebuilt after a restart.
//!
//! # Architecture
//!
//! ```text
//! commit → WAL append (one record) → sync → map insert → Ack
//! ```
//!
//! # Format
//!
//! A log is a directory of segment files `segment_{id:016x}.wal`. Each
//! segment starts with a header (magic `EWAL`, version, segment id, creation
//! time) followed by records:
//!
//! ```text
//! [len: u32 LE][crc32: u32 LE][payload]
//! payload = [sequence: u64 LE][ops: u32 LE] op*
//! op      = [1][key len: u32 LE][key][value len: u32 LE][value]   put
//!         | [2][key len: u32 LE][key]                             delete
//! ```
//!
//! A record holds every op of one commit, so a batch is replayed entirely
//! or not at all. Replay of a segment stops at the first torn or corrupt
//! record.
//!
//! # Example
//!
//! ```rust,ignore
//! let records = Wal::recover(&dir)?;
//! let mut wal = Wal::new(&dir, WalConfig::default(), next_sequence(&records))?;
//! wal.append(&[WalOp::put(key, value)])?;
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::codec::primitives::ByteReader;
use crate::error::{EdgeError, Result};

/// Default maximum segment size (8 MB).
pub const DEFAULT_SEGMENT_SIZE: usize = 8 * 1024 * 1024;

/// Default number of segments kept before the owner should checkpoint.
pub const DEFAULT_MAX_SEGMENTS: usize = 4;

const SEGMENT_EXTENSION: &str = "wal";
const SEGMENT_PREFIX: &str = "segment";

/// WAL file magic bytes.
const WAL_MAGIC: [u8; 4] = *b"EWAL";

/// WAL format version.
const WAL_VERSION: u16 = 1;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// Sync mode for WAL durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync after each record (highest durability).
    Fsync,
    /// Use fdatasync (skip metadata update).
    Fdatasync,
    /// Leave syncing to the OS.
    #[default]
    None,
}

/// Configuration for WAL behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct WalConfig {
    /// Maximum size of a single segment file.
    pub segment_size: usize,
    /// Sync mode for durability guarantees.
    pub sync_mode: SyncMode,
    /// Segment count above which [`Wal::needs_checkpoint`] reports true.
    pub max_segments: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            sync_mode: SyncMode::default(),
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }
}

/// One mutation of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOp {
    /// Insert or overwrite a key.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

impl WalOp {
    /// Creates a put op.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a delete op.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Key the op applies to.
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Put { key, value } => 1 + 4 + key.len() + 4 + value.len(),
            Self::Delete { key } => 1 + 4 + key.len(),
        }
    }
}

/// A committed group of ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Sequence number assigned on append.
    pub sequence: u64,
    /// Ops in commit order.
    pub ops: Vec<WalOp>,
}

impl WalRecord {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let size = 12 + self.ops.iter().map(WalOp::encoded_len).sum::<usize>();
        let mut bytes = Vec::with_capacity(size);
        bytes.extend_from_slice(&self.sequence.to_le_bytes());
        bytes.extend_from_slice(&len_u32(self.ops.len(), "op count")?.to_le_bytes());
        for op in &self.ops {
            match op {
                WalOp::Put { key, value } => {
                    bytes.push(OP_PUT);
                    bytes.extend_from_slice(&len_u32(key.len(), "key")?.to_le_bytes());
                    bytes.extend_from_slice(key);
                    bytes.extend_from_slice(&len_u32(value.len(), "value")?.to_le_bytes());
                    bytes.extend_from_slice(value);
                }
                WalOp::Delete { key } => {
                    bytes.push(OP_DELETE);
                    bytes.extend_from_slice(&len_u32(key.len(), "key")?.to_le_bytes());
                    bytes.extend_from_slice(key);
                }
            }
        }
        Ok(bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let sequence = reader.read_u64_le()?;
        let count = reader.read_u32_le()? as usize;
        // Every op takes at least five bytes
        let mut ops = Vec::with_capacity(count.min(reader.remaining() / 5));
        for _ in 0..count {
            let op = match reader.read_u8()? {
                OP_PUT => {
                    let key_len = reader.read_u32_le()? as usize;
                    let key = reader.take(key_len)?.to_vec();
                    let value_len = reader.read_u32_le()? as usize;
                    let value = reader.take(value_len)?.to_vec();
                    WalOp::Put { key, value }
                }
                OP_DELETE => {
                    let key_len = reader.read_u32_le()? as usize;
                    WalOp::Delete {
                        key: reader.take(key_len)?.to_vec(),
                    }
                }
                other => {
                    return Err(EdgeError::Corrupted(format!("unknown WAL op type {}", other)))
                }
            };
            ops.push(op);
        }
        reader.finish("WAL record")?;
        Ok(Self { sequence, ops })
    }
}

fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| EdgeError::LimitExceeded(format!("WAL {} of {}", what, len)))
}

/// WAL segment header.
#[derive(Debug, Clone)]
struct SegmentHeader {
    segment_id: u64,
    created_at: i64,
}

impl SegmentHeader {
    const SIZE: usize = 22; // 4 + 2 + 8 + 8

    fn new(segment_id: u64) -> Self {
        Self {
            segment_id,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0),
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&WAL_MAGIC)?;
        writer.write_all(&WAL_VERSION.to_le_bytes())?;
        writer.write_all(&self.segment_id.to_le_bytes())?;
        writer.write_all(&self.created_at.to_le_bytes())?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;

        let mut header = ByteReader::new(&buf);
        let magic: [u8; 4] = [
            header.read_u8()?,
            header.read_u8()?,
            header.read_u8()?,
            header.read_u8()?,
        ];
        if magic != WAL_MAGIC {
            return Err(EdgeError::InvalidMagic(magic));
        }
        let version = header.read_u16_le()?;
        if version != WAL_VERSION {
            return Err(EdgeError::UnsupportedVersion(version));
        }
        Ok(Self {
            segment_id: header.read_u64_le()?,
            created_at: header.read_i64_le()?,
        })
    }
}

/// Write-ahead log.
pub struct Wal {
    /// Directory containing WAL segments.
    log_dir: PathBuf,
    /// Segment being appended to.
    current_segment: BufWriter<File>,
    current_segment_id: u64,
    current_segment_size: usize,
    /// Segment files on disk, the current one included.
    segment_count: usize,
    /// Next sequence number to assign.
    next_sequence: u64,
    config: WalConfig,
}

impl Wal {
    /// Opens a fresh segment in `log_dir`, after any existing ones.
    ///
    /// `next_sequence` should follow the highest sequence returned by
    /// [`Wal::recover`].
    pub fn new(log_dir: impl AsRef<Path>, config: WalConfig, next_sequence: u64) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;

        let existing = list_segments(&log_dir)?;
        let next_segment_id = existing
            .last()
            .and_then(|path| parse_segment_id(path))
            .map_or(0, |id| id + 1);

        let current_segment = create_segment(&log_dir, next_segment_id)?;
        Ok(Self {
            log_dir,
            current_segment,
            current_segment_id: next_segment_id,
            current_segment_size: SegmentHeader::SIZE,
            segment_count: existing.len() + 1,
            next_sequence: next_sequence.max(1),
            config,
        })
    }

    /// Appends `ops` as one record and syncs per the configured mode.
    pub fn append(&mut self, ops: &[WalOp]) -> Result<u64> {
        let record = WalRecord {
            sequence: self.next_sequence,
            ops: ops.to_vec(),
        };
        let data = record.to_bytes()?;

        if self.current_segment_size + 8 + data.len() > self.config.segment_size
            && self.current_segment_size > SegmentHeader::SIZE
        {
            self.rotate_segment()?;
        }

        self.write_record(&data)?;
        self.sync_segment(self.config.sync_mode)?;
        self.next_sequence += 1;
        Ok(record.sequence)
    }

    fn write_record(&mut self, data: &[u8]) -> Result<()> {
        let crc = crc32fast::hash(data);
        self.current_segment
            .write_all(&len_u32(data.len(), "record")?.to_le_bytes())?;
        self.current_segment.write_all(&crc.to_le_bytes())?;
        self.current_segment.write_all(data)?;
        self.current_segment_size += 4 + 4 + data.len();
        Ok(())
    }

    fn sync_segment(&mut self, mode: SyncMode) -> Result<()> {
        self.current_segment.flush()?;
        match mode {
            SyncMode::Fsync => self.current_segment.get_ref().sync_all()?,
            SyncMode::Fdatasync => self.current_segment.get_ref().sync_data()?,
            SyncMode::None => {}
        }
        Ok(())
    }

    fn rotate_segment(&mut self) -> Result<()> {
        self.current_segment.flush()?;
        self.current_segment.get_ref().sync_all()?;

        self.current_segment_id += 1;
        self.current_segment = create_segment(&self.log_dir, self.current_segment_id)?;
        self.current_segment_size = SegmentHeader::SIZE;
        self.segment_count += 1;

        debug!("Rotated to WAL segment {}", self.current_segment_id);
        Ok(())
    }

    /// Replaces the log with a single record of `snapshot` puts.
    ///
    /// The snapshot is written to a new segment and synced before older
    /// segments are removed, so a crash in between replays both.
    pub fn checkpoint(&mut self, snapshot: Vec<WalOp>) -> Result<()> {
        self.rotate_segment()?;
        let record = WalRecord {
            sequence: self.next_sequence,
            ops: snapshot,
        };
        self.write_record(&record.to_bytes()?)?;
        self.sync_segment(SyncMode::Fsync)?;
        self.next_sequence += 1;

        for path in list_segments(&self.log_dir)? {
            if parse_segment_id(&path).map_or(false, |id| id < self.current_segment_id) {
                fs::remove_file(&path)?;
                debug!("Removed WAL segment: {}", path.display());
            }
        }
        self.segment_count = 1;
        debug!(
            "Checkpointed {} ops into WAL segment {}",
            record.ops.len(),
            self.current_segment_id
        );
        Ok(())
    }

    /// Flushes and fsyncs the current segment.
    pub fn sync(&mut self) -> Result<()> {
        self.sync_segment(SyncMode::Fsync)
    }

    /// Reads every valid record in `log_dir`, ordered by sequence.
    ///
    /// Segments with an unreadable header are skipped with a warning.
    pub fn recover(log_dir: impl AsRef<Path>) -> Result<Vec<WalRecord>> {
        let log_dir = log_dir.as_ref();
        if !log_dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for path in list_segments(log_dir)? {
            match read_segment(&path) {
                Ok(segment) => {
                    debug!(
                        "Recovered {} records from segment {}",
                        segment.len(),
                        path.display()
                    );
                    records.extend(segment);
                }
                Err(e) => warn!("Failed to read WAL segment {}: {:?}", path.display(), e),
            }
        }
        records.sort_by_key(|r| r.sequence);

        debug!("Total recovered WAL records: {}", records.len());
        Ok(records)
    }

    /// Returns true once the log spans more than `max_segments` files.
    ///
    /// The log never drops records on its own; the owner answers this with
    /// [`Wal::checkpoint`].
    pub fn needs_checkpoint(&self) -> bool {
        self.segment_count > self.config.max_segments.max(1)
    }

    /// Number of segment files, the current one included.
    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// Sequence number the next record will get.
    pub fn current_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Current segment id.
    pub fn current_segment_id(&self) -> u64 {
        self.current_segment_id
    }

    /// Log directory path.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.current_segment.flush() {
            warn!("Failed to flush WAL on drop: {:?}", e);
        }
    }
}

fn segment_path(log_dir: &Path, segment_id: u64) -> PathBuf {
    log_dir.join(format!(
        "{}_{:016x}.{}",
        SEGMENT_PREFIX, segment_id, SEGMENT_EXTENSION
    ))
}

fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix(&format!("{}_", SEGMENT_PREFIX)))
        .and_then(|s| u64::from_str_radix(s, 16).ok())
}

/// Segment files in `log_dir`, in id order.
fn list_segments(log_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == SEGMENT_EXTENSION)
            && parse_segment_id(&path).is_some()
        {
            segments.push(path);
        }
    }
    // Fixed-width hex ids sort numerically
    segments.sort();
    Ok(segments)
}

fn create_segment(log_dir: &Path, segment_id: u64) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(segment_path(log_dir, segment_id))?;
    let mut writer = BufWriter::new(file);
    SegmentHeader::new(segment_id).write_to(&mut writer)?;
    writer.flush()?;
    Ok(writer)
}

fn read_segment(path: &Path) -> Result<Vec<WalRecord>> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = SegmentHeader::read_from(&mut reader)?;

    let mut records = Vec::new();
    loop {
        match read_record(&mut reader) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => break,
            Err(e) => {
                warn!(
                    "Stopping replay of WAL segment {} after {} records: {:?}",
                    header.segment_id,
                    records.len(),
                    e
                );
                break;
            }
        }
    }
    Ok(records)
}

fn read_record<R: Read>(reader: &mut R) -> Result<Option<WalRecord>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(None);
    }

    let mut crc_buf = [0u8; 4];
    reader.read_exact(&mut crc_buf)?;
    let expected = u32::from_le_bytes(crc_buf);

    let mut data = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(EdgeError::InsufficientData(format!(
            "torn WAL record: {} of {} bytes",
            data.len(),
            len
        )));
    }

    let actual = crc32fast::hash(&data);
    if actual != expected {
        return Err(EdgeError::ChecksumMismatch { expected, actual });
    }
    WalRecord::from_bytes(&data).map(Some)
}
