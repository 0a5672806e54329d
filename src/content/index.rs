//! Pack index: shared types, header codec, and format dispatch.
//!
//! A pack index is a sorted on-disk map from content ID to the location
//! and metadata of that content inside a pack blob. Files are write-once
//! and immutable after flush; readers navigate them through a
//! [`ReaderAt`](super::reader_at::ReaderAt) without preloading entries.
//!
//! # Layout
//! ```text
//! +-------------------+
//! | Header (8B)       |  version, key size, entry size (u16 BE),
//! |                   |  entry count (u32 BE)
//! +-------------------+
//! | Entries           |  N * (key || 20B entry), sorted by key bytes
//! +-------------------+
//! | Extra data        |  pooled pack blob IDs, referenced by offset
//! +-------------------+
//! | Random suffix     |  32 cryptographically random bytes
//! +-------------------+
//! ```
//!
//! Only format version 1 exists today; [`Index`] is an enum so additional
//! formats can be added without touching call sites.

use std::fmt;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::content_id::{BlobId, ContentId};
use super::endian::u32_be;
use super::index_v1::{EntryView, IndexV1};
use super::reader_at::ReaderAt;

/// Index file header size in bytes.
pub(crate) const HEADER_SIZE: usize = 8;
/// Fixed entry size after the key, in bytes.
pub(crate) const ENTRY_SIZE: usize = 20;
/// Length of the trailing random suffix.
pub(crate) const RANDOM_SUFFIX_LEN: usize = 32;
/// Key-size sentinel written by builds with no entries.
pub(crate) const KEY_SIZE_UNKNOWN: u8 = 0xff;
/// Tombstone marker: MSB of the packed-offset field.
pub(crate) const DELETED_MARKER: u32 = 0x8000_0000;
/// Mask selecting the 31-bit pack offset.
pub(crate) const PACK_OFFSET_MASK: u32 = 0x7fff_ffff;
/// Format version byte for version-1 indexes.
pub const FORMAT_VERSION_V1: u8 = 1;

/// Errors from index reading and navigation.
///
/// Failures never poison the reader; a caller may retry a different
/// operation on the same index.
#[derive(Debug)]
#[non_exhaustive]
pub enum IndexError {
    /// An I/O operation failed; `op` identifies which one.
    Io { op: &'static str, source: io::Error },
    /// Header version byte is not a supported format.
    UnsupportedVersion { version: u8 },
    /// Header entry size differs from the fixed 20-byte layout.
    UnsupportedEntrySize { entry_size: u16 },
    /// Header key size is impossible for any content ID.
    InvalidKeySize { key_size: u8 },
    /// Probe key length does not match the index key size.
    KeyLengthMismatch { key_len: usize, index_key_len: usize },
    /// The file contradicts its own layout.
    Corrupt { detail: &'static str },
}

impl IndexError {
    #[inline]
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { op, source } => write!(f, "{op}: {source}"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported index version: {version} (expected 1)")
            }
            Self::UnsupportedEntrySize { entry_size } => {
                write!(f, "unsupported entry size: {entry_size} (expected {ENTRY_SIZE})")
            }
            Self::InvalidKeySize { key_size } => {
                write!(f, "invalid index key size: {key_size}")
            }
            Self::KeyLengthMismatch {
                key_len,
                index_key_len,
            } => write!(
                f,
                "content ID key length mismatch: {key_len} vs index {index_key_len}"
            ),
            Self::Corrupt { detail } => write!(f, "corrupt index: {detail}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Parsed index header.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Header {
    pub version: u8,
    pub key_size: u8,
    pub entry_size: u16,
    pub entry_count: u32,
}

pub(crate) fn read_header<R: ReaderAt>(reader: &R) -> Result<Header, IndexError> {
    let mut buf = [0u8; HEADER_SIZE];
    reader
        .read_at(&mut buf, 0)
        .map_err(|e| IndexError::io("reading index header", e))?;

    Ok(Header {
        version: buf[0],
        key_size: buf[1],
        entry_size: u16::from_be_bytes([buf[2], buf[3]]),
        entry_count: u32_be(&buf[4..8]),
    })
}

/// Read-only view of one content's index metadata.
///
/// Implemented lazily by reader entry views and eagerly by
/// [`ContentEntry`]. Accessors mirror the on-disk fields; the original
/// length is derived from the packed length and the encryptor's
/// per-content overhead.
pub trait ContentInfo {
    /// The content identifier.
    fn content_id(&self) -> ContentId;

    /// Creation time, in seconds since the epoch (48-bit on disk).
    fn timestamp_seconds(&self) -> i64;

    /// Content format version.
    fn format_version(&self) -> u8;

    /// The pack blob holding this content's bytes.
    fn pack_blob_id(&self) -> BlobId;

    /// True when the entry is a deletion tombstone. The underlying bytes
    /// remain in the pack blob until compaction.
    fn deleted(&self) -> bool;

    /// Offset of this content inside its pack blob (31 bits).
    fn pack_offset(&self) -> u32;

    /// Stored (packed) length in bytes.
    fn packed_length(&self) -> u32;

    /// Plaintext length: packed length minus per-content overhead.
    fn original_length(&self) -> u32;

    /// Creation time as a [`SystemTime`].
    fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.timestamp_seconds().max(0) as u64)
    }
}

/// Owned index entry record.
///
/// Used as builder input and wherever a materialized copy of an entry is
/// more convenient than a lazy view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentEntry {
    pub content_id: ContentId,
    pub timestamp_seconds: i64,
    pub format_version: u8,
    pub pack_blob_id: BlobId,
    pub deleted: bool,
    pub pack_offset: u32,
    pub packed_length: u32,
    pub original_length: u32,
}

impl ContentInfo for ContentEntry {
    fn content_id(&self) -> ContentId {
        self.content_id
    }

    fn timestamp_seconds(&self) -> i64 {
        self.timestamp_seconds
    }

    fn format_version(&self) -> u8 {
        self.format_version
    }

    fn pack_blob_id(&self) -> BlobId {
        self.pack_blob_id.clone()
    }

    fn deleted(&self) -> bool {
        self.deleted
    }

    fn pack_offset(&self) -> u32 {
        self.pack_offset
    }

    fn packed_length(&self) -> u32 {
        self.packed_length
    }

    fn original_length(&self) -> u32 {
        self.original_length
    }
}

/// Half-open range of content IDs: `start <= id < end`.
///
/// `None` bounds are unbounded on that side; the default range covers
/// every ID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdRange {
    pub start: Option<ContentId>,
    pub end: Option<ContentId>,
}

impl IdRange {
    /// The range covering all content IDs.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A bounded range `start <= id < end`.
    #[must_use]
    pub fn new(start: Option<ContentId>, end: Option<ContentId>) -> Self {
        Self { start, end }
    }
}

/// An open pack index of any supported format.
///
/// Version 1 is the only format today; the enum keeps room for future
/// formats without changing call sites.
pub enum Index<R: ReaderAt> {
    V1(IndexV1<R>),
}

impl<R: ReaderAt> Index<R> {
    /// Opens an index over `reader`, validating the header.
    ///
    /// `per_content_overhead` is the encryptor's fixed per-content cost,
    /// used to derive original lengths from packed lengths. The reader is
    /// retained; entries are not preloaded.
    ///
    /// # Errors
    /// Returns `IndexError` for unreadable or malformed headers and for
    /// unsupported format versions.
    pub fn open(reader: R, per_content_overhead: u32) -> Result<Self, IndexError> {
        let header = read_header(&reader)?;

        match header.version {
            FORMAT_VERSION_V1 => Ok(Self::V1(IndexV1::open(
                reader,
                header,
                per_content_overhead,
            )?)),
            version => Err(IndexError::UnsupportedVersion { version }),
        }
    }

    /// Returns the entry count recorded in the header.
    #[must_use]
    pub fn approximate_count(&self) -> usize {
        match self {
            Self::V1(ix) => ix.approximate_count(),
        }
    }

    /// Looks up a single content ID.
    ///
    /// Returns `Ok(None)` when the ID is absent, including for the empty
    /// index sentinel produced by zero-entry builds.
    ///
    /// # Errors
    /// Returns `IndexError` for read failures or when the encoded key
    /// length does not match the index key size.
    pub fn get_info(&self, id: &ContentId) -> Result<Option<EntryView<'_, R>>, IndexError> {
        match self {
            Self::V1(ix) => ix.get_info(id),
        }
    }

    /// Invokes `cb` for every entry in `range`, in stored key order.
    ///
    /// # Errors
    /// Read failures surface as `IndexError` converted into `E`; a
    /// callback error terminates iteration and propagates unchanged.
    pub fn iterate<E, F>(&self, range: &IdRange, cb: F) -> Result<(), E>
    where
        E: From<IndexError>,
        F: FnMut(EntryView<'_, R>) -> Result<(), E>,
    {
        match self {
            Self::V1(ix) => ix.iterate(range, cb),
        }
    }

    /// Closes the backing reader.
    ///
    /// # Errors
    /// Propagates the reader's close failure.
    pub fn close(&self) -> Result<(), IndexError> {
        match self {
            Self::V1(ix) => ix.close(),
        }
    }
}
