//! Version-1 pack index reader.
//!
//! Entries are fixed-size rows of `key_size + 20` bytes sorted by key, so
//! lookups binary-search the file through the `ReaderAt` with one row read
//! per probe. Nothing is preloaded and nothing is cached; an index over a
//! memory map costs a header read to open.
//!
//! # Entry layout (20 bytes after the key)
//! ```text
//! 0..5    48-bit BE timestamp, seconds since epoch
//! 6       content format version
//! 7       pack blob ID length
//! 8..11   u32 BE absolute file offset of the pack blob ID
//! 12..15  deleted flag (MSB) | 31-bit pack offset, BE
//! 16..19  u32 BE packed length
//! ```
//!
//! Entry views resolve the pack blob ID lazily: iteration stays cheap for
//! callers that only need IDs and timestamps.

use std::fmt;

use super::content_id::{BlobId, ContentId, MAX_KEY_LEN};
use super::endian::{u32_be, u48_be};
use super::index::{
    ContentInfo, Header, IdRange, IndexError, ENTRY_SIZE, HEADER_SIZE, KEY_SIZE_UNKNOWN,
    PACK_OFFSET_MASK,
};
use super::reader_at::ReaderAt;

/// Sentinel blob ID returned when the pack blob ID bytes cannot be read.
///
/// Kept as a literal for parity with persisted indexes whose consumers
/// treat it as a normal string rather than an error.
pub const INVALID_BLOB_ID: &str = "-invalid-blob-id-";

/// Largest possible row: maximum key plus the fixed entry tail.
const MAX_ROW_SIZE: usize = MAX_KEY_LEN + ENTRY_SIZE;

/// Deleted-tombstone flag bit within the first packed-offset byte.
const DELETED_FLAG: u8 = 0x80;

/// Reader for version-1 index files.
pub struct IndexV1<R: ReaderAt> {
    reader: R,
    key_size: u8,
    entry_count: u32,
    per_content_overhead: u32,
}

impl<R: ReaderAt> IndexV1<R> {
    /// Opens a v1 index whose header has already been read.
    ///
    /// # Errors
    /// Returns `IndexError` for a bad entry size, or a key size no
    /// content ID could produce (unless the index is the zero-entry
    /// sentinel).
    pub(crate) fn open(
        reader: R,
        header: Header,
        per_content_overhead: u32,
    ) -> Result<Self, IndexError> {
        if header.entry_size as usize != ENTRY_SIZE {
            return Err(IndexError::UnsupportedEntrySize {
                entry_size: header.entry_size,
            });
        }

        // Zero-entry builds record the unknown-key-size sentinel; any
        // populated index must have a key a content ID can encode to.
        if header.entry_count > 0 {
            let ks = header.key_size as usize;
            if !(2..=MAX_KEY_LEN).contains(&ks) {
                return Err(IndexError::InvalidKeySize {
                    key_size: header.key_size,
                });
            }
        }

        Ok(Self {
            reader,
            key_size: header.key_size,
            entry_count: header.entry_count,
            per_content_overhead,
        })
    }

    /// Returns the header entry count.
    #[inline]
    #[must_use]
    pub fn approximate_count(&self) -> usize {
        self.entry_count as usize
    }

    #[inline]
    fn stride(&self) -> usize {
        self.key_size as usize + ENTRY_SIZE
    }

    /// True when the index was built from zero entries and records no
    /// usable key size.
    #[inline]
    fn is_empty_sentinel(&self) -> bool {
        self.key_size == KEY_SIZE_UNKNOWN || self.entry_count == 0
    }

    fn read_row(&self, pos: u32, row: &mut [u8]) -> Result<(), IndexError> {
        let offset = HEADER_SIZE as u64 + self.stride() as u64 * u64::from(pos);
        self.reader
            .read_at(row, offset)
            .map_err(|e| IndexError::io("reading index entry", e))
    }

    /// Returns the lowest position whose key is `>= key`, or
    /// `entry_count` if every key is smaller.
    ///
    /// Read errors short-circuit the search and surface to the caller.
    fn find_position(&self, key: &[u8]) -> Result<u32, IndexError> {
        let ks = self.key_size as usize;
        let mut row_buf = [0u8; MAX_ROW_SIZE];
        let row = &mut row_buf[..self.stride()];

        let mut lo = 0u32;
        let mut hi = self.entry_count;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            self.read_row(mid, row)?;

            if &row[..ks] >= key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        Ok(lo)
    }

    /// Looks up one content ID; see [`super::index::Index::get_info`].
    pub fn get_info(&self, id: &ContentId) -> Result<Option<EntryView<'_, R>>, IndexError> {
        if self.is_empty_sentinel() {
            return Ok(None);
        }

        let key = id.to_key();
        let ks = self.key_size as usize;
        if key.len() != ks {
            return Err(IndexError::KeyLengthMismatch {
                key_len: key.len(),
                index_key_len: ks,
            });
        }

        let pos = self.find_position(key.as_slice())?;
        if pos >= self.entry_count {
            return Ok(None);
        }

        let mut row_buf = [0u8; MAX_ROW_SIZE];
        let row = &mut row_buf[..self.stride()];
        self.read_row(pos, row)?;

        if &row[..ks] != key.as_slice() {
            return Ok(None);
        }

        Ok(Some(self.entry_view(*id, &row[ks..])))
    }

    /// Iterates entries in `range` in stored key order; see
    /// [`super::index::Index::iterate`].
    pub fn iterate<E, F>(&self, range: &IdRange, mut cb: F) -> Result<(), E>
    where
        E: From<IndexError>,
        F: FnMut(EntryView<'_, R>) -> Result<(), E>,
    {
        if self.is_empty_sentinel() {
            return Ok(());
        }

        let start_pos = match &range.start {
            Some(id) => self.find_position(id.to_key().as_slice())?,
            None => 0,
        };
        let end_key = range.end.as_ref().map(ContentId::to_key);

        let ks = self.key_size as usize;
        let mut row_buf = [0u8; MAX_ROW_SIZE];
        let row = &mut row_buf[..self.stride()];

        for pos in start_pos..self.entry_count {
            self.read_row(pos, row)?;

            let key = &row[..ks];
            if let Some(end) = &end_key {
                if key >= end.as_slice() {
                    break;
                }
            }

            let content_id = ContentId::from_key(key).map_err(|_| IndexError::Corrupt {
                detail: "entry key does not decode to a content ID",
            })?;

            cb(self.entry_view(content_id, &row[ks..]))?;
        }

        Ok(())
    }

    /// Closes the backing reader.
    pub fn close(&self) -> Result<(), IndexError> {
        self.reader
            .close()
            .map_err(|e| IndexError::io("closing index reader", e))
    }

    fn entry_view(&self, content_id: ContentId, entry: &[u8]) -> EntryView<'_, R> {
        debug_assert_eq!(entry.len(), ENTRY_SIZE);
        let mut data = [0u8; ENTRY_SIZE];
        data.copy_from_slice(entry);
        EntryView {
            index: self,
            content_id,
            data,
        }
    }
}

/// Lazy view of one index entry.
///
/// Fixed fields decode from the captured entry bytes; the pack blob ID is
/// dereferenced from the extra-data region only on demand.
pub struct EntryView<'a, R: ReaderAt> {
    index: &'a IndexV1<R>,
    content_id: ContentId,
    data: [u8; ENTRY_SIZE],
}

impl<R: ReaderAt> ContentInfo for EntryView<'_, R> {
    fn content_id(&self) -> ContentId {
        self.content_id
    }

    fn timestamp_seconds(&self) -> i64 {
        u48_be(&self.data[0..6])
    }

    fn format_version(&self) -> u8 {
        self.data[6]
    }

    fn pack_blob_id(&self) -> BlobId {
        let name_len = self.data[7] as usize;
        let name_offset = u64::from(u32_be(&self.data[8..12]));

        let mut name_buf = [0u8; 255];
        let name = &mut name_buf[..name_len];

        if self.index.reader.read_at(name, name_offset).is_err() {
            return BlobId::from(INVALID_BLOB_ID);
        }

        match std::str::from_utf8(name) {
            Ok(s) => BlobId::from(s),
            Err(_) => BlobId::from(INVALID_BLOB_ID),
        }
    }

    fn deleted(&self) -> bool {
        self.data[12] & DELETED_FLAG != 0
    }

    fn pack_offset(&self) -> u32 {
        u32_be(&self.data[12..16]) & PACK_OFFSET_MASK
    }

    fn packed_length(&self) -> u32 {
        u32_be(&self.data[16..20])
    }

    fn original_length(&self) -> u32 {
        // Plain modular subtraction; only meaningful when the packed
        // length exceeds the per-content overhead.
        self.packed_length()
            .wrapping_sub(self.index.per_content_overhead)
    }
}

impl<R: ReaderAt> fmt::Debug for EntryView<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryView")
            .field("content_id", &self.content_id)
            .field("deleted", &self.deleted())
            .field("pack_offset", &self.pack_offset())
            .field("packed_length", &self.packed_length())
            .finish()
    }
}
