//! Version-1 pack index builder.
//!
//! The builder accumulates entries in a map keyed by content ID, so
//! contributions from multiple logical writers merge before anything is
//! written: when the same ID is added twice, the entry with the newest
//! timestamp wins. `build_v1` then sorts keys, pools distinct pack blob
//! IDs into the extra-data region, and emits the bit-exact file layout.
//!
//! # Algorithm
//! 1. Sort entries by content-ID key bytes ascending.
//! 2. One pass to fix the key length (all entries must agree) and pool
//!    pack blob IDs in first-occurrence order.
//! 3. Write header, then `key || entry` rows, then extra data.
//! 4. Append 32 cryptographically random bytes so two builds over
//!    identical input never collide in content-addressed storage.
//!
//! A build with zero entries writes the unknown-key-size sentinel and no
//! rows; readers treat such an index as empty.

use std::io::{self, Write};

use ahash::AHashMap;
use rand::rngs::OsRng;
use rand::RngCore;

use super::content_id::ContentId;
use super::endian::{put_u16_be, put_u32_be, put_u64_be};
use super::index::{
    ContentEntry, DELETED_MARKER, ENTRY_SIZE, FORMAT_VERSION_V1, HEADER_SIZE, KEY_SIZE_UNKNOWN,
    PACK_OFFSET_MASK, RANDOM_SUFFIX_LEN,
};

/// Errors from index building.
#[derive(Debug)]
#[non_exhaustive]
pub enum BuildError {
    /// Entries encode to keys of different lengths.
    InconsistentKeyLength { key_len: usize, expected: usize },
    /// An entry has no pack blob ID.
    EmptyPackBlobId { content_id: ContentId },
    /// Pack blob ID exceeds the single length byte.
    PackBlobIdTooLong { len: usize },
    /// Pack offset does not fit in 31 bits.
    PackOffsetOutOfRange { offset: u32 },
    /// I/O error while writing the index.
    Io(io::Error),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InconsistentKeyLength { key_len, expected } => {
                write!(f, "inconsistent key length: {key_len} vs {expected}")
            }
            Self::EmptyPackBlobId { content_id } => {
                write!(f, "empty pack blob ID for {content_id}")
            }
            Self::PackBlobIdTooLong { len } => {
                write!(f, "pack blob ID too long: {len} bytes (max: 255)")
            }
            Self::PackOffsetOutOfRange { offset } => {
                write!(f, "pack offset does not fit in 31 bits: {offset:#x}")
            }
            Self::Io(err) => write!(f, "index write I/O error: {err}"),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for BuildError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Accumulates index entries and writes version-1 index files.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    entries: AHashMap<ContentId, ContentEntry>,
}

impl IndexBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, merging by content ID.
    ///
    /// When the ID is already present, the entry with the newest
    /// timestamp is kept; on equal timestamps the latest addition wins.
    pub fn add(&mut self, entry: ContentEntry) {
        let keep_existing = self
            .entries
            .get(&entry.content_id)
            .is_some_and(|existing| entry.timestamp_seconds < existing.timestamp_seconds);

        if !keep_existing {
            self.entries.insert(entry.content_id, entry);
        }
    }

    /// Returns the number of distinct content IDs buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no entries are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the version-1 index file to `out` and flushes it.
    ///
    /// # Errors
    /// Returns `BuildError` for inconsistent key lengths, empty or
    /// oversized pack blob IDs, out-of-range pack offsets, and write
    /// failures.
    pub fn build_v1<W: Write>(&self, out: &mut W) -> Result<(), BuildError> {
        let mut sorted: Vec<&ContentEntry> = self.entries.values().collect();
        sorted.sort_by(|a, b| a.content_id.cmp(&b.content_id));

        // Single pass: fix the key length and pool pack blob IDs in
        // first-occurrence order.
        let mut key_length: Option<usize> = None;
        let mut extra_data: Vec<u8> = Vec::new();
        let mut blob_offsets: AHashMap<&str, u32> = AHashMap::new();

        for entry in &sorted {
            let kl = entry.content_id.key_len();
            match key_length {
                None => key_length = Some(kl),
                Some(expected) if kl != expected => {
                    return Err(BuildError::InconsistentKeyLength {
                        key_len: kl,
                        expected,
                    });
                }
                Some(_) => {}
            }

            let blob = entry.pack_blob_id.as_str();
            if blob.is_empty() {
                return Err(BuildError::EmptyPackBlobId {
                    content_id: entry.content_id,
                });
            }
            if blob.len() > 255 {
                return Err(BuildError::PackBlobIdTooLong { len: blob.len() });
            }
            if entry.pack_offset > PACK_OFFSET_MASK {
                return Err(BuildError::PackOffsetOutOfRange {
                    offset: entry.pack_offset,
                });
            }

            blob_offsets.entry(blob).or_insert_with(|| {
                let offset = extra_data.len() as u32;
                extra_data.extend_from_slice(blob.as_bytes());
                offset
            });
        }

        let entry_count = sorted.len();
        let key_len = key_length.unwrap_or(0);
        let extra_data_offset = (HEADER_SIZE + entry_count * (key_len + ENTRY_SIZE)) as u32;

        let mut header = [0u8; HEADER_SIZE];
        header[0] = FORMAT_VERSION_V1;
        header[1] = key_length.map_or(KEY_SIZE_UNKNOWN, |k| k as u8);
        put_u16_be(&mut header[2..], ENTRY_SIZE as u16);
        put_u32_be(&mut header[4..], entry_count as u32);
        out.write_all(&header)?;

        let mut entry_bytes = [0u8; ENTRY_SIZE];
        for entry in &sorted {
            format_entry(entry, extra_data_offset, &blob_offsets, &mut entry_bytes);
            out.write_all(entry.content_id.to_key().as_slice())?;
            out.write_all(&entry_bytes)?;
        }

        out.write_all(&extra_data)?;

        let mut suffix = [0u8; RANDOM_SUFFIX_LEN];
        OsRng.fill_bytes(&mut suffix);
        out.write_all(&suffix)?;

        out.flush()?;

        Ok(())
    }
}

fn format_entry(
    entry: &ContentEntry,
    extra_data_offset: u32,
    blob_offsets: &AHashMap<&str, u32>,
    out: &mut [u8; ENTRY_SIZE],
) {
    let blob = entry.pack_blob_id.as_str();

    // Bytes 0..8: 48-bit timestamp | format version | blob ID length.
    let ts_and_flags = ((entry.timestamp_seconds as u64) << 16)
        | (u64::from(entry.format_version) << 8)
        | blob.len() as u64;
    put_u64_be(&mut out[0..8], ts_and_flags);

    put_u32_be(&mut out[8..12], extra_data_offset + blob_offsets[blob]);

    let packed_offset = if entry.deleted {
        entry.pack_offset | DELETED_MARKER
    } else {
        entry.pack_offset
    };
    put_u32_be(&mut out[12..16], packed_offset);

    put_u32_be(&mut out[16..20], entry.packed_length);
}
