//! Content and pack blob identifiers.
//!
//! A content ID is a fixed-size, zero-heap value: an optional single-byte
//! prefix that partitions identifiers by role, followed by a cryptographic
//! digest of up to 32 bytes. The canonical text form is the prefix
//! character (if any) followed by the lowercase hex digest, so a prefixed
//! ID always has odd text length and an unprefixed ID even length.
//!
//! # Key encoding
//! Index keys encode an ID as one prefix byte (0 when no prefix) followed
//! by the raw digest bytes. Every ID therefore encodes to `1 + digest_len`
//! key bytes, keeping key size uniform across an index. The encoding is
//! reversible.
//!
//! # Ordering
//! IDs compare by their key bytes (prefix byte first, then digest), which
//! matches the sort order of entries inside an index file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum digest length in bytes.
pub const MAX_DIGEST_LEN: usize = 32;

/// Maximum encoded key length: prefix byte plus digest.
pub const MAX_KEY_LEN: usize = 1 + MAX_DIGEST_LEN;

/// Prefix of identifiers that carry repository manifests.
///
/// Contents with this prefix are system metadata and are exempt from
/// garbage collection.
pub const MANIFEST_PREFIX: u8 = b'm';

/// Errors from content-ID parsing and key decoding.
#[derive(Debug)]
#[non_exhaustive]
pub enum IdError {
    /// The identifier text or digest is empty.
    Empty,
    /// Digest exceeds [`MAX_DIGEST_LEN`].
    DigestTooLong { len: usize },
    /// Prefix byte outside the allowed `'g'..='z'` range.
    ///
    /// The range excludes hex digits so a prefix character can never be
    /// confused with the first digest nibble.
    InvalidPrefix { prefix: u8 },
    /// The hex tail contains a non-hex character.
    InvalidHex,
    /// Encoded key bytes have an impossible length.
    InvalidKeyLength { len: usize },
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty content ID"),
            Self::DigestTooLong { len } => {
                write!(f, "digest too long: {len} bytes (max: {MAX_DIGEST_LEN})")
            }
            Self::InvalidPrefix { prefix } => {
                write!(f, "invalid content ID prefix: {:#04x}", prefix)
            }
            Self::InvalidHex => write!(f, "invalid hex in content ID"),
            Self::InvalidKeyLength { len } => {
                write!(f, "invalid key length: {len} (max: {MAX_KEY_LEN})")
            }
        }
    }
}

impl std::error::Error for IdError {}

/// Fixed-size content identifier: optional role prefix plus digest.
///
/// # Invariants
/// - `prefix` is 0 (none) or an ASCII letter in `'g'..='z'`.
/// - `digest_len` is in `1..=32` and only `digest[..digest_len]` is valid.
/// - `digest[digest_len..]` is zero-padded.
#[derive(Clone, Copy)]
pub struct ContentId {
    prefix: u8,
    digest_len: u8,
    digest: [u8; MAX_DIGEST_LEN],
}

impl ContentId {
    /// Creates an unprefixed content ID from raw digest bytes.
    ///
    /// # Errors
    /// Returns `IdError` if the digest is empty or longer than 32 bytes.
    pub fn unprefixed(digest: &[u8]) -> Result<Self, IdError> {
        Self::new(None, digest)
    }

    /// Creates a content ID with the given role prefix and digest bytes.
    ///
    /// # Errors
    /// Returns `IdError` for an empty or oversized digest, or a prefix
    /// outside `'g'..='z'`.
    pub fn new(prefix: Option<u8>, digest: &[u8]) -> Result<Self, IdError> {
        if digest.is_empty() {
            return Err(IdError::Empty);
        }
        if digest.len() > MAX_DIGEST_LEN {
            return Err(IdError::DigestTooLong { len: digest.len() });
        }

        let prefix = match prefix {
            None => 0,
            Some(p) => {
                if !p.is_ascii_lowercase() || p < b'g' {
                    return Err(IdError::InvalidPrefix { prefix: p });
                }
                p
            }
        };

        let mut storage = [0u8; MAX_DIGEST_LEN];
        storage[..digest.len()].copy_from_slice(digest);

        Ok(Self {
            prefix,
            digest_len: digest.len() as u8,
            digest: storage,
        })
    }

    /// Returns the role prefix, if any.
    #[inline]
    #[must_use]
    pub fn prefix(&self) -> Option<u8> {
        if self.prefix == 0 {
            None
        } else {
            Some(self.prefix)
        }
    }

    /// Returns the raw digest bytes.
    #[inline]
    #[must_use]
    pub fn digest(&self) -> &[u8] {
        &self.digest[..self.digest_len as usize]
    }

    /// Returns true for identifiers carrying repository manifests.
    #[inline]
    #[must_use]
    pub fn is_manifest(&self) -> bool {
        self.prefix == MANIFEST_PREFIX
    }

    /// Returns the encoded key length: one prefix byte plus the digest.
    #[inline]
    #[must_use]
    pub fn key_len(&self) -> usize {
        1 + self.digest_len as usize
    }

    /// Encodes the ID to its index key form.
    #[must_use]
    pub fn to_key(&self) -> IdKey {
        let mut bytes = [0u8; MAX_KEY_LEN];
        bytes[0] = self.prefix;
        bytes[1..=self.digest_len as usize].copy_from_slice(self.digest());
        IdKey {
            len: self.digest_len + 1,
            bytes,
        }
    }

    /// Decodes an ID from index key bytes (inverse of [`Self::to_key`]).
    ///
    /// # Errors
    /// Returns `IdError` for an empty, oversized, or badly prefixed key.
    pub fn from_key(key: &[u8]) -> Result<Self, IdError> {
        if key.len() < 2 || key.len() > MAX_KEY_LEN {
            return Err(IdError::InvalidKeyLength { len: key.len() });
        }

        let prefix = if key[0] == 0 { None } else { Some(key[0]) };

        Self::new(prefix, &key[1..])
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = self.prefix() {
            write!(f, "{}", p as char)?;
        }
        for byte in self.digest() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({self})")
    }
}

impl FromStr for ContentId {
    type Err = IdError;

    /// Parses the canonical text form.
    ///
    /// Odd text length means the first character is the role prefix; the
    /// remainder must be lowercase-insensitive hex of even length.
    fn from_str(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if !s.is_ascii() {
            return Err(IdError::InvalidHex);
        }

        let (prefix, hex) = if s.len() % 2 == 1 {
            (Some(s.as_bytes()[0]), &s[1..])
        } else {
            (None, s)
        };

        if hex.is_empty() {
            return Err(IdError::Empty);
        }

        let mut digest = [0u8; MAX_DIGEST_LEN];
        let n = hex.len() / 2;
        if n > MAX_DIGEST_LEN {
            return Err(IdError::DigestTooLong { len: n });
        }

        for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
            let hi = hex_nibble(chunk[0]).ok_or(IdError::InvalidHex)?;
            let lo = hex_nibble(chunk[1]).ok_or(IdError::InvalidHex)?;
            digest[i] = (hi << 4) | lo;
        }

        Self::new(prefix, &digest[..n])
    }
}

#[inline]
fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl PartialEq for ContentId {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix && self.digest() == other.digest()
    }
}

impl Eq for ContentId {}

impl std::hash::Hash for ContentId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.prefix.hash(state);
        self.digest().hash(state);
    }
}

impl PartialOrd for ContentId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContentId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_key().as_slice().cmp(other.to_key().as_slice())
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <&str>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Encoded key form of a content ID.
///
/// Holds the prefix byte followed by digest bytes in a fixed buffer so
/// lookups and comparisons never allocate.
#[derive(Clone, Copy, Debug)]
pub struct IdKey {
    len: u8,
    bytes: [u8; MAX_KEY_LEN],
}

impl IdKey {
    /// Returns the encoded key bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Returns the encoded key length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns true if the key is empty. Valid keys never are.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Opaque identifier of a pack blob in the storage back-end.
///
/// Blob IDs are short strings; the index stores them with a single length
/// byte, so they must not exceed 255 bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Creates a blob ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the blob ID text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the blob ID length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty blob ID.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for BlobId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for BlobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for BlobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
