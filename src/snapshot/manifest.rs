//! Snapshot object model: manifests, object IDs, and tree entries.
//!
//! A snapshot is a manifest plus the reachable tree of directory and file
//! objects it names. Manifests are small structured documents stored as
//! contents with the manifest prefix; the types here are the shape the
//! collector consumes, with serde derives so host repositories can
//! persist them as JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::content::content_id::{ContentId, IdError};
use crate::content::store::StoreError;

/// Opaque, fixed-width, content-addressed handle for a snapshot tree
/// object.
///
/// An indirect object's bytes are an index of further chunks rather than
/// the object payload itself; the distinction matters to object readers
/// but not to reachability, which treats both as one visited node. The
/// text form prefixes indirect IDs with `I`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    indirect: bool,
    content: ContentId,
}

impl ObjectId {
    /// Handle for an object stored directly as one content.
    #[must_use]
    pub fn direct(content: ContentId) -> Self {
        Self {
            indirect: false,
            content,
        }
    }

    /// Handle for an object whose listing is chunked across contents.
    #[must_use]
    pub fn indirect(content: ContentId) -> Self {
        Self {
            indirect: true,
            content,
        }
    }

    /// The content ID the handle points at.
    #[inline]
    #[must_use]
    pub fn content_id(&self) -> ContentId {
        self.content
    }

    /// True for chunked (indirect) objects.
    #[inline]
    #[must_use]
    pub fn is_indirect(&self) -> bool {
        self.indirect
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.indirect {
            write!(f, "I")?;
        }
        write!(f, "{}", self.content)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl FromStr for ObjectId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, IdError> {
        if let Some(rest) = s.strip_prefix('I') {
            Ok(Self::indirect(rest.parse()?))
        } else {
            Ok(Self::direct(s.parse()?))
        }
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <&str>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a stored snapshot manifest.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(String);

impl ManifestId {
    /// Creates a manifest ID from its text form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the manifest ID text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ManifestId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a snapshot tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry in a snapshot tree: a named object reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Entry name within its parent directory.
    pub name: String,
    pub kind: EntryKind,
    /// Handle of the object backing this entry.
    pub object_id: ObjectId,
}

/// Origin of a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub host: String,
    pub user_name: String,
    pub path: String,
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user_name, self.host, self.path)
    }
}

/// A stored snapshot record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: ManifestId,
    pub source: SourceInfo,
    /// Snapshot start time, seconds since the epoch.
    pub start_time_seconds: i64,
    /// Snapshot end time, seconds since the epoch.
    pub end_time_seconds: i64,
    #[serde(default)]
    pub description: String,
    /// Root of the snapshot tree; absent for incomplete snapshots.
    pub root_entry: Option<TreeEntry>,
}

/// Snapshot enumeration capabilities of a repository.
pub trait SnapshotSource {
    /// Lists all stored snapshot manifest IDs.
    ///
    /// # Errors
    /// Returns `StoreError` when the manifest store cannot be read.
    fn list_snapshot_manifests(&self) -> Result<Vec<ManifestId>, StoreError>;

    /// Loads the given manifests.
    ///
    /// # Errors
    /// Returns `StoreError` for unknown IDs or unreadable manifests.
    fn load_snapshots(&self, ids: &[ManifestId]) -> Result<Vec<Manifest>, StoreError>;

    /// Materializes the root tree entry of a snapshot.
    ///
    /// # Errors
    /// Returns `StoreError` when the manifest has no usable root.
    fn snapshot_root(&self, manifest: &Manifest) -> Result<TreeEntry, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_text_roundtrip() {
        let direct: ObjectId = "abcd1234".parse().unwrap();
        assert!(!direct.is_indirect());
        assert_eq!(direct.to_string(), "abcd1234");

        let indirect: ObjectId = "Iabcd1234".parse().unwrap();
        assert!(indirect.is_indirect());
        assert_eq!(indirect.to_string(), "Iabcd1234");

        assert_ne!(direct, indirect);
        assert_eq!(direct.content_id(), indirect.content_id());
    }

    #[test]
    fn manifest_json_roundtrip() {
        let manifest = Manifest {
            id: ManifestId::from("manifest-1"),
            source: SourceInfo {
                host: "host1".into(),
                user_name: "user1".into(),
                path: "/data".into(),
            },
            start_time_seconds: 1_600_000_000,
            end_time_seconds: 1_600_000_060,
            description: String::new(),
            root_entry: Some(TreeEntry {
                name: "/data".into(),
                kind: EntryKind::Directory,
                object_id: "kaabbccdd".parse().unwrap(),
            }),
        };

        let json = serde_json::to_string(&manifest).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }
}
