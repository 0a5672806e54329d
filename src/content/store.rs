//! Content-store facade consumed by maintenance tasks.
//!
//! The garbage collector and verifier drive a repository through this
//! trait: enumerate index entries (optionally including tombstones,
//! optionally fanning callbacks out over worker threads), buffer
//! delete/undelete mutations, and flush buffered mutations into a new
//! index blob. Implementations live outside this crate and may be backed
//! by any blob store.
//!
//! # Contract
//! - `iterate_contents` invokes the callback from up to `parallel`
//!   threads; the first error (callback or machinery) wins and iteration
//!   stops promptly.
//! - `delete_content` is an idempotent mark-as-deleted in the write
//!   buffer; `undelete_content` clears a tombstone on an existing entry.
//! - `flush` publishes buffered mutations; flushing with nothing buffered
//!   must succeed.
//! - `now` is the repository clock, injectable so tests can force
//!   content ages.

use std::fmt;
use std::io;
use std::time::SystemTime;

use super::content_id::ContentId;
use super::index::{ContentInfo, IdRange, IndexError};

/// Errors from content-store operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The content ID has no entry.
    ContentNotFound { content_id: ContentId },
    /// An index read or parse failed.
    Index(IndexError),
    /// Underlying storage failed.
    Io(io::Error),
    /// The operation observed a cancellation request.
    Canceled,
    /// Implementation-specific failure.
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentNotFound { content_id } => {
                write!(f, "content not found: {content_id}")
            }
            Self::Index(err) => write!(f, "index error: {err}"),
            Self::Io(err) => write!(f, "storage I/O error: {err}"),
            Self::Canceled => write!(f, "operation canceled"),
            Self::Other(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Index(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<IndexError> for StoreError {
    fn from(err: IndexError) -> Self {
        Self::Index(err)
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Options for [`ContentStore::iterate_contents`].
#[derive(Clone, Debug)]
pub struct IterateOptions {
    /// Restrict iteration to this ID range.
    pub range: IdRange,
    /// Number of worker threads invoking the callback; 1 is sequential.
    pub parallel: usize,
    /// Include tombstoned entries.
    pub include_deleted: bool,
}

impl Default for IterateOptions {
    fn default() -> Self {
        Self {
            range: IdRange::all(),
            parallel: 1,
            include_deleted: false,
        }
    }
}

/// Repository content capabilities consumed by maintenance tasks.
pub trait ContentStore: Sync {
    /// Enumerates content entries, invoking `cb` for each.
    ///
    /// With `options.parallel > 1` the callback runs concurrently from a
    /// fixed pool of workers and must be thread-safe. No ordering is
    /// guaranteed in that case.
    ///
    /// # Errors
    /// Returns the first callback or enumeration error.
    fn iterate_contents<E>(
        &self,
        options: &IterateOptions,
        cb: &(dyn Fn(&dyn ContentInfo) -> Result<(), E> + Sync),
    ) -> Result<(), E>
    where
        E: From<StoreError> + Send;

    /// Marks a content as deleted in the write buffer. Idempotent.
    ///
    /// # Errors
    /// Returns `StoreError` when the mutation cannot be buffered.
    fn delete_content(&self, id: &ContentId) -> Result<(), StoreError>;

    /// Clears the deletion tombstone on an existing entry.
    ///
    /// # Errors
    /// Returns `StoreError::ContentNotFound` for unknown IDs.
    fn undelete_content(&self, id: &ContentId) -> Result<(), StoreError>;

    /// Publishes buffered mutations as a new index blob.
    ///
    /// A flush with no pending mutations succeeds as a no-op.
    ///
    /// # Errors
    /// Returns `StoreError` when the new index cannot be written.
    fn flush(&self) -> Result<(), StoreError>;

    /// The repository clock.
    fn now(&self) -> SystemTime;
}
