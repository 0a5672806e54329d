//! Content subsystem: identifiers, the pack index, and the store facade.
//!
//! The pack index is a sorted on-disk map from content ID to the location
//! and metadata of that content inside a pack blob. Index files are
//! write-once; readers binary-search them through a [`ReaderAt`] and the
//! builder emits a globally unique artifact even for identical input.
//!
//! Pipeline overview:
//! 1. `content_id` encodes identifiers to fixed-length sortable keys.
//! 2. `index_builder` merges and sorts entries, then writes the file.
//! 3. `index` / `index_v1` open and navigate written files.
//! 4. `store` is the facade maintenance tasks drive a repository through.
//! 5. `verify` checks entries against the pack blobs backing them.

pub mod content_id;
pub(crate) mod endian;
pub mod index;
pub mod index_builder;
pub mod index_v1;
pub mod reader_at;
pub mod store;
pub mod verify;

pub use content_id::{BlobId, ContentId, IdError, IdKey, MANIFEST_PREFIX, MAX_DIGEST_LEN};
pub use index::{ContentEntry, ContentInfo, IdRange, Index, IndexError, FORMAT_VERSION_V1};
pub use index_builder::{BuildError, IndexBuilder};
pub use index_v1::{EntryView, IndexV1, INVALID_BLOB_ID};
pub use reader_at::ReaderAt;
pub use store::{ContentStore, IterateOptions, StoreError};
pub use verify::{verify_contents, BlobMap, VerifyError, VerifyOptions, VerifySummary};
