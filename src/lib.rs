//! Core of a content-addressed snapshot repository.
//!
//! Two subsystems make up the crate:
//!
//! - **Pack index** ([`content`]): a compact sorted on-disk map from
//!   content ID to the location and metadata of that content inside a
//!   pack blob. The reader binary-searches index files through a
//!   [`content::ReaderAt`] without preloading entries; the builder merges
//!   entries from multiple writers and emits a globally unique artifact.
//! - **Snapshot garbage collection** ([`snapshot`]): a concurrent mark
//!   over the DAG of snapshot trees followed by a sweep that undeletes
//!   referenced tombstones and deletes unreachable contents older than a
//!   safety window.
//!
//! Everything outside these two concerns (blob storage back-ends, the
//! encryption layer, manifest storage, the command-line shell) is
//! consumed through the traits in [`content::store`],
//! [`snapshot::manifest`], and [`snapshot::tree_walker`].
//!
//! High-level flow of a collection run:
//! 1. List and load snapshot manifests, materialize their roots.
//! 2. Walk the trees in parallel, deduplicating by object ID, and build
//!    the live content-ID set.
//! 3. Iterate the content index (tombstones included) and classify every
//!    entry; mutate through the store facade.
//! 4. Flush and report statistics.

pub mod cancel;
pub mod content;
pub mod maintenance;
pub mod snapshot;

pub use cancel::CancelToken;
pub use content::{
    BlobId, ContentEntry, ContentId, ContentInfo, ContentStore, IdRange, Index, IndexBuilder,
    IndexError, IterateOptions, ReaderAt, StoreError,
};
pub use snapshot::{
    GcError, GcErrorKind, GcStats, Manifest, ManifestId, ObjectId, SafetyParameters,
    SnapshotSource, TreeEntry, TreeSource, TreeWalker, WalkError, WalkerConfig,
};
