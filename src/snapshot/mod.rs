//! Snapshot subsystem: manifests, reachability, and garbage collection.
//!
//! Garbage collection composes two passes. The mark pass walks every
//! snapshot tree with a bounded-parallel worker pool and collects the set
//! of content IDs still reachable from some manifest. The sweep pass then
//! iterates the content index, tombstones included, and classifies every
//! entry as system, in-use, too-recent, or unused, undeleting referenced
//! tombstones and deleting unused contents past the safety window.

pub mod gc;
pub mod manifest;
pub mod safety;
pub mod stats;
pub mod tree_walker;

pub use gc::{run, GcError, GcErrorKind};
pub use manifest::{
    EntryKind, Manifest, ManifestId, ObjectId, SnapshotSource, SourceInfo, TreeEntry,
};
pub use safety::SafetyParameters;
pub use stats::{CountSum, GcStats};
pub use tree_walker::{TreeSource, TreeWalker, WalkError, WalkerConfig};
