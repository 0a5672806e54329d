//! Bounded-parallel reachability walk over snapshot trees.
//!
//! Starting from root directory entries, a fixed pool of workers pulls
//! entries from a shared queue, resolves each object's backing content
//! IDs, and enqueues directory children. A concurrent visited-set keyed
//! by object ID guarantees every object is processed at most once per
//! walk even when shared subtrees are referenced by many parents; the
//! snapshot DAG is acyclic and content-addressed, so identical subtrees
//! collapse to one visit.
//!
//! Output is a set: no ordering is guaranteed. The first error wins and
//! aborts the walk; queued entries are drained without further object
//! reads so workers release promptly. Cancellation is checked between
//! entries.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use dashmap::DashSet;

use crate::cancel::CancelToken;
use crate::content::content_id::ContentId;
use crate::content::store::StoreError;
use crate::snapshot::manifest::{EntryKind, ObjectId, TreeEntry};

/// Object-level capabilities of a repository consumed by the walker.
pub trait TreeSource: Sync {
    /// Returns the full transitive set of content IDs that back the
    /// object, including the chunks of indirect listings.
    ///
    /// # Errors
    /// Returns `StoreError` when the object cannot be resolved.
    fn verify_object(&self, object_id: &ObjectId) -> Result<Vec<ContentId>, StoreError>;

    /// Returns the child entries of a directory object.
    ///
    /// # Errors
    /// Returns `StoreError` when the directory cannot be read.
    fn read_dir(&self, object_id: &ObjectId) -> Result<Vec<TreeEntry>, StoreError>;
}

/// Walker configuration.
#[derive(Clone, Debug)]
pub struct WalkerConfig {
    /// Number of worker threads.
    pub parallelism: usize,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self { parallelism: 8 }
    }
}

/// Errors from a reachability walk.
#[derive(Debug)]
#[non_exhaustive]
pub enum WalkError {
    /// Resolving or visiting an object failed.
    Object {
        object_id: ObjectId,
        source: StoreError,
    },
    /// The walk observed a cancellation request.
    Canceled,
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object { object_id, source } => {
                write!(f, "error visiting {object_id}: {source}")
            }
            Self::Canceled => write!(f, "walk canceled"),
        }
    }
}

impl std::error::Error for WalkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Object { source, .. } => Some(source),
            Self::Canceled => None,
        }
    }
}

enum Task {
    Entry(TreeEntry),
    Shutdown,
}

/// Concurrent walker over snapshot trees.
pub struct TreeWalker {
    config: WalkerConfig,
}

impl TreeWalker {
    /// Creates a walker with the given configuration.
    #[must_use]
    pub fn new(config: WalkerConfig) -> Self {
        Self { config }
    }

    /// Walks every tree reachable from `roots`.
    ///
    /// `object_cb` is invoked once per visited object with the entry and
    /// its backing content IDs; it runs concurrently from the worker
    /// pool. Partial state is discarded on failure.
    ///
    /// # Errors
    /// Returns the first object, callback, or cancellation error.
    pub fn walk<S, F>(
        &self,
        roots: &[TreeEntry],
        source: &S,
        cancel: &CancelToken,
        object_cb: F,
    ) -> Result<(), WalkError>
    where
        S: TreeSource + ?Sized,
        F: Fn(&TreeEntry, &[ContentId]) -> Result<(), StoreError> + Sync,
    {
        let workers = self.config.parallelism.max(1);

        let visited: DashSet<ObjectId> = DashSet::new();
        let (tx, rx) = unbounded::<Task>();
        // In-flight entry count; children are counted before their
        // parent completes, so reaching zero means the walk is done.
        let pending = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let first_error: Mutex<Option<WalkError>> = Mutex::new(None);

        for root in roots {
            if visited.insert(root.object_id) {
                pending.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(Task::Entry(root.clone()));
            }
        }

        if pending.load(Ordering::SeqCst) == 0 {
            return Ok(());
        }

        let visited = &visited;
        let tx = &tx;
        let pending = &pending;
        let stop = &stop;
        let first_error = &first_error;
        let object_cb = &object_cb;

        thread::scope(|s| {
            for _ in 0..workers {
                let rx = rx.clone();
                s.spawn(move || loop {
                    let entry = match rx.recv() {
                        Ok(Task::Entry(entry)) => entry,
                        Ok(Task::Shutdown) | Err(_) => return,
                    };

                    // After a failure the queue is drained without
                    // touching the repository so workers release fast.
                    if !stop.load(Ordering::SeqCst) {
                        let result = if cancel.is_canceled() {
                            Err(WalkError::Canceled)
                        } else {
                            process_entry(&entry, source, visited, tx, pending, object_cb)
                        };

                        if let Err(err) = result {
                            let mut slot = first_error.lock().expect("walker error slot");
                            if slot.is_none() {
                                *slot = Some(err);
                            }
                            stop.store(true, Ordering::SeqCst);
                        }
                    }

                    if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        for _ in 0..workers {
                            let _ = tx.send(Task::Shutdown);
                        }
                    }
                });
            }
        });

        let err = first_error.lock().expect("walker error slot").take();
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn process_entry<S, F>(
    entry: &TreeEntry,
    source: &S,
    visited: &DashSet<ObjectId>,
    tx: &Sender<Task>,
    pending: &AtomicUsize,
    object_cb: &F,
) -> Result<(), WalkError>
where
    S: TreeSource + ?Sized,
    F: Fn(&TreeEntry, &[ContentId]) -> Result<(), StoreError> + Sync,
{
    let object_id = entry.object_id;
    let wrap = |source| WalkError::Object { object_id, source };

    let content_ids = source.verify_object(&object_id).map_err(wrap)?;
    object_cb(entry, &content_ids).map_err(wrap)?;

    if entry.kind == EntryKind::Directory {
        for child in source.read_dir(&object_id).map_err(wrap)? {
            if visited.insert(child.object_id) {
                pending.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(Task::Entry(child));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use std::sync::atomic::AtomicUsize;

    fn cid(s: &str) -> ContentId {
        s.parse().unwrap()
    }

    fn file(name: &str, id: &str) -> TreeEntry {
        TreeEntry {
            name: name.into(),
            kind: EntryKind::File,
            object_id: ObjectId::direct(cid(id)),
        }
    }

    fn dir(name: &str, id: &str) -> TreeEntry {
        TreeEntry {
            name: name.into(),
            kind: EntryKind::Directory,
            object_id: ObjectId::direct(cid(id)),
        }
    }

    #[derive(Default)]
    struct FakeTree {
        children: AHashMap<ObjectId, Vec<TreeEntry>>,
        verify_calls: AtomicUsize,
        fail_on: Option<ObjectId>,
    }

    impl FakeTree {
        fn with_children(mut self, parent: &TreeEntry, children: Vec<TreeEntry>) -> Self {
            self.children.insert(parent.object_id, children);
            self
        }
    }

    impl TreeSource for FakeTree {
        fn verify_object(&self, object_id: &ObjectId) -> Result<Vec<ContentId>, StoreError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(*object_id) {
                return Err(StoreError::ContentNotFound {
                    content_id: object_id.content_id(),
                });
            }
            Ok(vec![object_id.content_id()])
        }

        fn read_dir(&self, object_id: &ObjectId) -> Result<Vec<TreeEntry>, StoreError> {
            Ok(self.children.get(object_id).cloned().unwrap_or_default())
        }
    }

    fn walk_live_set(
        walker: &TreeWalker,
        roots: &[TreeEntry],
        source: &FakeTree,
    ) -> Result<Vec<ContentId>, WalkError> {
        let live: DashSet<ContentId> = DashSet::new();
        walker.walk(roots, source, &CancelToken::new(), |_, ids| {
            for id in ids {
                live.insert(*id);
            }
            Ok(())
        })?;
        let mut ids: Vec<ContentId> = live.into_iter().collect();
        ids.sort();
        Ok(ids)
    }

    #[test]
    fn walks_whole_tree() {
        let root = dir("root", "aa000000");
        let sub = dir("sub", "bb000000");
        let tree = FakeTree::default()
            .with_children(&root, vec![file("f1", "cc000000"), sub.clone()])
            .with_children(&sub, vec![file("f2", "dd000000")]);

        let walker = TreeWalker::new(WalkerConfig { parallelism: 4 });
        let ids = walk_live_set(&walker, &[root], &tree).unwrap();

        let mut expected = vec![
            cid("aa000000"),
            cid("bb000000"),
            cid("cc000000"),
            cid("dd000000"),
        ];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn shared_subtrees_visited_once() {
        // Two roots share the same subtree object.
        let root1 = dir("root1", "aa000000");
        let root2 = dir("root2", "bb000000");
        let shared = dir("shared", "cc000000");
        let tree = FakeTree::default()
            .with_children(&root1, vec![shared.clone()])
            .with_children(&root2, vec![shared.clone()])
            .with_children(&shared, vec![file("f", "dd000000")]);

        let walker = TreeWalker::new(WalkerConfig { parallelism: 4 });
        walk_live_set(&walker, &[root1, root2], &tree).unwrap();

        // root1 + root2 + shared + f: the shared subtree is deduplicated.
        assert_eq!(tree.verify_calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn duplicate_roots_are_deduplicated() {
        let root = dir("root", "aa000000");
        let tree = FakeTree::default().with_children(&root, vec![]);

        let walker = TreeWalker::new(WalkerConfig::default());
        walk_live_set(&walker, &[root.clone(), root], &tree).unwrap();

        assert_eq!(tree.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_roots_complete_immediately() {
        let tree = FakeTree::default();
        let walker = TreeWalker::new(WalkerConfig::default());
        assert!(walk_live_set(&walker, &[], &tree).unwrap().is_empty());
    }

    #[test]
    fn first_object_error_aborts() {
        let root = dir("root", "aa000000");
        let bad = file("bad", "bb000000");
        let mut tree = FakeTree::default().with_children(&root, vec![bad.clone()]);
        tree.fail_on = Some(bad.object_id);

        let walker = TreeWalker::new(WalkerConfig { parallelism: 2 });
        let err = walk_live_set(&walker, &[root], &tree).unwrap_err();

        assert!(matches!(
            err,
            WalkError::Object { object_id, .. } if object_id == bad.object_id
        ));
    }

    #[test]
    fn callback_error_aborts() {
        let root = dir("root", "aa000000");
        let tree = FakeTree::default().with_children(&root, vec![]);

        let walker = TreeWalker::new(WalkerConfig { parallelism: 2 });
        let err = walker
            .walk(&[root], &tree, &CancelToken::new(), |_, _| {
                Err(StoreError::Canceled)
            })
            .unwrap_err();

        assert!(matches!(err, WalkError::Object { .. }));
    }

    #[test]
    fn canceled_token_stops_walk() {
        let root = dir("root", "aa000000");
        let tree = FakeTree::default().with_children(&root, vec![]);

        let cancel = CancelToken::new();
        cancel.cancel();

        let walker = TreeWalker::new(WalkerConfig { parallelism: 2 });
        let err = walker
            .walk(&[root], &tree, &cancel, |_, _| Ok(()))
            .unwrap_err();

        assert!(matches!(err, WalkError::Canceled));
        assert_eq!(tree.verify_calls.load(Ordering::SeqCst), 0);
    }
}
