//! End-to-end garbage collection scenarios over an in-memory repository.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use snapvault::content::{
    BlobId, ContentEntry, ContentId, ContentInfo, ContentStore, IterateOptions, StoreError,
};
use snapvault::snapshot::{
    gc, EntryKind, GcErrorKind, Manifest, ManifestId, ObjectId, SafetyParameters, SnapshotSource,
    SourceInfo, TreeEntry, TreeSource,
};
use snapvault::CancelToken;

const HOUR: i64 = 3600;
const PACKED_LEN: u32 = 100;

fn cid(text: &str) -> ContentId {
    text.parse().unwrap()
}

#[derive(Clone, Default)]
struct ObjectRecord {
    content_ids: Vec<ContentId>,
    children: Vec<TreeEntry>,
}

/// In-memory repository implementing the capabilities the collector
/// consumes, with an injectable clock.
#[derive(Default)]
struct TestRepo {
    contents: Mutex<BTreeMap<ContentId, ContentEntry>>,
    manifests: Mutex<Vec<Manifest>>,
    objects: Mutex<HashMap<ObjectId, ObjectRecord>>,
    clock_seconds: AtomicI64,
    flushes: AtomicUsize,
}

impl TestRepo {
    fn new(now_seconds: i64) -> Self {
        let repo = Self::default();
        repo.clock_seconds.store(now_seconds, Ordering::SeqCst);
        repo
    }

    fn now_seconds(&self) -> i64 {
        self.clock_seconds.load(Ordering::SeqCst)
    }

    fn advance_clock(&self, seconds: i64) {
        self.clock_seconds.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Stores a content entry timestamped `age_seconds` before now.
    fn add_content(&self, id: ContentId, age_seconds: i64) {
        let entry = ContentEntry {
            content_id: id,
            timestamp_seconds: self.now_seconds() - age_seconds,
            format_version: 1,
            pack_blob_id: BlobId::from("pack-1"),
            deleted: false,
            pack_offset: 0,
            packed_length: PACKED_LEN,
            original_length: PACKED_LEN,
        };
        self.contents.lock().unwrap().insert(id, entry);
    }

    fn set_tombstone(&self, id: &ContentId, deleted: bool) {
        self.contents
            .lock()
            .unwrap()
            .get_mut(id)
            .expect("content must exist")
            .deleted = deleted;
    }

    fn is_tombstoned(&self, id: &ContentId) -> bool {
        self.contents.lock().unwrap()[id].deleted
    }

    fn tombstone_count(&self) -> usize {
        self.contents
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.deleted)
            .count()
    }

    /// Registers a file object backed by the given contents.
    fn file_object(&self, name: &str, id: ContentId) -> TreeEntry {
        let object_id = ObjectId::direct(id);
        self.objects.lock().unwrap().insert(
            object_id,
            ObjectRecord {
                content_ids: vec![id],
                children: Vec::new(),
            },
        );
        TreeEntry {
            name: name.into(),
            kind: EntryKind::File,
            object_id,
        }
    }

    /// Registers a directory object whose listing is backed by `id`.
    fn dir_object(&self, name: &str, id: ContentId, children: Vec<TreeEntry>) -> TreeEntry {
        let object_id = ObjectId::direct(id);
        self.objects.lock().unwrap().insert(
            object_id,
            ObjectRecord {
                content_ids: vec![id],
                children,
            },
        );
        TreeEntry {
            name: name.into(),
            kind: EntryKind::Directory,
            object_id,
        }
    }

    fn add_snapshot(&self, id: &str, root: TreeEntry) {
        let now = self.now_seconds();
        self.manifests.lock().unwrap().push(Manifest {
            id: ManifestId::from(id),
            source: SourceInfo {
                host: "host1".into(),
                user_name: "user1".into(),
                path: "/data".into(),
            },
            start_time_seconds: now,
            end_time_seconds: now,
            description: String::new(),
            root_entry: Some(root),
        });
    }

    fn remove_all_snapshots(&self) {
        self.manifests.lock().unwrap().clear();
    }
}

fn in_range(options: &IterateOptions, id: &ContentId) -> bool {
    options.range.start.as_ref().map_or(true, |s| id >= s)
        && options.range.end.as_ref().map_or(true, |e| id < e)
}

impl ContentStore for TestRepo {
    fn iterate_contents<E>(
        &self,
        options: &IterateOptions,
        cb: &(dyn Fn(&dyn ContentInfo) -> Result<(), E> + Sync),
    ) -> Result<(), E>
    where
        E: From<StoreError> + Send,
    {
        // Snapshot entries up front so callbacks can mutate the store
        // without deadlocking against the iteration lock.
        let snapshot: Vec<ContentEntry> = {
            let contents = self.contents.lock().unwrap();
            contents
                .values()
                .filter(|e| options.include_deleted || !e.deleted)
                .filter(|e| in_range(options, &e.content_id))
                .cloned()
                .collect()
        };

        if options.parallel <= 1 {
            for entry in &snapshot {
                cb(entry)?;
            }
            return Ok(());
        }

        let first_error: Mutex<Option<E>> = Mutex::new(None);
        let chunk_size = snapshot.len().div_ceil(options.parallel).max(1);

        std::thread::scope(|s| {
            for chunk in snapshot.chunks(chunk_size) {
                let first_error = &first_error;
                s.spawn(move || {
                    for entry in chunk {
                        if first_error.lock().unwrap().is_some() {
                            return;
                        }
                        if let Err(err) = cb(entry) {
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(err);
                            }
                            return;
                        }
                    }
                });
            }
        });

        match first_error.into_inner().unwrap() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn delete_content(&self, id: &ContentId) -> Result<(), StoreError> {
        let mut contents = self.contents.lock().unwrap();
        match contents.get_mut(id) {
            Some(entry) => {
                entry.deleted = true;
                Ok(())
            }
            None => Err(StoreError::ContentNotFound { content_id: *id }),
        }
    }

    fn undelete_content(&self, id: &ContentId) -> Result<(), StoreError> {
        let mut contents = self.contents.lock().unwrap();
        match contents.get_mut(id) {
            Some(entry) => {
                entry.deleted = false;
                Ok(())
            }
            None => Err(StoreError::ContentNotFound { content_id: *id }),
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.now_seconds() as u64)
    }
}

impl SnapshotSource for TestRepo {
    fn list_snapshot_manifests(&self) -> Result<Vec<ManifestId>, StoreError> {
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.id.clone())
            .collect())
    }

    fn load_snapshots(&self, ids: &[ManifestId]) -> Result<Vec<Manifest>, StoreError> {
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }

    fn snapshot_root(&self, manifest: &Manifest) -> Result<TreeEntry, StoreError> {
        manifest.root_entry.clone().ok_or_else(|| {
            StoreError::Other(format!("snapshot {} has no root entry", manifest.id).into())
        })
    }
}

impl TreeSource for TestRepo {
    fn verify_object(&self, object_id: &ObjectId) -> Result<Vec<ContentId>, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(object_id)
            .map(|record| record.content_ids.clone())
            .ok_or(StoreError::ContentNotFound {
                content_id: object_id.content_id(),
            })
    }

    fn read_dir(&self, object_id: &ObjectId) -> Result<Vec<TreeEntry>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(object_id)
            .map(|record| record.children.clone())
            .unwrap_or_default())
    }
}

const NOW: i64 = 1_700_000_000;

/// Repository with one snapshot: 2 manifest contents (system) and 3
/// reachable data contents (a directory listing and two files).
fn single_snapshot_repo(data_age_seconds: i64) -> (TestRepo, [ContentId; 3]) {
    let repo = TestRepo::new(NOW);

    let d_dir = cid("d1000000");
    let d_file1 = cid("d2000000");
    let d_file2 = cid("d3000000");
    for id in [d_dir, d_file1, d_file2] {
        repo.add_content(id, data_age_seconds);
    }

    repo.add_content(cid("maa000000"), data_age_seconds);
    repo.add_content(cid("mbb000000"), data_age_seconds);

    let file1 = repo.file_object("file1", d_file1);
    let file2 = repo.file_object("file2", d_file2);
    let root = repo.dir_object("/data", d_dir, vec![file1, file2]);
    repo.add_snapshot("snap-1", root);

    (repo, [d_dir, d_file1, d_file2])
}

#[test]
fn fresh_repository_reports_all_zero() {
    let repo = TestRepo::new(NOW);

    let stats = gc::run(&repo, true, SafetyParameters::DEFAULT, &CancelToken::new()).unwrap();

    assert_eq!(stats, Default::default());
    // The final flush runs even when nothing changed.
    assert_eq!(repo.flushes.load(Ordering::SeqCst), 1);
}

#[test]
fn single_snapshot_has_no_garbage() {
    let (repo, _) = single_snapshot_repo(2 * HOUR);

    let stats = gc::run(&repo, true, SafetyParameters::DEFAULT, &CancelToken::new()).unwrap();

    assert_eq!(stats.in_use_count, 3);
    assert_eq!(stats.in_use_bytes, 3 * i64::from(PACKED_LEN));
    assert_eq!(stats.unused_count, 0);
    assert_eq!(stats.system_count, 2);
    assert_eq!(stats.too_recent_count, 0);
    assert_eq!(stats.undeleted_count, 0);
    assert_eq!(repo.tombstone_count(), 0);
}

#[test]
fn unreferenced_but_recent_contents_survive() {
    let (repo, _) = single_snapshot_repo(60);
    repo.remove_all_snapshots();

    let stats = gc::run(&repo, true, SafetyParameters::DEFAULT, &CancelToken::new()).unwrap();

    assert_eq!(stats.unused_count, 0);
    assert_eq!(stats.too_recent_count, 3);
    assert_eq!(stats.system_count, 2);
    assert_eq!(repo.tombstone_count(), 0);
}

/// State shared by the past-window scenarios: the snapshot manifests are
/// gone, two data contents are older than any safety window, and manifest
/// removal wrote one fresh manifest content.
fn unreferenced_past_window_repo() -> (TestRepo, [ContentId; 2]) {
    let repo = TestRepo::new(NOW);

    let d_dir = cid("d1000000");
    let d_file = cid("d2000000");
    repo.add_content(d_dir, 48 * HOUR);
    repo.add_content(d_file, 48 * HOUR);

    repo.add_content(cid("maa000000"), 48 * HOUR);
    repo.add_content(cid("mbb000000"), 48 * HOUR);
    // Manifest deletion writes a new manifest content just before the run.
    repo.add_content(cid("mcc000000"), 0);

    (repo, [d_dir, d_file])
}

#[test]
fn unreferenced_past_window_is_deleted() {
    let (repo, data) = unreferenced_past_window_repo();
    repo.advance_clock(HOUR);

    let stats = gc::run(&repo, true, SafetyParameters::NONE, &CancelToken::new()).unwrap();

    assert_eq!(stats.unused_count, 2);
    assert_eq!(stats.unused_bytes, 2 * i64::from(PACKED_LEN));
    assert_eq!(stats.system_count, 3);
    assert_eq!(repo.tombstone_count(), 2);
    for id in data {
        assert!(repo.is_tombstoned(&id));
    }
}

#[test]
fn dry_run_reports_work_without_deleting() {
    let (repo, _) = unreferenced_past_window_repo();
    repo.advance_clock(HOUR);

    let err = gc::run(&repo, false, SafetyParameters::NONE, &CancelToken::new()).unwrap_err();

    assert!(matches!(
        err.kind,
        GcErrorKind::DeleteFlagNotSet { unused_count: 2 }
    ));
    assert!(err.to_string().contains("delete flag"));
    // Statistics are fully populated and match the deleting run.
    assert_eq!(err.stats.unused_count, 2);
    assert_eq!(err.stats.system_count, 3);
    assert_eq!(repo.tombstone_count(), 0);

    let (deleting, _) = unreferenced_past_window_repo();
    deleting.advance_clock(HOUR);
    let stats = gc::run(&deleting, true, SafetyParameters::NONE, &CancelToken::new()).unwrap();
    assert_eq!(err.stats, stats);
}

#[test]
fn referenced_tombstones_are_undeleted() {
    let (repo, data) = single_snapshot_repo(2 * HOUR);
    // Externally tombstoned, then observed reachable again.
    repo.set_tombstone(&data[1], true);

    let stats = gc::run(&repo, true, SafetyParameters::DEFAULT, &CancelToken::new()).unwrap();

    assert!(stats.undeleted_count >= 1);
    assert_eq!(stats.in_use_count, 3);
    assert!(!repo.is_tombstoned(&data[1]));
}

#[test]
fn manifest_contents_are_never_deleted() {
    let repo = TestRepo::new(NOW);
    // Old, unreferenced, and manifest-prefixed: still exempt.
    repo.add_content(cid("mdd000000"), 1000 * HOUR);

    let stats = gc::run(&repo, true, SafetyParameters::NONE, &CancelToken::new()).unwrap();

    assert_eq!(stats.system_count, 1);
    assert_eq!(stats.unused_count, 0);
    assert_eq!(repo.tombstone_count(), 0);
}

#[test]
fn safety_window_boundary_is_inclusive() {
    let safety = SafetyParameters {
        min_content_age_subject_to_gc: Duration::from_secs(600),
    };

    // Exactly at the window: eligible.
    let repo = TestRepo::new(NOW);
    repo.add_content(cid("d1000000"), 600);
    let stats = gc::run(&repo, true, safety, &CancelToken::new()).unwrap();
    assert_eq!(stats.unused_count, 1);

    // One second younger: kept.
    let repo = TestRepo::new(NOW);
    repo.add_content(cid("d1000000"), 599);
    let stats = gc::run(&repo, true, safety, &CancelToken::new()).unwrap();
    assert_eq!(stats.too_recent_count, 1);
    assert_eq!(stats.unused_count, 0);
}

#[test]
fn canceled_run_surfaces_cancellation() {
    let (repo, _) = single_snapshot_repo(2 * HOUR);

    let cancel = CancelToken::new();
    cancel.cancel();

    let err = gc::run(&repo, true, SafetyParameters::DEFAULT, &cancel).unwrap_err();
    assert!(matches!(err.kind, GcErrorKind::Canceled));
    assert_eq!(repo.tombstone_count(), 0);
}

#[test]
fn undelete_failure_aborts_the_run() {
    struct FailingUndelete(TestRepo);

    impl ContentStore for FailingUndelete {
        fn iterate_contents<E>(
            &self,
            options: &IterateOptions,
            cb: &(dyn Fn(&dyn ContentInfo) -> Result<(), E> + Sync),
        ) -> Result<(), E>
        where
            E: From<StoreError> + Send,
        {
            self.0.iterate_contents(options, cb)
        }

        fn delete_content(&self, id: &ContentId) -> Result<(), StoreError> {
            self.0.delete_content(id)
        }

        fn undelete_content(&self, _id: &ContentId) -> Result<(), StoreError> {
            Err(StoreError::Other("undelete rejected".into()))
        }

        fn flush(&self) -> Result<(), StoreError> {
            self.0.flush()
        }

        fn now(&self) -> SystemTime {
            self.0.now()
        }
    }

    impl SnapshotSource for FailingUndelete {
        fn list_snapshot_manifests(&self) -> Result<Vec<ManifestId>, StoreError> {
            self.0.list_snapshot_manifests()
        }

        fn load_snapshots(&self, ids: &[ManifestId]) -> Result<Vec<Manifest>, StoreError> {
            self.0.load_snapshots(ids)
        }

        fn snapshot_root(&self, manifest: &Manifest) -> Result<TreeEntry, StoreError> {
            self.0.snapshot_root(manifest)
        }
    }

    impl TreeSource for FailingUndelete {
        fn verify_object(&self, object_id: &ObjectId) -> Result<Vec<ContentId>, StoreError> {
            self.0.verify_object(object_id)
        }

        fn read_dir(&self, object_id: &ObjectId) -> Result<Vec<TreeEntry>, StoreError> {
            self.0.read_dir(object_id)
        }
    }

    let (inner, data) = single_snapshot_repo(2 * HOUR);
    inner.set_tombstone(&data[1], true);
    let repo = FailingUndelete(inner);

    let err = gc::run(&repo, true, SafetyParameters::DEFAULT, &CancelToken::new()).unwrap_err();
    assert!(matches!(err.kind, GcErrorKind::Undelete { .. }));
}
