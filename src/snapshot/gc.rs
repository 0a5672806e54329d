//! Snapshot garbage collection.
//!
//! A run proceeds through four phases: mark (walk every snapshot tree
//! and collect the live content-ID set), sweep (classify every index
//! entry, tombstones included), flush (publish buffered mutations), and
//! done. A fatal mark or sweep error ends the run immediately; the
//! statistics gathered up to that point are still returned on the error.
//!
//! Classification of an entry:
//! - manifest-prefixed IDs are system metadata, never deleted;
//! - live IDs are in use, and a live tombstoned entry is undeleted;
//! - dead IDs younger than the safety window are left alone (a
//!   concurrent writer may not have committed the referencing manifest
//!   yet);
//! - remaining dead IDs are unused and, when deletion is enabled,
//!   tombstoned. Every 100 000 unused entries the pending delete batch
//!   is flushed to bound its size.
//!
//! A dry run that finds unused contents reports it as an error after
//! populating statistics, so a command-line exit code can reflect
//! "there is work to do" without a separate channel.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashSet;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::content::content_id::ContentId;
use crate::content::index::ContentInfo;
use crate::content::store::{ContentStore, IterateOptions, StoreError};
use crate::maintenance;
use crate::snapshot::manifest::SnapshotSource;
use crate::snapshot::safety::SafetyParameters;
use crate::snapshot::stats::{CountSum, GcStats};
use crate::snapshot::tree_walker::{TreeSource, TreeWalker, WalkError, WalkerConfig};

/// Progress-log and checkpoint-flush interval, in unused entries.
const CHECKPOINT_INTERVAL: u32 = 100_000;

/// Failure of a collector run, carrying the statistics gathered so far.
#[derive(Debug)]
pub struct GcError {
    pub stats: GcStats,
    pub kind: GcErrorKind,
}

/// What ended the run.
#[derive(Debug)]
#[non_exhaustive]
pub enum GcErrorKind {
    /// Listing or loading snapshot manifests failed.
    Snapshots(StoreError),
    /// The reachability walk failed.
    Mark(WalkError),
    /// Content enumeration machinery failed.
    Iterate(StoreError),
    /// Undeleting a referenced tombstone failed.
    Undelete {
        content_id: ContentId,
        source: StoreError,
    },
    /// Deleting an unused content failed.
    Delete {
        content_id: ContentId,
        source: StoreError,
    },
    /// A periodic checkpoint flush failed.
    CheckpointFlush(StoreError),
    /// The final flush failed.
    FinalFlush(StoreError),
    /// Dry run found unused contents; nothing was deleted.
    DeleteFlagNotSet { unused_count: u32 },
    /// The run observed a cancellation request.
    Canceled,
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            GcErrorKind::Snapshots(err) => write!(f, "unable to enumerate snapshots: {err}"),
            GcErrorKind::Mark(err) => write!(f, "error walking snapshot trees: {err}"),
            GcErrorKind::Iterate(err) => write!(f, "error iterating contents: {err}"),
            GcErrorKind::Undelete { content_id, source } => {
                write!(f, "could not undelete referenced content {content_id}: {source}")
            }
            GcErrorKind::Delete { content_id, source } => {
                write!(f, "error deleting content {content_id}: {source}")
            }
            GcErrorKind::CheckpointFlush(err) => write!(f, "checkpoint flush error: {err}"),
            GcErrorKind::FinalFlush(err) => write!(f, "flush error: {err}"),
            GcErrorKind::DeleteFlagNotSet { unused_count } => write!(
                f,
                "not deleting because the delete flag was not set ({unused_count} unused contents)"
            ),
            GcErrorKind::Canceled => write!(f, "garbage collection canceled"),
        }
    }
}

impl std::error::Error for GcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            GcErrorKind::Snapshots(err)
            | GcErrorKind::Iterate(err)
            | GcErrorKind::CheckpointFlush(err)
            | GcErrorKind::FinalFlush(err)
            | GcErrorKind::Undelete { source: err, .. }
            | GcErrorKind::Delete { source: err, .. } => Some(err),
            GcErrorKind::Mark(err) => Some(err),
            GcErrorKind::DeleteFlagNotSet { .. } | GcErrorKind::Canceled => None,
        }
    }
}

impl From<StoreError> for GcErrorKind {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Canceled => Self::Canceled,
            other => Self::Iterate(other),
        }
    }
}

#[derive(Default)]
struct SweepCounters {
    unused: CountSum,
    in_use: CountSum,
    system: CountSum,
    too_recent: CountSum,
    undeleted: CountSum,
}

impl SweepCounters {
    fn snapshot(&self) -> GcStats {
        let (unused_count, unused_bytes) = self.unused.approximate();
        let (in_use_count, in_use_bytes) = self.in_use.approximate();
        let (system_count, system_bytes) = self.system.approximate();
        let (too_recent_count, too_recent_bytes) = self.too_recent.approximate();
        let (undeleted_count, undeleted_bytes) = self.undeleted.approximate();

        GcStats {
            unused_count,
            unused_bytes,
            in_use_count,
            in_use_bytes,
            system_count,
            system_bytes,
            too_recent_count,
            too_recent_bytes,
            undeleted_count,
            undeleted_bytes,
        }
    }
}

/// Runs garbage collection over all snapshots in the repository.
///
/// With `do_delete` false this is a dry run: nothing is mutated, and
/// finding unused contents is reported as
/// [`GcErrorKind::DeleteFlagNotSet`] after statistics are populated.
///
/// # Errors
/// Returns `GcError` on any mark, sweep, or flush failure, on
/// cancellation, and for the dry-run finding; the error carries the
/// statistics gathered so far.
pub fn run<R>(
    repo: &R,
    do_delete: bool,
    safety: SafetyParameters,
    cancel: &CancelToken,
) -> Result<GcStats, GcError>
where
    R: ContentStore + SnapshotSource + TreeSource,
{
    maintenance::report_run(maintenance::TASK_SNAPSHOT_GC, || {
        run_internal(repo, do_delete, safety, cancel)
    })
}

fn run_internal<R>(
    repo: &R,
    do_delete: bool,
    safety: SafetyParameters,
    cancel: &CancelToken,
) -> Result<GcStats, GcError>
where
    R: ContentStore + SnapshotSource + TreeSource,
{
    let counters = SweepCounters::default();
    let result = run_body(repo, do_delete, safety, cancel, &counters);
    let stats = counters.snapshot();

    if let Err(kind) = result {
        return Err(GcError { stats, kind });
    }

    if stats.unused_count > 0 && !do_delete {
        return Err(GcError {
            kind: GcErrorKind::DeleteFlagNotSet {
                unused_count: stats.unused_count,
            },
            stats,
        });
    }

    // No-op when nothing changed, but must still succeed.
    if let Err(err) = repo.flush() {
        return Err(GcError {
            stats,
            kind: GcErrorKind::FinalFlush(err),
        });
    }

    info!(%stats, "garbage collection finished");

    Ok(stats)
}

fn run_body<R>(
    repo: &R,
    do_delete: bool,
    safety: SafetyParameters,
    cancel: &CancelToken,
    counters: &SweepCounters,
) -> Result<(), GcErrorKind>
where
    R: ContentStore + SnapshotSource + TreeSource,
{
    let live: DashSet<ContentId> = DashSet::new();
    find_in_use_content_ids(repo, cancel, &live)?;

    info!("looking for unreferenced contents");

    // Tombstoned entries must be visible so referenced ones can be
    // recovered.
    let options = IterateOptions {
        include_deleted: true,
        ..IterateOptions::default()
    };

    repo.iterate_contents::<GcErrorKind>(&options, &|info| {
        if cancel.is_canceled() {
            return Err(GcErrorKind::Canceled);
        }
        classify_entry(repo, do_delete, safety, &live, counters, info)
    })
}

fn find_in_use_content_ids<R>(
    repo: &R,
    cancel: &CancelToken,
    live: &DashSet<ContentId>,
) -> Result<(), GcErrorKind>
where
    R: SnapshotSource + TreeSource,
{
    let ids = repo
        .list_snapshot_manifests()
        .map_err(GcErrorKind::Snapshots)?;
    let manifests = repo.load_snapshots(&ids).map_err(GcErrorKind::Snapshots)?;

    let mut roots = Vec::with_capacity(manifests.len());
    for manifest in &manifests {
        roots.push(repo.snapshot_root(manifest).map_err(GcErrorKind::Snapshots)?);
    }

    info!("looking for active contents");

    let walker = TreeWalker::new(WalkerConfig::default());
    walker
        .walk(&roots, repo, cancel, |_, content_ids| {
            for id in content_ids {
                live.insert(*id);
            }
            Ok(())
        })
        .map_err(|err| match err {
            WalkError::Canceled => GcErrorKind::Canceled,
            other => GcErrorKind::Mark(other),
        })
}

fn classify_entry<R: ContentStore>(
    repo: &R,
    do_delete: bool,
    safety: SafetyParameters,
    live: &DashSet<ContentId>,
    counters: &SweepCounters,
    info: &dyn ContentInfo,
) -> Result<(), GcErrorKind> {
    let content_id = info.content_id();
    let packed = i64::from(info.packed_length());

    if content_id.is_manifest() {
        counters.system.add(packed);
        return Ok(());
    }

    if live.contains(&content_id) {
        if info.deleted() {
            repo.undelete_content(&content_id)
                .map_err(|source| GcErrorKind::Undelete { content_id, source })?;
            counters.undeleted.add(packed);
        }
        counters.in_use.add(packed);
        return Ok(());
    }

    let age_seconds = unix_seconds(repo.now()) - info.timestamp_seconds();
    let min_age_seconds = safety.min_content_age_subject_to_gc.as_secs() as i64;
    if age_seconds < min_age_seconds {
        debug!(
            content_id = %content_id,
            packed_length = info.packed_length(),
            timestamp_seconds = info.timestamp_seconds(),
            "recent unreferenced content"
        );
        counters.too_recent.add(packed);
        return Ok(());
    }

    debug!(
        content_id = %content_id,
        packed_length = info.packed_length(),
        timestamp_seconds = info.timestamp_seconds(),
        "unreferenced content"
    );
    let (count, total_bytes) = counters.unused.add(packed);

    if do_delete {
        repo.delete_content(&content_id)
            .map_err(|source| GcErrorKind::Delete { content_id, source })?;
    }

    if count % CHECKPOINT_INTERVAL == 0 {
        info!("found {count} unused contents so far ({total_bytes} bytes)");
        if do_delete {
            repo.flush().map_err(GcErrorKind::CheckpointFlush)?;
        }
    }

    Ok(())
}

fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}
