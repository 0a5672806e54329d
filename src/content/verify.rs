//! Content-to-blob consistency verification.
//!
//! Checks that every index entry is backed by a pack blob that exists
//! and is long enough to contain it. Failures are counted and logged
//! rather than aborting, so one corrupt entry does not hide the rest;
//! the run fails at the end when any content failed.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use ahash::AHashMap;
use tracing::{error, info};

use super::content_id::BlobId;
use super::index::ContentInfo;
use super::store::{ContentStore, IterateOptions, StoreError};

/// Known pack blobs: blob ID to stored length in bytes.
pub type BlobMap = AHashMap<BlobId, u64>;

/// Errors from content verification.
#[derive(Debug)]
#[non_exhaustive]
pub enum VerifyError {
    /// Content enumeration failed.
    Iterate(StoreError),
    /// One or more contents failed verification.
    ContentErrors { failed: u32, total: u32 },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iterate(err) => write!(f, "iterating contents: {err}"),
            Self::ContentErrors { failed, total } => {
                write!(f, "encountered {failed} invalid contents out of {total}")
            }
        }
    }
}

impl std::error::Error for VerifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Iterate(err) => Some(err),
            Self::ContentErrors { .. } => None,
        }
    }
}

impl From<StoreError> for VerifyError {
    fn from(err: StoreError) -> Self {
        Self::Iterate(err)
    }
}

/// Options for [`verify_contents`].
#[derive(Clone, Debug)]
pub struct VerifyOptions {
    /// Worker threads checking entries.
    pub parallel: usize,
    /// Also check tombstoned entries.
    pub include_deleted: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            parallel: 16,
            include_deleted: false,
        }
    }
}

/// Verification counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifySummary {
    /// Contents checked.
    pub total: u32,
    /// Contents that failed.
    pub failed: u32,
}

/// Verifies that every content entry lies within a known pack blob.
///
/// `blobs` maps every pack blob the storage back-end currently holds to
/// its length. Progress is logged every 100 000 contents; each failing
/// content is logged individually.
///
/// # Errors
/// Returns `VerifyError::Iterate` when enumeration itself fails, or
/// `VerifyError::ContentErrors` when any content failed the check.
pub fn verify_contents<S: ContentStore>(
    store: &S,
    blobs: &BlobMap,
    options: &VerifyOptions,
) -> Result<VerifySummary, VerifyError> {
    let total = AtomicU32::new(0);
    let failed = AtomicU32::new(0);

    info!("verifying all contents");

    let iterate_options = IterateOptions {
        parallel: options.parallel,
        include_deleted: options.include_deleted,
        ..IterateOptions::default()
    };

    store.iterate_contents::<VerifyError>(&iterate_options, &|info| {
        if let Err(detail) = check_entry(info, blobs) {
            error!(content_id = %info.content_id(), "{detail}");
            failed.fetch_add(1, Ordering::Relaxed);
        }

        let seen = total.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % 100_000 == 0 {
            info!(
                "  {seen} contents, {} errors...",
                failed.load(Ordering::Relaxed)
            );
        }

        Ok(())
    })?;

    let summary = VerifySummary {
        total: total.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    };

    info!(
        total = summary.total,
        failed = summary.failed,
        "finished verifying contents"
    );

    if summary.failed > 0 {
        return Err(VerifyError::ContentErrors {
            failed: summary.failed,
            total: summary.total,
        });
    }

    Ok(summary)
}

fn check_entry(info: &dyn ContentInfo, blobs: &BlobMap) -> Result<(), String> {
    let blob_id = info.pack_blob_id();

    let Some(&blob_len) = blobs.get(&blob_id) else {
        return Err(format!("content depends on missing pack blob {blob_id}"));
    };

    let end = u64::from(info.pack_offset()) + u64::from(info.packed_length());
    if end > blob_len {
        return Err(format!(
            "content out of bounds of pack blob {blob_id}: {end} > {blob_len}"
        ));
    }

    Ok(())
}
