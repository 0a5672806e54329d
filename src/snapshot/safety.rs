//! Safety parameters for destructive maintenance.
//!
//! The minimum-age window is the correctness lever of the collector: a
//! concurrent writer may have stored a content that no committed manifest
//! references yet, and deleting it would corrupt the in-flight snapshot.
//! The window must be at least the maximum expected time between writing
//! a content and committing the manifest that references it.

use std::time::Duration;

/// Parameters bounding what a collector run may delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SafetyParameters {
    /// Minimum age a content must reach before it may be deleted.
    pub min_content_age_subject_to_gc: Duration,
}

impl SafetyParameters {
    /// No safety margin: contents become eligible immediately.
    pub const NONE: Self = Self {
        min_content_age_subject_to_gc: Duration::ZERO,
    };

    /// Default safety margin of 24 hours.
    pub const DEFAULT: Self = Self {
        min_content_age_subject_to_gc: Duration::from_secs(24 * 60 * 60),
    };

    /// Resolves a preset by name (`"none"` or `"default"`).
    #[must_use]
    pub fn from_preset(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::NONE),
            "default" => Some(Self::DEFAULT),
            _ => None,
        }
    }
}

impl Default for SafetyParameters {
    fn default() -> Self {
        Self::DEFAULT
    }
}
