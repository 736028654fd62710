use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::remote::RemoteError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    Idle,
    BackingUp,
    Pulling,
    Merging,
    Extracting,
    Archiving,
    Uploading,
    Cleanup,
    Done,
    Failed,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Idle => "IDLE",
            SyncPhase::BackingUp => "BACKING_UP",
            SyncPhase::Pulling => "PULLING",
            SyncPhase::Merging => "MERGING",
            SyncPhase::Extracting => "EXTRACTING",
            SyncPhase::Archiving => "ARCHIVING",
            SyncPhase::Uploading => "UPLOADING",
            SyncPhase::Cleanup => "CLEANUP",
            SyncPhase::Done => "DONE",
            SyncPhase::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SyncPhase::Done | SyncPhase::Failed)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a completed run did.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SyncReport {
    pub identity: String,
    pub phases: Vec<SyncPhase>,
    pub remote_was_empty: bool,
    pub merged_rows: usize,
    pub extracted_parts: usize,
    pub extracted_files: usize,

    /// Catalog rows whose blob file is absent after extraction.
    pub missing_blobs: usize,

    pub bundled_files: usize,
    pub uploaded_parts: Vec<String>,
    pub deleted_remote_objects: Vec<String>,
}

/// A run that ended in FAILED, with the phase it was in and the fault behind it.
#[derive(Debug)]
pub struct SyncFailure {
    pub phase: SyncPhase,

    /// Set when a failure after the catalog replacement left the pre-sync
    /// catalog copy on disk; the next run folds it back in.
    pub retained_backup: Option<PathBuf>,

    source: anyhow::Error,
}

impl SyncFailure {
    pub fn new(phase: SyncPhase, source: anyhow::Error) -> Self {
        Self {
            phase,
            retained_backup: None,
            source,
        }
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.source
    }

    /// The typed remote fault somewhere in the cause chain, if any.
    pub fn remote_error(&self) -> Option<&RemoteError> {
        self.source
            .chain()
            .find_map(|e| e.downcast_ref::<RemoteError>())
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync failed during {}", self.phase)
    }
}

impl std::error::Error for SyncFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}
