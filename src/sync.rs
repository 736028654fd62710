//! Sync orchestrator: back up, pull, merge, extract, archive, upload, clean up.
//!
//! One run moves through the phases in order and ends in `DONE` or `FAILED`.
//! Every phase is either idempotent or guarded by the catalog backup, so a
//! failed run is retried by simply running it again.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::archive;
use crate::catalog::CatalogStore;
use crate::config::DataConfig;
use crate::merge::merge;
use crate::remote::RemoteStore;

mod lock;
mod phase;
mod upload;

pub use self::lock::SyncLock;
pub use self::phase::{SyncFailure, SyncPhase, SyncReport};

/// Run one full sync of the local replica under `data` against `repo_id`.
pub fn run(
    data: &DataConfig,
    remote: &dyn RemoteStore,
    repo_id: &str,
) -> Result<SyncReport, SyncFailure> {
    let mut run = SyncRun {
        data,
        remote,
        repo_id,
        phase: SyncPhase::Idle,
        report: SyncReport::default(),
        scratch: None,
        local_parts: Vec::new(),
    };
    run.enter(SyncPhase::Idle);

    let _lock = match SyncLock::acquire(&data.lock_path()) {
        Ok(lock) => lock,
        Err(err) => return Err(run.fail(err)),
    };

    match run.execute() {
        Ok(()) => {
            run.enter(SyncPhase::Done);
            tracing::info!(
                merged = run.report.merged_rows,
                parts = run.report.uploaded_parts.len(),
                deleted = run.report.deleted_remote_objects.len(),
                "sync complete"
            );
            Ok(run.report)
        }
        Err(err) => {
            run.cleanup_best_effort();
            Err(run.fail(err))
        }
    }
}

struct SyncRun<'a> {
    data: &'a DataConfig,
    remote: &'a dyn RemoteStore,
    repo_id: &'a str,
    phase: SyncPhase,
    report: SyncReport,
    scratch: Option<TempDir>,
    local_parts: Vec<PathBuf>,
}

impl SyncRun<'_> {
    fn enter(&mut self, phase: SyncPhase) {
        self.phase = phase;
        self.report.phases.push(phase);
        tracing::info!(phase = %phase, "sync phase");
    }

    fn fail(&mut self, err: anyhow::Error) -> SyncFailure {
        let phase = self.phase;
        self.report.phases.push(SyncPhase::Failed);
        tracing::error!(phase = %phase, error = %format!("{:#}", err), "sync failed");

        let mut failure = SyncFailure::new(phase, err);
        let backup = self.data.backup_path();
        if backup.is_file() {
            failure.retained_backup = Some(backup);
        }
        failure
    }

    fn execute(&mut self) -> Result<()> {
        fs::create_dir_all(&self.data.data_dir)
            .with_context(|| format!("create dir {}", self.data.data_dir.display()))?;
        let blob_dir = self.data.blob_dir_path();
        fs::create_dir_all(&blob_dir)
            .with_context(|| format!("create dir {}", blob_dir.display()))?;

        let identity = self.remote.authenticate().context("authenticate")?;
        tracing::info!(user = %identity.name, repo = %self.repo_id, "authenticated");
        self.report.identity = identity.name;
        self.remote
            .ensure_repository(self.repo_id)
            .with_context(|| format!("ensure repository {}", self.repo_id))?;

        self.enter(SyncPhase::BackingUp);
        let has_backup = self.back_up()?;

        self.enter(SyncPhase::Pulling);
        let scratch = self.pull(has_backup)?;

        self.enter(SyncPhase::Merging);
        self.merge_remote(&scratch, has_backup)?;

        self.enter(SyncPhase::Extracting);
        self.extract(&scratch)?;

        self.enter(SyncPhase::Archiving);
        self.build_archive()?;

        self.enter(SyncPhase::Uploading);
        self.upload()?;

        self.enter(SyncPhase::Cleanup);
        self.cleanup()
    }

    /// Copy the working catalog aside. Returns whether a backup now exists.
    fn back_up(&mut self) -> Result<bool> {
        let catalog = self.data.catalog_path();
        let backup = self.data.backup_path();

        if backup.is_file() {
            recover_stale_backup(&backup, &catalog)?;
        }
        if !catalog.is_file() {
            tracing::info!(path = %catalog.display(), "no local catalog yet, nothing to back up");
            return Ok(false);
        }
        copy_atomic(&catalog, &backup)?;
        tracing::debug!(backup = %backup.display(), "catalog backed up");
        Ok(true)
    }

    fn pull(&mut self, has_backup: bool) -> Result<PathBuf> {
        let scratch = tempfile::Builder::new()
            .prefix(".sync-")
            .tempdir_in(&self.data.data_dir)
            .with_context(|| format!("create scratch dir in {}", self.data.data_dir.display()))?;
        let path = scratch.path().to_path_buf();
        self.scratch = Some(scratch);

        match self.remote.download_snapshot(self.repo_id, &path) {
            Ok(files) => {
                tracing::info!(objects = files.len(), "remote snapshot downloaded");
            }
            Err(err) if err.is_not_found() => {
                tracing::warn!(repo = %self.repo_id, "remote is empty, continuing with local state only");
                self.report.remote_was_empty = true;
            }
            Err(err) => {
                // The working catalog was never touched; only the copy goes.
                if has_backup {
                    let backup = self.data.backup_path();
                    if let Err(e) = fs::remove_file(&backup) {
                        tracing::warn!(path = %backup.display(), error = %e, "failed to discard backup");
                    }
                }
                return Err(err).context("download remote snapshot");
            }
        }
        Ok(path)
    }

    fn merge_remote(&mut self, scratch: &Path, has_backup: bool) -> Result<()> {
        let catalog = self.data.catalog_path();
        let backup = self.data.backup_path();
        let remote_catalog = scratch.join(&self.data.catalog_file);

        if remote_catalog.is_file() {
            fs::rename(&remote_catalog, &catalog).with_context(|| {
                format!("replace {} with remote catalog", catalog.display())
            })?;
            if has_backup {
                let source = CatalogStore::open(&backup)?;
                let mut destination = CatalogStore::open(&catalog)?;
                self.report.merged_rows = merge(&source, &mut destination)
                    .with_context(|| format!("merge {} into {}", backup.display(), catalog.display()))?;
                drop(source);
                fs::remove_file(&backup)
                    .with_context(|| format!("remove backup {}", backup.display()))?;
            }
        } else if has_backup {
            tracing::info!("no remote catalog, keeping local catalog as is");
            fs::remove_file(&backup)
                .with_context(|| format!("remove backup {}", backup.display()))?;
        }

        // Make sure a catalog with the schema exists even on a first sync
        // against an empty remote.
        CatalogStore::open(&catalog)?;
        Ok(())
    }

    fn extract(&mut self, scratch: &Path) -> Result<()> {
        let name = self.data.archive_file_name();
        let pulled = archive::file_names(scratch)?;
        let groups =
            archive::part_groups(pulled.iter().map(String::as_str), &self.data.archive_base_name);
        refuse_foreign_parts(&groups, &name)?;

        let parts = archive::find_parts(scratch, &name)?;
        let blob_dir = self.data.blob_dir_path();

        if !parts.is_empty() {
            let joined = scratch.join(&name);
            archive::join(&parts, &joined)?;
            archive::remove_files(parts.iter())?;
            let files = archive::unpack_into(&joined, &blob_dir)?;
            tracing::info!(parts = parts.len(), files, "remote archive extracted");
            self.report.extracted_parts = parts.len();
            self.report.extracted_files = files;
        }

        let catalog = CatalogStore::open(&self.data.catalog_path())?;
        let mut missing = 0usize;
        for filename in catalog.image_filenames()? {
            if !blob_dir.join(&filename).is_file() {
                missing += 1;
            }
        }
        if missing > 0 {
            tracing::warn!(missing, "catalog rows without a blob file after extraction");
        }
        self.report.missing_blobs = missing;
        Ok(())
    }

    fn build_archive(&mut self) -> Result<()> {
        let archive_path = self.data.archive_path();
        let leftovers = archive::find_parts(&self.data.data_dir, &self.data.archive_file_name())?;
        archive::remove_files(leftovers.iter().chain(std::iter::once(&archive_path)))?;

        let blob_dir = self.data.blob_dir_path();
        if !has_files(&blob_dir)? {
            tracing::info!(dir = %blob_dir.display(), "blob directory empty, nothing to archive");
            return Ok(());
        }

        let bundled = archive::bundle_dir(&blob_dir, &archive_path)?;
        self.local_parts = archive::split(&archive_path, self.data.split_size_bytes())?;
        fs::remove_file(&archive_path)
            .with_context(|| format!("remove {}", archive_path.display()))?;
        tracing::info!(files = bundled, parts = self.local_parts.len(), "blob archive built");
        self.report.bundled_files = bundled;
        Ok(())
    }

    fn upload(&mut self) -> Result<()> {
        let existing = match self.remote.list_objects(self.repo_id) {
            Ok(names) => names,
            Err(err) if err.is_not_found() => Default::default(),
            Err(err) => return Err(err).context("list remote objects"),
        };
        let mut groups =
            archive::part_groups(existing.iter().map(String::as_str), &self.data.archive_base_name);
        let name = self.data.archive_file_name();
        refuse_foreign_parts(&groups, &name)?;
        let stale = groups.remove(&name).unwrap_or_default();
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "deleting stale remote archive parts");
            self.remote
                .delete_objects(self.repo_id, &stale)
                .context("delete stale remote parts")?;
        }
        self.report.deleted_remote_objects = stale;

        self.report.uploaded_parts = upload::upload_parts(
            self.remote,
            self.repo_id,
            &self.local_parts,
            self.data.upload_parallelism,
        )?;

        // Parts first: a remote catalog must never reference blobs that are not uploaded yet.
        let catalog = self.data.catalog_path();
        self.remote
            .upload_object(self.repo_id, &catalog, &self.data.catalog_file)
            .context("upload catalog")?;
        tracing::info!(parts = self.report.uploaded_parts.len(), "upload finished");
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            scratch
                .close()
                .with_context(|| format!("remove scratch dir {}", path.display()))?;
        }
        let archive_path = self.data.archive_path();
        archive::remove_files(self.local_parts.iter().chain(std::iter::once(&archive_path)))?;
        self.local_parts.clear();
        Ok(())
    }

    fn cleanup_best_effort(&mut self) {
        if let Err(err) = self.cleanup() {
            tracing::warn!(error = %format!("{:#}", err), "cleanup after failure incomplete");
        }
    }
}

/// Parts of any archive other than `archive_file_name` hold blobs this replica
/// cannot unpack; pruning them would lose those blobs.
fn refuse_foreign_parts(
    groups: &BTreeMap<String, Vec<String>>,
    archive_file_name: &str,
) -> Result<()> {
    let foreign: Vec<&str> = groups
        .keys()
        .map(String::as_str)
        .filter(|archive| *archive != archive_file_name)
        .collect();
    if !foreign.is_empty() {
        anyhow::bail!(
            "remote holds parts of {} which cannot be unpacked here (only {} is supported); \
             convert or remove them before syncing",
            foreign.join(", "),
            archive_file_name
        );
    }
    Ok(())
}

/// Fold a backup left behind by an earlier failed run back into the catalog.
fn recover_stale_backup(backup: &Path, catalog: &Path) -> Result<()> {
    tracing::warn!(backup = %backup.display(), "found backup from an interrupted sync, recovering it");
    if !catalog.is_file() {
        return fs::rename(backup, catalog)
            .with_context(|| format!("rename {} -> {}", backup.display(), catalog.display()));
    }
    let source = CatalogStore::open(backup)?;
    let mut destination = CatalogStore::open(catalog)?;
    let merged = merge(&source, &mut destination)
        .with_context(|| format!("recover {} into {}", backup.display(), catalog.display()))?;
    drop(source);
    tracing::info!(merged, "stale backup recovered");
    fs::remove_file(backup).with_context(|| format!("remove backup {}", backup.display()))
}

fn copy_atomic(from: &Path, to: &Path) -> Result<()> {
    let tmp = to.with_extension(format!("tmp.{}", std::process::id()));
    fs::copy(from, &tmp)
        .with_context(|| format!("copy {} -> {}", from.display(), tmp.display()))?;
    fs::rename(&tmp, to).with_context(|| format!("rename {} -> {}", tmp.display(), to.display()))?;
    Ok(())
}

fn has_files(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
