use std::path::{Path, PathBuf};
use std::{fs, io};

use chrono::{Local, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogError, WorldCatalog, WorldDescriptor};
use crate::index::{index_path, IndexDocument};
use crate::store::{store_path, StoreDocument};

#[derive(Debug, Error)]
pub enum DuplicateError {
    #[error("no valid world with id {id} in the catalog")]
    UnknownWorld { id: String },
    #[error("duplication failed during {step} at {path}: {source} (target restored from backup)")]
    Transaction {
        step: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "duplication failed and restoring the target also failed at {path}: {source} \
         (original files remain in {backup_dir})"
    )]
    Rollback {
        backup_dir: PathBuf,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Progress hooks for the duplication transaction. The transaction emits
/// through this instead of logging directly, so callers and tests can
/// observe it without a global subscriber.
pub trait DuplicationObserver {
    fn backup_staged(&mut self, _backup_dir: &Path, _file_count: usize) {}
    fn file_copied(&mut self, _from: &Path, _to: &Path) {}
    fn field_copied(&mut self, _key: &str) {}
    fn index_patched(&mut self, _path: &Path) {}
    fn store_patched(&mut self, _target_id: &str) {}
    fn rollback_started(&mut self, _step: &'static str) {}
    fn rollback_finished(&mut self, _restored: usize) {}
}

/// Default observer: forwards every hook to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl DuplicationObserver for TracingObserver {
    fn backup_staged(&mut self, backup_dir: &Path, file_count: usize) {
        info!(backup_dir = %backup_dir.display(), file_count, "duplicate_backup_staged");
    }

    fn file_copied(&mut self, from: &Path, to: &Path) {
        info!(from = %from.display(), to = %to.display(), "duplicate_file_copied");
    }

    fn field_copied(&mut self, key: &str) {
        info!(key, "duplicate_field_copied");
    }

    fn index_patched(&mut self, path: &Path) {
        info!(path = %path.display(), "duplicate_index_patched");
    }

    fn store_patched(&mut self, target_id: &str) {
        info!(target_id, "duplicate_store_patched");
    }

    fn rollback_started(&mut self, step: &'static str) {
        warn!(step, "duplicate_rollback_started");
    }

    fn rollback_finished(&mut self, restored: usize) {
        warn!(restored, "duplicate_rollback_finished");
    }
}

struct TxFailure {
    step: &'static str,
    path: PathBuf,
    source: io::Error,
}

fn failed(step: &'static str, path: PathBuf, source: io::Error) -> TxFailure {
    TxFailure { step, path, source }
}

impl WorldCatalog {
    /// Replaces the `target_id` world with a copy of `source_id`,
    /// returning the backup directory holding the target's previous
    /// files. All-or-nothing: any mid-flight failure restores the target
    /// and no backup directory survives.
    pub fn duplicate_world(
        &mut self,
        source_id: &str,
        target_id: &str,
    ) -> Result<PathBuf, DuplicateError> {
        self.duplicate_world_with(source_id, target_id, &mut TracingObserver)
    }

    pub fn duplicate_world_with(
        &mut self,
        source_id: &str,
        target_id: &str,
        observer: &mut dyn DuplicationObserver,
    ) -> Result<PathBuf, DuplicateError> {
        let source = self.cached_world(source_id)?;
        let target = self.cached_world(target_id)?;

        let now = Utc::now().timestamp();
        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let backup_dir = self.save_dir.join(format!("{target_id}_backup_{stamp}"));

        // Stage the backup by moving, not copying: the save directory
        // then never holds old and new versions of the same filename,
        // and rollback is a plain reverse move.
        fs::create_dir(&backup_dir).map_err(|source| DuplicateError::Transaction {
            step: "stage_backup",
            path: backup_dir.clone(),
            source,
        })?;

        let mut staged = 0usize;
        for file in &target.files {
            let Some(file_name) = file.file_name() else {
                continue;
            };
            if let Err(cause) = fs::rename(file, backup_dir.join(file_name)) {
                let failure = failed("stage_backup", file.clone(), cause);
                return Err(self.roll_back(&backup_dir, &[], failure, observer));
            }
            staged += 1;
        }
        observer.backup_staged(&backup_dir, staged);

        let mut created = Vec::new();
        match self.copy_and_patch(&source, &target, now, &mut created, observer) {
            Ok(()) => {
                info!(
                    source_id,
                    target_id,
                    backup_dir = %backup_dir.display(),
                    "world_duplicated"
                );
                Ok(backup_dir)
            }
            Err(failure) => Err(self.roll_back(&backup_dir, &created, failure, observer)),
        }
    }

    /// Clones `source_id` under a freshly generated id and inserts a new
    /// metadata store entry for it. Returns the new world id.
    pub fn create_world_copy(&mut self, source_id: &str) -> Result<String, DuplicateError> {
        let source = self.cached_world(source_id)?;
        let new_id = Uuid::new_v4().simple().to_string();
        let now = Utc::now().timestamp();

        let mut created = Vec::new();
        if let Err(failure) = self.copy_into_new_id(&source, &new_id, now, &mut created) {
            // The fresh id owns no prior files, so cleanup is plain
            // deletion of whatever the copy step produced. The store is
            // reloaded for the same reason roll_back reloads it: the
            // pushed entry must not leak into a later save.
            self.store = StoreDocument::load(&self.save_dir);
            for path in &created {
                if let Err(error) = fs::remove_file(path) {
                    if error.kind() != io::ErrorKind::NotFound {
                        warn!(path = %path.display(), %error, "world_copy_cleanup_failed");
                    }
                }
            }
            return Err(DuplicateError::Transaction {
                step: failure.step,
                path: failure.path,
                source: failure.source,
            });
        }

        self.scan_worlds()?;
        info!(source_id, new_id = %new_id, "world_copy_created");
        Ok(new_id)
    }

    fn cached_world(&self, id: &str) -> Result<WorldDescriptor, DuplicateError> {
        self.worlds
            .get(id)
            .cloned()
            .ok_or_else(|| DuplicateError::UnknownWorld { id: id.to_string() })
    }

    fn copy_and_patch(
        &mut self,
        source: &WorldDescriptor,
        target: &WorldDescriptor,
        now: i64,
        created: &mut Vec<PathBuf>,
        observer: &mut dyn DuplicationObserver,
    ) -> Result<(), TxFailure> {
        for file in &source.files {
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let copied = self.save_dir.join(name.replacen(&source.id, &target.id, 1));
            // Recorded before the copy runs: a copy that dies mid-write
            // still leaves a destination for rollback to remove.
            created.push(copied.clone());
            fs::copy(file, &copied)
                .map_err(|cause| failed("copy_files", copied.clone(), cause))?;
            observer.file_copied(file, &copied);
        }

        let target_index_path = index_path(&self.save_dir, &target.id);
        if target_index_path.is_file() {
            let mut index = IndexDocument::read(&target_index_path)
                .map_err(|cause| failed("patch_index", target_index_path.clone(), cause))?;
            index.time = now;
            index.deleted = false;
            index.latest = source.index.latest;
            for (key, value) in source.index.carried_extra() {
                index.extra.insert(key.clone(), value.clone());
                observer.field_copied(key);
            }
            index
                .save(&target_index_path)
                .map_err(|cause| failed("patch_index", target_index_path.clone(), cause))?;
            observer.index_patched(&target_index_path);
        }

        // A target missing from the store's worlds array is a deliberate
        // no-op; the store is not taught about worlds it never knew.
        if let Some(entry) = self.store.entry_mut(&target.id) {
            entry.name = format!("Copy of {}", source.name);
            entry.last_played = now;
            entry.apply_overlay("latest", &Value::from(source.index.latest));
            for (key, value) in source.index.carried_extra() {
                entry.apply_overlay(key, value);
            }
        }
        if self.store.worlds.is_some() {
            self.store
                .save(&self.save_dir)
                .map_err(|cause| failed("patch_store", store_path(&self.save_dir), cause))?;
            observer.store_patched(&target.id);
        }
        Ok(())
    }

    fn copy_into_new_id(
        &mut self,
        source: &WorldDescriptor,
        new_id: &str,
        now: i64,
        created: &mut Vec<PathBuf>,
    ) -> Result<(), TxFailure> {
        for file in &source.files {
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let copied = self.save_dir.join(name.replacen(&source.id, new_id, 1));
            created.push(copied.clone());
            fs::copy(file, &copied)
                .map_err(|cause| failed("copy_files", copied.clone(), cause))?;
        }

        let new_index_path = index_path(&self.save_dir, new_id);
        if new_index_path.is_file() {
            let mut index = IndexDocument::read(&new_index_path)
                .map_err(|cause| failed("patch_index", new_index_path.clone(), cause))?;
            index.time = now;
            index.deleted = false;
            index.latest = source.index.latest;
            for (key, value) in source.index.carried_extra() {
                index.extra.insert(key.clone(), value.clone());
            }
            index
                .save(&new_index_path)
                .map_err(|cause| failed("patch_index", new_index_path.clone(), cause))?;
        }

        if self.store.worlds.is_some() {
            let mut entry = self.store.entry(&source.id).cloned().unwrap_or_default();
            entry.id = new_id.to_string();
            entry.name = format!("Copy of {}", source.name);
            entry.created_at = now;
            entry.last_played = now;
            entry.apply_overlay("latest", &Value::from(source.index.latest));
            for (key, value) in source.index.carried_extra() {
                entry.apply_overlay(key, value);
            }
            if let Some(worlds) = self.store.worlds.as_mut() {
                worlds.push(entry);
            }
            self.store
                .save(&self.save_dir)
                .map_err(|cause| failed("patch_store", store_path(&self.save_dir), cause))?;
        }
        Ok(())
    }

    fn roll_back(
        &mut self,
        backup_dir: &Path,
        created: &[PathBuf],
        failure: TxFailure,
        observer: &mut dyn DuplicationObserver,
    ) -> DuplicateError {
        observer.rollback_started(failure.step);
        // The entry patch mutates the in-memory store before the save
        // runs; reload from disk so a failed transaction's edits cannot
        // ride along with a later successful save.
        self.store = StoreDocument::load(&self.save_dir);
        match restore_target(&self.save_dir, backup_dir, created) {
            Ok(restored) => {
                observer.rollback_finished(restored);
                DuplicateError::Transaction {
                    step: failure.step,
                    path: failure.path,
                    source: failure.source,
                }
            }
            Err((path, source)) => {
                error!(
                    backup_dir = %backup_dir.display(),
                    path = %path.display(),
                    %source,
                    original_step = failure.step,
                    original_error = %failure.source,
                    "duplicate_rollback_failed_target_may_be_inconsistent"
                );
                DuplicateError::Rollback {
                    backup_dir: backup_dir.to_path_buf(),
                    path,
                    source,
                }
            }
        }
    }
}

/// Deletes whatever the failed copy step created, then moves every backed
/// up file back under its original name and removes the backup directory.
fn restore_target(
    save_dir: &Path,
    backup_dir: &Path,
    created: &[PathBuf],
) -> Result<usize, (PathBuf, io::Error)> {
    for path in created {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err((path.clone(), error)),
        }
    }

    let entries = fs::read_dir(backup_dir).map_err(|e| (backup_dir.to_path_buf(), e))?;
    let mut restored = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| (backup_dir.to_path_buf(), e))?;
        let original = save_dir.join(entry.file_name());
        fs::rename(entry.path(), &original).map_err(|e| (original.clone(), e))?;
        restored += 1;
    }
    fs::remove_dir(backup_dir).map_err(|e| (backup_dir.to_path_buf(), e))?;
    Ok(restored)
}
