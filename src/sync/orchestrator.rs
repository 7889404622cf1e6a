//! Whole-tree sync runs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::deletion::{clear_folder, reconcile_deletions};
use super::document::DocumentReconciler;
use super::folders::FolderResolver;
use crate::cache::ChangeCache;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::remote::{RemoteStore, Resilient};
use crate::types::{FileOutcome, SyncMode, SyncReport};

/// Files under `root` with the given extension, in walk order
pub fn collect_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map_or(false, |ext| ext == extension))
        .collect()
}

/// Files grouped by containing directory, directories in lexicographic
/// order of their path string
pub fn group_by_directory(files: Vec<PathBuf>) -> BTreeMap<String, (PathBuf, Vec<PathBuf>)> {
    let mut groups: BTreeMap<String, (PathBuf, Vec<PathBuf>)> = BTreeMap::new();
    for file in files {
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        groups
            .entry(dir.to_string_lossy().into_owned())
            .or_insert_with(|| (dir, Vec::new()))
            .1
            .push(file);
    }
    groups
}

/// Mirrors a local directory tree into a remote folder
pub struct Mirror<S> {
    remote: Resilient<S>,
    config: SyncConfig,
}

impl<S: RemoteStore> Mirror<S> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        let remote = Resilient::new(store, config.retry.clone());
        Self { remote, config }
    }

    pub fn remote(&self) -> &Resilient<S> {
        &self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Sync `root` into `root_folder_id`.
    ///
    /// The cache is saved once at the end; a fatal error returns before
    /// that, leaving the previous cache file in place.
    pub fn run(&self, root: &Path, root_folder_id: &str, mode: SyncMode) -> Result<SyncReport> {
        if !root.is_dir() {
            return Err(SyncError::InvalidInput(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut cache = ChangeCache::load(root.join(&self.config.cache_file))?;
        cache.rebase(root);
        let mut report = SyncReport::default();

        match mode {
            SyncMode::Clean => {
                tracing::info!("Clearing Quip folder...");
                let cleared = clear_folder(&self.remote, root_folder_id)?;
                if !cleared.is_complete() {
                    tracing::warn!(
                        "Failed to clear Quip folder completely ({} failures)",
                        cleared.failures
                    );
                }
                cache.clear();
                report.cleared = Some(cleared);
            }
            SyncMode::Incremental => {
                report.deletions = reconcile_deletions(
                    &self.remote,
                    &mut cache,
                    root,
                    self.config.prune_orphans,
                )?;
            }
        }

        let files = collect_files(root, &self.config.extension);
        tracing::info!("Found {} files to sync", files.len());

        let mut folders = FolderResolver::new(&self.remote, root_folder_id);
        let documents = DocumentReconciler::new(&self.remote, &self.config, root);

        for (dir_key, (dir, files)) in group_by_directory(files) {
            let relative = dir.strip_prefix(root).unwrap_or(Path::new(""));
            let folder_id = match folders.resolve(relative) {
                Ok(id) => id,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!("Could not resolve folder for {}: {}", dir_key, e);
                    report.skipped_dirs += 1;
                    for _ in &files {
                        report.record(&FileOutcome::Skipped {
                            reason: e.to_string(),
                        });
                    }
                    continue;
                }
            };

            for file in files {
                tracing::info!("Syncing {}", file.display());
                let outcome = match documents.sync_file(&mut cache, &file, &folder_id) {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::error!("Error syncing {}: {}", file.display(), e);
                        FileOutcome::Failed {
                            doc_id: None,
                            reason: e.to_string(),
                        }
                    }
                };
                report.record(&outcome);
            }
        }

        cache.save()?;
        tracing::info!(
            "Sync completed: {} created, {} updated, {} unchanged, {} failed",
            report.created,
            report.updated,
            report.unchanged,
            report.failed
        );
        Ok(report)
    }
}
