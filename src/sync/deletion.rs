//! Propagation of local deletions, and clearing of the destination tree

use std::collections::HashSet;
use std::path::Path;

use crate::cache::ChangeCache;
use crate::error::{Result, SyncError};
use crate::remote::{RemoteStore, Resilient};
use crate::types::{ClearReport, DeletionReport, FolderChild};

/// Delete the remote documents of cached files that no longer exist under
/// `root`.
///
/// An entry leaves the cache only once its document is deleted, so a failed
/// delete is retried on the next run. Entries that never recorded a remote
/// id are reported as orphaned and dropped only when `prune_orphans` is set.
pub fn reconcile_deletions<S: RemoteStore>(
    remote: &Resilient<S>,
    cache: &mut ChangeCache,
    root: &Path,
    prune_orphans: bool,
) -> Result<DeletionReport> {
    let mut report = DeletionReport::default();

    let candidates: Vec<String> = cache
        .keys()
        .filter(|key| !root.join(key).exists())
        .map(str::to_string)
        .collect();

    for key in candidates {
        let remote_id = cache.get(&key).and_then(|e| e.remote_id.clone());
        let Some(doc_id) = remote_id else {
            tracing::warn!("No remote document recorded for deleted file {}", key);
            report.orphaned += 1;
            if prune_orphans {
                cache.remove(&key);
                report.pruned += 1;
            }
            continue;
        };

        tracing::info!("Deleting Quip document for deleted file: {}", key);
        match remote.call("delete_thread", |s| s.delete_document(&doc_id)) {
            Ok(()) => {
                cache.remove(&key);
                report.deleted += 1;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(SyncError::NotFound(reason)) => {
                // Entry stays, so the delete is attempted again next run
                tracing::debug!(
                    "Document {} for {} is already gone (404: {}), keeping entry",
                    doc_id,
                    key,
                    reason
                );
                report.failed += 1;
            }
            Err(e) => {
                tracing::error!("Error deleting document {}: {}", doc_id, e);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Delete every document in `folder_id` and, recursively, its subfolders.
///
/// Folders themselves are kept. Failures are counted and skipped.
pub fn clear_folder<S: RemoteStore>(remote: &Resilient<S>, folder_id: &str) -> Result<ClearReport> {
    let mut report = ClearReport::default();
    let mut visited = HashSet::new();
    clear_into(remote, folder_id, &mut visited, &mut report)?;
    Ok(report)
}

fn clear_into<S: RemoteStore>(
    remote: &Resilient<S>,
    folder_id: &str,
    visited: &mut HashSet<String>,
    report: &mut ClearReport,
) -> Result<()> {
    // A folder can be linked from more than one parent
    if !visited.insert(folder_id.to_string()) {
        return Ok(());
    }

    let folder = match remote.call("get_folder", |s| s.get_folder(folder_id)) {
        Ok(folder) => folder,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            tracing::error!("Error reading folder {}: {}", folder_id, e);
            report.failures += 1;
            return Ok(());
        }
    };
    report.folders_visited += 1;
    tracing::info!("Clearing folder: {}", folder.title);

    for child in &folder.children {
        match child {
            FolderChild::Document(doc_id) => {
                match remote.call("delete_thread", |s| s.delete_document(doc_id)) {
                    Ok(()) => report.documents_deleted += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::error!("Error deleting document {}: {}", doc_id, e);
                        report.failures += 1;
                    }
                }
            }
            FolderChild::Folder(child_id) => clear_into(remote, child_id, visited, report)?,
        }
    }

    Ok(())
}
