//! Per-file document reconciliation
//!
//! A local file maps to one remote document in its folder. The document is
//! located through the cached id first and by title second; it is rewritten
//! only when the content fingerprint differs from the last successful sync.
//! Updates empty the existing body section by section and prepend the new
//! content, so the document keeps its id and sharing.

use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use super::media::{rewrite_image_refs, MediaPass};
use crate::cache::{cache_key, fingerprint, CacheEntry, ChangeCache};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::remote::{RemoteStore, Resilient};
use crate::types::{ContentFormat, DocumentEdit, FileOutcome, MediaReport, RemoteDocument};

static SECTION_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r#"id=['"]([^'"]+)['"]"#).unwrap());

/// Section ids of rendered markup, in document order
pub fn section_ids(html: &str) -> Vec<String> {
    SECTION_ID
        .captures_iter(html)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Remote document title for a local file: the file name without extension
pub fn document_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct DocumentReconciler<'a, S> {
    remote: &'a Resilient<S>,
    config: &'a SyncConfig,
    root: &'a Path,
}

impl<'a, S: RemoteStore> DocumentReconciler<'a, S> {
    /// Reconciler for files under `root`, which anchors the cache keys
    pub fn new(remote: &'a Resilient<S>, config: &'a SyncConfig, root: &'a Path) -> Self {
        Self {
            remote,
            config,
            root,
        }
    }

    /// Bring the remote counterpart of `path` up to date.
    ///
    /// Recoverable failures end up in the returned outcome and in the cache;
    /// only fatal errors are returned as `Err`.
    pub fn sync_file(
        &self,
        cache: &mut ChangeCache,
        path: &Path,
        folder_id: &str,
    ) -> Result<FileOutcome> {
        let content = match read_text(path) {
            Ok(content) => content,
            Err(reason) => {
                tracing::warn!("Could not read {}: {}", path.display(), reason);
                return Ok(FileOutcome::Unreadable { reason });
            }
        };

        let key = cache_key(self.root, path);
        let hash = fingerprint(content.as_bytes());
        let title = document_title(path);
        let cached = cache.get(&key).cloned();
        let cached_id = cached.as_ref().and_then(|c| c.remote_id.clone());

        let target = match self.locate(cached_id.as_deref(), &title, folder_id) {
            Ok(target) => target,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!("Failed to locate document for {}: {}", path.display(), e);
                cache.insert(key, CacheEntry::attempted(hash, cached_id.clone(), false));
                return Ok(FileOutcome::Failed {
                    doc_id: cached_id,
                    reason: e.to_string(),
                });
            }
        };

        if let (Some(entry), Some(doc)) = (cached.as_ref(), target.as_ref()) {
            if entry.fingerprint == hash && entry.sync_succeeded {
                tracing::info!("File {} unchanged, skipping...", path.display());
                if entry.remote_id.as_deref() != Some(doc.id.as_str()) {
                    cache.insert(
                        key,
                        CacheEntry {
                            remote_id: Some(doc.id.clone()),
                            ..entry.clone()
                        },
                    );
                }
                return Ok(FileOutcome::Unchanged);
            }
        }

        let (processed, _) = rewrite_image_refs(&content);
        let created = target.is_none();
        let written = match target {
            Some(doc) => {
                tracing::info!("Updating existing document: {}", title);
                match self.replace_body(&doc, &processed) {
                    Ok(()) => Ok(doc.id),
                    Err(e) => Err((Some(doc.id), e)),
                }
            }
            None => {
                tracing::info!("Creating new document: {}", title);
                self.remote
                    .call("new_document", |s| {
                        s.create_document(&title, &processed, ContentFormat::Markdown, folder_id)
                    })
                    .map(|doc| doc.id)
                    .map_err(|e| (None, e))
            }
        };

        let doc_id = match written {
            Ok(id) => id,
            Err((_, e)) if e.is_fatal() => return Err(e),
            Err((doc_id, e)) => {
                tracing::error!("Error syncing {}: {}", path.display(), e);
                cache.insert(key, CacheEntry::attempted(hash, doc_id.clone(), false));
                return Ok(FileOutcome::Failed {
                    doc_id,
                    reason: e.to_string(),
                });
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let (media, media_ok) = match MediaPass::new(self.remote).run(&doc_id, base_dir) {
            Ok(report) => {
                let ok = !self.config.strict_media || report.is_complete();
                (report, ok)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("Media pass failed for {}: {}", path.display(), e);
                (MediaReport::default(), false)
            }
        };

        cache.insert(key, CacheEntry::attempted(hash, Some(doc_id.clone()), media_ok));

        if !media_ok {
            return Ok(FileOutcome::Failed {
                doc_id: Some(doc_id),
                reason: format!(
                    "images incomplete: {} of {} failed",
                    media.failed, media.placeholders
                ),
            });
        }

        Ok(if created {
            FileOutcome::Created { doc_id, media }
        } else {
            FileOutcome::Updated { doc_id, media }
        })
    }

    /// Find the remote document for a file: cached id first, then by title
    pub fn locate(
        &self,
        cached_id: Option<&str>,
        title: &str,
        folder_id: &str,
    ) -> Result<Option<RemoteDocument>> {
        if let Some(id) = cached_id {
            match self.remote.call("get_thread", |s| s.get_document(id)) {
                Ok(Some(doc)) => return Ok(Some(doc)),
                Ok(None) => {
                    tracing::info!(
                        "Cached document ID {} no longer exists, searching for document...",
                        id
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!("Error accessing cached document ID {}: {}", id, e),
            }
        }

        self.find_by_title(title, folder_id)
    }

    fn find_by_title(&self, title: &str, folder_id: &str) -> Result<Option<RemoteDocument>> {
        let folder = self
            .remote
            .call("get_folder", |s| s.get_folder(folder_id))?;

        for doc_id in folder.children.iter().filter_map(|c| c.document_id()) {
            match self.remote.call("get_thread", |s| s.get_document(doc_id)) {
                Ok(Some(doc)) if doc.title == title => return Ok(Some(doc)),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::debug!("Skipping document {}: {}", doc_id, e),
            }
        }

        Ok(None)
    }

    /// Delete every section of `doc`, then prepend `content`
    fn replace_body(&self, doc: &RemoteDocument, content: &str) -> Result<()> {
        for section_id in section_ids(&doc.html) {
            let edit = DocumentEdit::DeleteSection { section_id };
            match self
                .remote
                .call("edit_document", |s| s.edit_document(&doc.id, &edit))
            {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!("Error deleting section in {}: {}", doc.title, e),
            }
        }

        let edit = DocumentEdit::Prepend {
            content: content.to_string(),
            format: ContentFormat::Markdown,
        };
        self.remote
            .call("edit_document", |s| s.edit_document(&doc.id, &edit))
    }
}

fn read_text(path: &Path) -> std::result::Result<String, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}
