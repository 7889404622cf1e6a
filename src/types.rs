//! Core types for quipsync

use serde::{Deserialize, Serialize};

/// Opaque identifier of a remote folder
pub type FolderId = String;

/// Opaque identifier of a remote document (Quip thread)
pub type DocumentId = String;

/// A remote folder and its direct children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: FolderId,
    pub title: String,
    #[serde(default)]
    pub children: Vec<FolderChild>,
}

/// Child reference inside a folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderChild {
    Folder(FolderId),
    Document(DocumentId),
}

impl FolderChild {
    pub fn folder_id(&self) -> Option<&str> {
        match self {
            FolderChild::Folder(id) => Some(id),
            FolderChild::Document(_) => None,
        }
    }

    pub fn document_id(&self) -> Option<&str> {
        match self {
            FolderChild::Document(id) => Some(id),
            FolderChild::Folder(_) => None,
        }
    }
}

/// A remote document with its rendered markup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: DocumentId,
    pub title: String,
    /// Rendered HTML of the document body
    #[serde(default)]
    pub html: String,
}

/// An uploaded binary object scoped to one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub id: String,
    /// Path the remote serves the blob under (e.g. `/blob/{thread}/{blob}`)
    #[serde(default)]
    pub url: Option<String>,
}

/// Format tag sent with inserted content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Markdown,
    Html,
}

impl ContentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFormat::Markdown => "markdown",
            ContentFormat::Html => "html",
        }
    }
}

/// A single content-range mutation of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEdit {
    /// Insert at the start of the body
    Prepend {
        content: String,
        format: ContentFormat,
    },
    /// Delete one structural section
    DeleteSection { section_id: String },
    /// Replace the range matching a textual anchor
    ReplaceRange {
        anchor: String,
        content: String,
        format: ContentFormat,
    },
}

impl DocumentEdit {
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentEdit::Prepend { .. } => "prepend",
            DocumentEdit::DeleteSection { .. } => "delete_section",
            DocumentEdit::ReplaceRange { .. } => "replace_range",
        }
    }
}

/// Run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Delete remote documents for locally removed files, then sync
    #[default]
    Incremental,
    /// Empty the destination tree and discard the cache, then sync everything
    Clean,
}

/// Result of the media pass for one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaReport {
    pub placeholders: usize,
    pub uploaded: usize,
    pub missing: usize,
    pub failed: usize,
}

impl MediaReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// What happened to one local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Unchanged,
    Created {
        doc_id: DocumentId,
        media: MediaReport,
    },
    Updated {
        doc_id: DocumentId,
        media: MediaReport,
    },
    /// Sync attempted and recorded as failed in the cache
    Failed {
        doc_id: Option<DocumentId>,
        reason: String,
    },
    /// File could not be read; cache untouched
    Unreadable { reason: String },
    /// Containing folder could not be resolved; cache untouched
    Skipped { reason: String },
}

/// Counters for deletion reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub deleted: usize,
    pub failed: usize,
    /// Candidates without a remote identifier
    pub orphaned: usize,
    pub pruned: usize,
}

/// Counters for recursive folder clearing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub documents_deleted: usize,
    pub folders_visited: usize,
    pub failures: usize,
}

impl ClearReport {
    pub fn is_complete(&self) -> bool {
        self.failures == 0
    }
}

/// Summary of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub unreadable: usize,
    pub skipped: usize,
    pub skipped_dirs: usize,
    pub deletions: DeletionReport,
    pub cleared: Option<ClearReport>,
    pub images_uploaded: usize,
    pub images_missing: usize,
    pub images_failed: usize,
}

impl SyncReport {
    /// Fold one file outcome into the counters
    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Unchanged => self.unchanged += 1,
            FileOutcome::Created { media, .. } => {
                self.created += 1;
                self.record_media(media);
            }
            FileOutcome::Updated { media, .. } => {
                self.updated += 1;
                self.record_media(media);
            }
            FileOutcome::Failed { .. } => self.failed += 1,
            FileOutcome::Unreadable { .. } => self.unreadable += 1,
            FileOutcome::Skipped { .. } => self.skipped += 1,
        }
    }

    fn record_media(&mut self, media: &MediaReport) {
        self.images_uploaded += media.uploaded;
        self.images_missing += media.missing;
        self.images_failed += media.failed;
    }

    /// Number of files that caused a remote create or update
    pub fn mutated(&self) -> usize {
        self.created + self.updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_record() {
        let mut report = SyncReport::default();
        report.record(&FileOutcome::Unchanged);
        report.record(&FileOutcome::Created {
            doc_id: "d1".into(),
            media: MediaReport {
                placeholders: 2,
                uploaded: 1,
                missing: 1,
                failed: 0,
            },
        });
        report.record(&FileOutcome::Failed {
            doc_id: None,
            reason: "boom".into(),
        });

        assert_eq!(report.unchanged, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.images_uploaded, 1);
        assert_eq!(report.images_missing, 1);
        assert_eq!(report.mutated(), 1);
    }

    #[test]
    fn test_folder_child_accessors() {
        let folder = FolderChild::Folder("f".into());
        let doc = FolderChild::Document("d".into());
        assert_eq!(folder.folder_id(), Some("f"));
        assert_eq!(folder.document_id(), None);
        assert_eq!(doc.document_id(), Some("d"));
    }
}
