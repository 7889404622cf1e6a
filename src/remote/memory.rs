//! In-memory remote store
//!
//! Behaves like the Quip API closely enough to drive full sync runs in
//! tests: documents are lists of sections with ids, folders hold ordered
//! child references, and every request is recorded. Faults can be injected
//! per operation kind.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::RemoteStore;
use crate::error::{Result, SyncError};
use crate::types::{
    BlobRef, ContentFormat, DocumentEdit, FolderChild, RemoteDocument, RemoteFolder,
};

/// A request received by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetFolder(String),
    CreateFolder { title: String, parent_id: String },
    GetDocument(String),
    CreateDocument { title: String, folder_id: String },
    EditDocument { doc_id: String, kind: &'static str },
    DeleteDocument(String),
    UploadBlob { doc_id: String, file_name: String },
}

impl Call {
    /// Whether the request changes remote state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::GetFolder(_) | Call::GetDocument(_))
    }
}

#[derive(Debug, Clone)]
struct Section {
    id: String,
    text: String,
}

#[derive(Debug, Clone)]
struct DocState {
    title: String,
    sections: Vec<Section>,
    blobs: Vec<String>,
}

#[derive(Debug, Clone)]
struct FolderState {
    title: String,
    children: Vec<FolderChild>,
}

#[derive(Debug, Default)]
struct Inner {
    folders: HashMap<String, FolderState>,
    documents: HashMap<String, DocState>,
    next_id: u64,
    calls: Vec<Call>,
    pending_timeouts: u32,
    fail_deletes: bool,
    forbid_deletes: bool,
    fail_blob_uploads: bool,
    fail_prepends: bool,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Log the request and consume an injected timeout if one is pending
    fn begin(&mut self, call: Call, operation: &str) -> Result<()> {
        self.calls.push(call);
        if self.pending_timeouts > 0 {
            self.pending_timeouts -= 1;
            return Err(SyncError::remote(operation, 504, "Gateway Timeout"));
        }
        Ok(())
    }

    fn sections_from(&mut self, content: &str, format: ContentFormat) -> Vec<Section> {
        let texts: Vec<String> = match format {
            ContentFormat::Markdown => content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
            ContentFormat::Html => vec![content.to_string()],
        };
        texts
            .into_iter()
            .map(|text| Section {
                id: self.next_id("s"),
                text,
            })
            .collect()
    }

    fn render(&self, doc_id: &str) -> Option<RemoteDocument> {
        let doc = self.documents.get(doc_id)?;
        let html = doc
            .sections
            .iter()
            .map(|s| format!("<p id='{}'>{}</p>", s.id, s.text))
            .collect::<Vec<_>>()
            .join("");
        Some(RemoteDocument {
            id: doc_id.to_string(),
            title: doc.title.clone(),
            html,
        })
    }

    fn folder(&self, folder_id: &str) -> Option<RemoteFolder> {
        let folder = self.folders.get(folder_id)?;
        Some(RemoteFolder {
            id: folder_id.to_string(),
            title: folder.title.clone(),
            children: folder.children.clone(),
        })
    }

    fn detach_document(&mut self, doc_id: &str) {
        let child = FolderChild::Document(doc_id.to_string());
        for folder in self.folders.values_mut() {
            folder.children.retain(|c| c != &child);
        }
    }
}

/// In-process [`RemoteStore`] used to drive sync runs in tests
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create a store holding a single empty root folder
    pub fn new(root_id: impl Into<String>) -> Self {
        let mut inner = Inner::default();
        inner.folders.insert(
            root_id.into(),
            FolderState {
                title: "root".to_string(),
                children: Vec::new(),
            },
        );
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Create a folder without recording a call
    pub fn seed_folder(&self, parent_id: &str, title: &str) -> String {
        let mut inner = self.inner.lock();
        let id = inner.next_id("folder");
        inner.folders.insert(
            id.clone(),
            FolderState {
                title: title.to_string(),
                children: Vec::new(),
            },
        );
        if let Some(parent) = inner.folders.get_mut(parent_id) {
            parent.children.push(FolderChild::Folder(id.clone()));
        }
        id
    }

    /// Create a document without recording a call
    pub fn seed_document(&self, folder_id: &str, title: &str, content: &str) -> String {
        let mut inner = self.inner.lock();
        let id = inner.next_id("doc");
        let sections = inner.sections_from(content, ContentFormat::Markdown);
        inner.documents.insert(
            id.clone(),
            DocState {
                title: title.to_string(),
                sections,
                blobs: Vec::new(),
            },
        );
        if let Some(folder) = inner.folders.get_mut(folder_id) {
            folder.children.push(FolderChild::Document(id.clone()));
        }
        id
    }

    /// Delete a document behind the engine's back
    pub fn remove_document(&self, doc_id: &str) {
        let mut inner = self.inner.lock();
        inner.documents.remove(doc_id);
        inner.detach_document(doc_id);
    }

    /// Fail the next `count` requests with a gateway timeout
    pub fn inject_timeouts(&self, count: u32) {
        self.inner.lock().pending_timeouts = count;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.inner.lock().fail_deletes = fail;
    }

    /// Reject deletes with a 403, as for a document shared read-only
    pub fn forbid_deletes(&self, forbid: bool) {
        self.inner.lock().forbid_deletes = forbid;
    }

    pub fn fail_blob_uploads(&self, fail: bool) {
        self.inner.lock().fail_blob_uploads = fail;
    }

    pub fn fail_prepends(&self, fail: bool) {
        self.inner.lock().fail_prepends = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.inner.lock().calls.iter().filter(|c| c.is_mutation()).count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Current state of a document, without recording a call
    pub fn document(&self, doc_id: &str) -> Option<RemoteDocument> {
        self.inner.lock().render(doc_id)
    }

    /// Direct subfolders of `parent_id` as `(id, title)` pairs
    pub fn subfolders(&self, parent_id: &str) -> Vec<(String, String)> {
        let inner = self.inner.lock();
        let Some(parent) = inner.folders.get(parent_id) else {
            return Vec::new();
        };
        parent
            .children
            .iter()
            .filter_map(FolderChild::folder_id)
            .filter_map(|id| {
                inner
                    .folders
                    .get(id)
                    .map(|f| (id.to_string(), f.title.clone()))
            })
            .collect()
    }

    /// Documents directly inside `folder_id`
    pub fn documents_in(&self, folder_id: &str) -> Vec<RemoteDocument> {
        let inner = self.inner.lock();
        let Some(folder) = inner.folders.get(folder_id) else {
            return Vec::new();
        };
        folder
            .children
            .iter()
            .filter_map(FolderChild::document_id)
            .filter_map(|id| inner.render(id))
            .collect()
    }

    /// Blob ids uploaded to a document
    pub fn blobs(&self, doc_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .documents
            .get(doc_id)
            .map(|d| d.blobs.clone())
            .unwrap_or_default()
    }
}

impl RemoteStore for MemoryStore {
    fn get_folder(&self, folder_id: &str) -> Result<RemoteFolder> {
        let mut inner = self.inner.lock();
        inner.begin(Call::GetFolder(folder_id.to_string()), "get_folder")?;
        inner
            .folder(folder_id)
            .ok_or_else(|| SyncError::NotFound(format!("folder {}", folder_id)))
    }

    fn create_folder(&self, title: &str, parent_id: &str) -> Result<RemoteFolder> {
        let mut inner = self.inner.lock();
        inner.begin(
            Call::CreateFolder {
                title: title.to_string(),
                parent_id: parent_id.to_string(),
            },
            "create_folder",
        )?;
        if !inner.folders.contains_key(parent_id) {
            return Err(SyncError::NotFound(format!("folder {}", parent_id)));
        }
        let id = inner.next_id("folder");
        inner.folders.insert(
            id.clone(),
            FolderState {
                title: title.to_string(),
                children: Vec::new(),
            },
        );
        if let Some(parent) = inner.folders.get_mut(parent_id) {
            parent.children.push(FolderChild::Folder(id.clone()));
        }
        Ok(RemoteFolder {
            id,
            title: title.to_string(),
            children: Vec::new(),
        })
    }

    fn get_document(&self, doc_id: &str) -> Result<Option<RemoteDocument>> {
        let mut inner = self.inner.lock();
        inner.begin(Call::GetDocument(doc_id.to_string()), "get_thread")?;
        Ok(inner.render(doc_id))
    }

    fn create_document(
        &self,
        title: &str,
        content: &str,
        format: ContentFormat,
        folder_id: &str,
    ) -> Result<RemoteDocument> {
        let mut inner = self.inner.lock();
        inner.begin(
            Call::CreateDocument {
                title: title.to_string(),
                folder_id: folder_id.to_string(),
            },
            "new_document",
        )?;
        if !inner.folders.contains_key(folder_id) {
            return Err(SyncError::NotFound(format!("folder {}", folder_id)));
        }
        let id = inner.next_id("doc");
        let sections = inner.sections_from(content, format);
        inner.documents.insert(
            id.clone(),
            DocState {
                title: title.to_string(),
                sections,
                blobs: Vec::new(),
            },
        );
        if let Some(folder) = inner.folders.get_mut(folder_id) {
            folder.children.push(FolderChild::Document(id.clone()));
        }
        inner
            .render(&id)
            .ok_or_else(|| SyncError::NotFound(format!("thread {}", id)))
    }

    fn edit_document(&self, doc_id: &str, edit: &DocumentEdit) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.begin(
            Call::EditDocument {
                doc_id: doc_id.to_string(),
                kind: edit.kind(),
            },
            "edit_document",
        )?;
        if !inner.documents.contains_key(doc_id) {
            return Err(SyncError::NotFound(format!("thread {}", doc_id)));
        }

        match edit {
            DocumentEdit::Prepend { content, format } => {
                if inner.fail_prepends {
                    return Err(SyncError::remote("edit_document", 500, "prepend rejected"));
                }
                let mut sections = inner.sections_from(content, *format);
                if let Some(doc) = inner.documents.get_mut(doc_id) {
                    sections.append(&mut doc.sections);
                    doc.sections = sections;
                }
                Ok(())
            }
            DocumentEdit::DeleteSection { section_id } => {
                let doc = inner
                    .documents
                    .get_mut(doc_id)
                    .ok_or_else(|| SyncError::NotFound(format!("thread {}", doc_id)))?;
                let before = doc.sections.len();
                doc.sections.retain(|s| &s.id != section_id);
                if doc.sections.len() == before {
                    return Err(SyncError::remote(
                        "edit_document",
                        400,
                        format!("section {} not found", section_id),
                    ));
                }
                Ok(())
            }
            DocumentEdit::ReplaceRange {
                anchor, content, ..
            } => {
                let doc = inner
                    .documents
                    .get_mut(doc_id)
                    .ok_or_else(|| SyncError::NotFound(format!("thread {}", doc_id)))?;
                let section = doc
                    .sections
                    .iter_mut()
                    .find(|s| s.text.contains(anchor.as_str()))
                    .ok_or_else(|| {
                        SyncError::remote(
                            "edit_document",
                            400,
                            format!("document range '{}' not found", anchor),
                        )
                    })?;
                section.text = section.text.replacen(anchor.as_str(), content, 1);
                Ok(())
            }
        }
    }

    fn delete_document(&self, doc_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.begin(Call::DeleteDocument(doc_id.to_string()), "delete_thread")?;
        if inner.fail_deletes {
            return Err(SyncError::remote("delete_thread", 500, "delete rejected"));
        }
        if inner.forbid_deletes {
            return Err(SyncError::Forbidden(format!("delete_thread {}", doc_id)));
        }
        if inner.documents.remove(doc_id).is_none() {
            return Err(SyncError::NotFound(format!("thread {}", doc_id)));
        }
        inner.detach_document(doc_id);
        Ok(())
    }

    fn upload_blob(&self, doc_id: &str, file_name: &str, _data: Vec<u8>) -> Result<BlobRef> {
        let mut inner = self.inner.lock();
        inner.begin(
            Call::UploadBlob {
                doc_id: doc_id.to_string(),
                file_name: file_name.to_string(),
            },
            "put_blob",
        )?;
        if inner.fail_blob_uploads {
            return Err(SyncError::remote("put_blob", 500, "upload rejected"));
        }
        let blob_id = inner.next_id("blob");
        let doc = inner
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| SyncError::NotFound(format!("thread {}", doc_id)))?;
        doc.blobs.push(blob_id.clone());
        Ok(BlobRef {
            url: Some(format!("/blob/{}/{}", doc_id, blob_id)),
            id: blob_id,
        })
    }
}
