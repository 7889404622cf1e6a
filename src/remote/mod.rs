//! Remote document store
//!
//! The [`RemoteStore`] trait is the seam between the sync engine and the
//! Quip API. Engine components never hold a raw store: they receive a
//! [`Resilient`] wrapper and go through [`Resilient::call`], which applies
//! retries and rate limiting to every request.
//!
//! Implementations:
//! - [`QuipClient`]: blocking HTTP client for the Quip automation API
//! - [`MemoryStore`]: in-process store with a call log and fault injection

mod http;
mod memory;
mod retry;

pub use http::QuipClient;
pub use memory::{Call, MemoryStore};
pub use retry::{Resilient, RetryPolicy};

use crate::error::Result;
use crate::types::{BlobRef, ContentFormat, DocumentEdit, RemoteDocument, RemoteFolder};

/// Folder, document and blob operations of the remote store
pub trait RemoteStore: Send + Sync {
    /// Fetch a folder with its child references
    fn get_folder(&self, folder_id: &str) -> Result<RemoteFolder>;

    /// Create a subfolder under `parent_id`
    fn create_folder(&self, title: &str, parent_id: &str) -> Result<RemoteFolder>;

    /// Fetch a document; `Ok(None)` when it no longer exists
    fn get_document(&self, doc_id: &str) -> Result<Option<RemoteDocument>>;

    /// Create a document inside `folder_id`
    fn create_document(
        &self,
        title: &str,
        content: &str,
        format: ContentFormat,
        folder_id: &str,
    ) -> Result<RemoteDocument>;

    /// Apply one content-range mutation
    fn edit_document(&self, doc_id: &str, edit: &DocumentEdit) -> Result<()>;

    /// Delete a document
    fn delete_document(&self, doc_id: &str) -> Result<()>;

    /// Upload a binary object scoped to a document
    fn upload_blob(&self, doc_id: &str, file_name: &str, data: Vec<u8>) -> Result<BlobRef>;
}
