//! Quip automation API client
//!
//! Blocking client: every request suspends the caller until the response
//! arrives, which keeps a sync run strictly sequential.

use std::time::Duration;

use reqwest::blocking::{multipart, Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;

use super::RemoteStore;
use crate::error::{Result, SyncError};
use crate::types::{
    BlobRef, ContentFormat, DocumentEdit, FolderChild, RemoteDocument, RemoteFolder,
};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// edit-document locations
const LOCATION_PREPEND: &str = "1";
const LOCATION_DELETE_SECTION: &str = "5";
const LOCATION_REPLACE_DOCUMENT_RANGE: &str = "8";

#[derive(Deserialize)]
struct FolderResponse {
    folder: FolderInfo,
    #[serde(default)]
    children: Vec<ChildRef>,
}

#[derive(Deserialize)]
struct FolderInfo {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Deserialize)]
struct ChildRef {
    folder_id: Option<String>,
    thread_id: Option<String>,
}

#[derive(Deserialize)]
struct ThreadResponse {
    thread: Option<ThreadInfo>,
    #[serde(default)]
    html: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ThreadInfo {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Deserialize)]
struct BlobResponse {
    id: String,
    url: Option<String>,
}

impl From<FolderResponse> for RemoteFolder {
    fn from(response: FolderResponse) -> Self {
        let children = response
            .children
            .into_iter()
            .filter_map(|child| match (child.folder_id, child.thread_id) {
                (Some(id), _) => Some(FolderChild::Folder(id)),
                (None, Some(id)) => Some(FolderChild::Document(id)),
                (None, None) => None,
            })
            .collect();
        RemoteFolder {
            id: response.folder.id,
            title: response.folder.title,
            children,
        }
    }
}

impl ThreadResponse {
    fn into_document(self) -> Option<RemoteDocument> {
        if self.error.is_some() {
            return None;
        }
        let thread = self.thread?;
        Some(RemoteDocument {
            id: thread.id,
            title: thread.title,
            html: self.html,
        })
    }
}

/// Quip API client
pub struct QuipClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl QuipClient {
    /// Create a client for `base_url` (e.g. `https://platform.quip.com`)
    pub fn new(access_token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(access_token, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/1/{}", self.base_url, path)
    }

    fn get(&self, operation: &str, path: &str) -> Result<Response> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.access_token)
            .send()?;
        check_status(operation, response)
    }

    fn post_form(&self, operation: &str, path: &str, form: &[(&str, &str)]) -> Result<Response> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.access_token)
            .form(form)
            .send()?;
        check_status(operation, response)
    }
}

/// Map HTTP failures onto the error taxonomy
fn check_status(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    Err(status_error(operation, status, body))
}

/// 401 means the token itself is bad; 403 only denies one resource
fn status_error(operation: &str, status: StatusCode, body: String) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED => {
            SyncError::Unauthorized(format!("{} rejected with {}: {}", operation, status, body))
        }
        StatusCode::FORBIDDEN => {
            SyncError::Forbidden(format!("{} rejected with {}: {}", operation, status, body))
        }
        StatusCode::NOT_FOUND => SyncError::NotFound(format!("{}: {}", operation, body)),
        _ => SyncError::remote(operation, status.as_u16(), body),
    }
}

impl RemoteStore for QuipClient {
    fn get_folder(&self, folder_id: &str) -> Result<RemoteFolder> {
        let response: FolderResponse = self
            .get("get_folder", &format!("folders/{}", folder_id))?
            .json()?;
        Ok(response.into())
    }

    fn create_folder(&self, title: &str, parent_id: &str) -> Result<RemoteFolder> {
        let response: FolderResponse = self
            .post_form(
                "new_folder",
                "folders/new",
                &[("title", title), ("parent_id", parent_id)],
            )?
            .json()?;
        Ok(response.into())
    }

    fn get_document(&self, doc_id: &str) -> Result<Option<RemoteDocument>> {
        let response = match self.get("get_thread", &format!("threads/{}", doc_id)) {
            Ok(response) => response,
            Err(SyncError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let thread: ThreadResponse = response.json()?;
        Ok(thread.into_document())
    }

    fn create_document(
        &self,
        title: &str,
        content: &str,
        format: ContentFormat,
        folder_id: &str,
    ) -> Result<RemoteDocument> {
        let thread: ThreadResponse = self
            .post_form(
                "new_document",
                "threads/new-document",
                &[
                    ("content", content),
                    ("format", format.as_str()),
                    ("title", title),
                    ("member_ids", folder_id),
                ],
            )?
            .json()?;
        thread.into_document().ok_or_else(|| {
            SyncError::InvalidInput(format!("new document '{}' returned no thread id", title))
        })
    }

    fn edit_document(&self, doc_id: &str, edit: &DocumentEdit) -> Result<()> {
        let form: Vec<(&str, &str)> = match edit {
            DocumentEdit::Prepend { content, format } => vec![
                ("thread_id", doc_id),
                ("content", content.as_str()),
                ("format", format.as_str()),
                ("location", LOCATION_PREPEND),
            ],
            DocumentEdit::DeleteSection { section_id } => vec![
                ("thread_id", doc_id),
                ("section_id", section_id.as_str()),
                ("content", " "),
                ("location", LOCATION_DELETE_SECTION),
            ],
            DocumentEdit::ReplaceRange {
                anchor,
                content,
                format,
            } => vec![
                ("thread_id", doc_id),
                ("document_range", anchor.as_str()),
                ("content", content.as_str()),
                ("format", format.as_str()),
                ("location", LOCATION_REPLACE_DOCUMENT_RANGE),
            ],
        };
        self.post_form("edit_document", "threads/edit-document", &form)?;
        Ok(())
    }

    fn delete_document(&self, doc_id: &str) -> Result<()> {
        self.post_form("delete_thread", "threads/delete", &[("thread_id", doc_id)])?;
        Ok(())
    }

    fn upload_blob(&self, doc_id: &str, file_name: &str, data: Vec<u8>) -> Result<BlobRef> {
        let part = multipart::Part::bytes(data).file_name(file_name.to_string());
        let form = multipart::Form::new().part("blob", part);
        let response = self
            .client
            .post(self.url(&format!("blob/{}", doc_id)))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()?;
        let blob: BlobResponse = check_status("put_blob", response)?.json()?;
        Ok(BlobRef {
            id: blob.id,
            url: blob.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_response_children() {
        let json = r#"{
            "folder": {"id": "F1", "title": "Docs"},
            "children": [{"thread_id": "T1"}, {"folder_id": "F2"}, {}]
        }"#;
        let response: FolderResponse = serde_json::from_str(json).unwrap();
        let folder: RemoteFolder = response.into();
        assert_eq!(folder.title, "Docs");
        assert_eq!(
            folder.children,
            vec![
                FolderChild::Document("T1".into()),
                FolderChild::Folder("F2".into())
            ]
        );
    }

    #[test]
    fn test_thread_response_with_error_is_missing() {
        let json = r#"{"error": "Not Found", "error_code": 404}"#;
        let response: ThreadResponse = serde_json::from_str(json).unwrap();
        assert!(response.into_document().is_none());

        let json = r#"{"thread": {"id": "T1", "title": "notes"}, "html": "<p id='a'>x</p>"}"#;
        let response: ThreadResponse = serde_json::from_str(json).unwrap();
        let doc = response.into_document().unwrap();
        assert_eq!(doc.id, "T1");
        assert_eq!(doc.title, "notes");
    }

    #[test]
    fn test_status_mapping() {
        let err = status_error("get_folder", StatusCode::UNAUTHORIZED, String::new());
        assert!(matches!(err, SyncError::Unauthorized(_)));
        assert!(err.is_fatal());

        let err = status_error("delete_thread", StatusCode::FORBIDDEN, "no access".into());
        assert!(matches!(err, SyncError::Forbidden(_)));
        assert!(!err.is_fatal());

        let err = status_error("get_thread", StatusCode::NOT_FOUND, String::new());
        assert!(matches!(err, SyncError::NotFound(_)));

        let err = status_error("get_folder", StatusCode::GATEWAY_TIMEOUT, String::new());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = QuipClient::new("token", "https://platform.quip.com/").unwrap();
        assert_eq!(client.url("threads/x"), "https://platform.quip.com/1/threads/x");
    }
}
