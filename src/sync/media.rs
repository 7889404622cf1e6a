//! Inline image substitution
//!
//! Local image references cannot be sent with the document body, so before
//! upload each `![alt](path)` is rewritten to a plain-text marker
//! `####image path: (path)`. Once the document exists remotely, the media
//! pass reads its rendered markup back, uploads every referenced file as a
//! blob of that document, and replaces each marker with an embedded image.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::{Result, SyncError};
use crate::remote::{RemoteStore, Resilient};
use crate::types::{BlobRef, ContentFormat, DocumentEdit, MediaReport};

/// Text that prefixes every marker in the uploaded markdown
pub const PLACEHOLDER_PREFIX: &str = "####";

static IMAGE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]*)\)").unwrap());

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"image path: \(([^)]+)\)").unwrap());

/// Marker text as it appears in the rendered document
pub fn placeholder_text(reference: &str) -> String {
    format!("image path: ({})", reference)
}

/// References that point off the local disk
pub fn is_remote_reference(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:")
        || lower.starts_with("//")
}

/// Strip an optional `"title"` and angle brackets from a link target
fn link_target(raw: &str) -> &str {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix('<') {
        return match inner.find('>') {
            Some(end) => &inner[..end],
            None => inner,
        };
    }
    match raw.find(char::is_whitespace) {
        Some(end) => &raw[..end],
        None => raw,
    }
}

/// Replace local image references with markers; returns the new content
/// and the number of markers written
pub fn rewrite_image_refs(content: &str) -> (String, usize) {
    let mut count = 0;
    let rewritten = IMAGE_REF.replace_all(content, |caps: &Captures| {
        let target = link_target(&caps[1]);
        if target.is_empty() || is_remote_reference(target) {
            return caps[0].to_string();
        }
        count += 1;
        format!("{}{}", PLACEHOLDER_PREFIX, placeholder_text(target))
    });
    (rewritten.into_owned(), count)
}

fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Marker references found in rendered markup, in document order
pub fn extract_placeholders(html: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(html)
        .map(|caps| unescape_html(&caps[1]))
        .collect()
}

/// Resolve a reference against the directory of the local file
pub fn resolve_reference(base_dir: &Path, reference: &str) -> PathBuf {
    let path = Path::new(reference);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Embedded image markup bound to an uploaded blob
pub fn embed_markup(doc_id: &str, blob: &BlobRef) -> String {
    let src = blob
        .url
        .clone()
        .unwrap_or_else(|| format!("/blob/{}/{}", doc_id, blob.id));
    format!("<img src='{}'>", src)
}

/// Post-upload pass over one document
pub struct MediaPass<'a, S> {
    remote: &'a Resilient<S>,
}

impl<'a, S: RemoteStore> MediaPass<'a, S> {
    pub fn new(remote: &'a Resilient<S>) -> Self {
        Self { remote }
    }

    /// Upload and splice every marker in `doc_id`.
    ///
    /// Fails only when the document itself cannot be fetched (or on a fatal
    /// error); per-image problems are counted in the report.
    pub fn run(&self, doc_id: &str, base_dir: &Path) -> Result<MediaReport> {
        let doc = self
            .remote
            .call("get_thread", |s| s.get_document(doc_id))?
            .ok_or_else(|| SyncError::NotFound(format!("thread {}", doc_id)))?;

        let references = extract_placeholders(&doc.html);
        let mut report = MediaReport {
            placeholders: references.len(),
            ..Default::default()
        };
        if references.is_empty() {
            return Ok(report);
        }

        tracing::info!(
            "Processing {} image placeholders in {}",
            references.len(),
            doc.title
        );

        let mut uploaded: HashMap<PathBuf, BlobRef> = HashMap::new();
        for reference in references {
            let path = resolve_reference(base_dir, &reference);
            match self.splice(doc_id, &reference, &path, &mut uploaded) {
                Ok(true) => report.uploaded += 1,
                Ok(false) => report.missing += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Failed to embed image {}: {}", reference, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Returns `Ok(false)` when the local file does not exist
    fn splice(
        &self,
        doc_id: &str,
        reference: &str,
        path: &Path,
        uploaded: &mut HashMap<PathBuf, BlobRef>,
    ) -> Result<bool> {
        let blob = match uploaded.get(path) {
            Some(blob) => blob.clone(),
            None => {
                let data = match fs::read(path) {
                    Ok(data) => data,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        tracing::warn!("Image not found: {}", path.display());
                        return Ok(false);
                    }
                    Err(e) => return Err(e.into()),
                };
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".to_string());
                let blob = self
                    .remote
                    .call("put_blob", |s| s.upload_blob(doc_id, &file_name, data.clone()))?;
                uploaded.insert(path.to_path_buf(), blob.clone());
                blob
            }
        };

        let edit = DocumentEdit::ReplaceRange {
            anchor: placeholder_text(reference),
            content: embed_markup(doc_id, &blob),
            format: ContentFormat::Html,
        };
        self.remote
            .call("edit_document", |s| s.edit_document(doc_id, &edit))?;
        tracing::debug!("Embedded {} as blob {}", reference, blob.id);
        Ok(true)
    }
}
