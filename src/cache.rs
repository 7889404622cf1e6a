//! Persistent change cache
//!
//! Maps each local file, keyed by its path relative to the synced root, to
//! the fingerprint of its last synced content,
//! the remote document it was matched to, and the outcome of that sync.
//!
//! On disk the cache is one JSON object. Values are either a record
//! `{"hash", "doc_id", "last_sync", "sync_success"}` or, in caches written by
//! early versions, a bare fingerprint string. Both shapes are normalized into
//! [`CacheEntry`] at load time. The file is read once per run and written
//! once at the end of it.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};

/// Content fingerprint: SHA-256 over the raw bytes
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Cache key for a local file: its path relative to the synced root
pub fn cache_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Last known sync state of one local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub remote_id: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub sync_succeeded: bool,
}

impl CacheEntry {
    /// Entry for a sync attempt that just finished
    pub fn attempted(fingerprint: String, remote_id: Option<String>, succeeded: bool) -> Self {
        Self {
            fingerprint,
            remote_id,
            last_sync: Some(Utc::now()),
            sync_succeeded: succeeded,
        }
    }

    /// Whether the remote document is known to match content with `fingerprint`
    pub fn matches(&self, fingerprint: &str) -> bool {
        self.sync_succeeded && self.remote_id.is_some() && self.fingerprint == fingerprint
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Legacy(String),
    Record(StoredRecord),
}

#[derive(Debug, Deserialize)]
struct StoredRecord {
    hash: String,
    #[serde(default)]
    doc_id: Option<String>,
    #[serde(default)]
    last_sync: Option<serde_json::Value>,
    #[serde(default)]
    sync_success: Option<bool>,
}

#[derive(Serialize)]
struct RecordOut<'a> {
    hash: &'a str,
    doc_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_sync: Option<String>,
    sync_success: bool,
}

impl From<StoredEntry> for CacheEntry {
    fn from(stored: StoredEntry) -> Self {
        match stored {
            StoredEntry::Legacy(hash) => CacheEntry {
                fingerprint: hash,
                remote_id: None,
                last_sync: None,
                sync_succeeded: false,
            },
            // Records without a flag predate failure tracking, when only
            // successful syncs were written.
            StoredEntry::Record(record) => CacheEntry {
                fingerprint: record.hash,
                remote_id: record.doc_id.filter(|id| !id.is_empty()),
                last_sync: record.last_sync.as_ref().and_then(parse_timestamp),
                sync_succeeded: record.sync_success.unwrap_or(true),
            },
        }
    }
}

/// Accepts RFC 3339 strings and epoch seconds
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        serde_json::Value::Number(n) => {
            let secs = n.as_f64()?;
            let whole = secs.trunc() as i64;
            let nanos = (secs.fract() * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
            DateTime::<Utc>::from_timestamp(whole, nanos)
        }
        _ => None,
    }
}

/// Normalize one raw JSON value into an entry
pub fn parse_entry(value: serde_json::Value) -> Option<CacheEntry> {
    serde_json::from_value::<StoredEntry>(value)
        .ok()
        .map(CacheEntry::from)
}

/// The on-disk change cache, loaded for the duration of one run
#[derive(Debug, Clone)]
pub struct ChangeCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl ChangeCache {
    /// Empty cache that will be saved to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the cache; a missing or corrupt file yields an empty cache
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No cache at {}, starting fresh", path.display());
                return Ok(Self::empty(path));
            }
            Err(e) => {
                return Err(SyncError::Cache(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let object: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&raw)
        {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!(
                    "Cache file {} is corrupt ({}), starting fresh",
                    path.display(),
                    e
                );
                return Ok(Self::empty(path));
            }
        };

        let mut entries = BTreeMap::new();
        for (key, value) in object {
            match parse_entry(value) {
                Some(entry) => {
                    entries.insert(key, entry);
                }
                None => tracing::warn!("Dropping unreadable cache entry for {}", key),
            }
        }

        tracing::debug!("Loaded {} cache entries from {}", entries.len(), path.display());
        Ok(Self { path, entries })
    }

    /// Write the full mapping, replacing the previous file in one rename
    pub fn save(&self) -> Result<()> {
        let out: BTreeMap<&str, RecordOut<'_>> = self
            .entries
            .iter()
            .map(|(key, entry)| {
                (
                    key.as_str(),
                    RecordOut {
                        hash: &entry.fingerprint,
                        doc_id: entry.remote_id.as_deref(),
                        last_sync: entry.last_sync.map(|t| t.to_rfc3339()),
                        sync_success: entry.sync_succeeded,
                    },
                )
            })
            .collect();
        let json = serde_json::to_vec_pretty(&out)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let write = || -> io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&self.path).map_err(|e| e.error)?;
            Ok(())
        };
        write().map_err(|e| {
            SyncError::Cache(format!("failed to write {}: {}", self.path.display(), e))
        })?;

        tracing::debug!("Saved {} cache entries to {}", self.entries.len(), self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: CacheEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Re-key entries written with the root as a path prefix.
    ///
    /// Earlier versions keyed files by the path as walked, so the same tree
    /// reached through another spelling of the root looked deleted. A key is
    /// left alone when it already names a file under `root`.
    pub fn rebase(&mut self, root: &Path) -> usize {
        let stale: Vec<(String, String)> = self
            .entries
            .keys()
            .filter_map(|key| {
                let path = Path::new(key);
                if path.is_relative() && root.join(path).exists() {
                    return None;
                }
                let relative = path.strip_prefix(root).ok()?;
                if relative.as_os_str().is_empty() {
                    return None;
                }
                Some((key.clone(), relative.to_string_lossy().into_owned()))
            })
            .collect();

        let mut moved = 0;
        for (old, new) in stale {
            if let Some(entry) = self.entries.remove(&old) {
                self.entries.entry(new).or_insert(entry);
                moved += 1;
            }
        }
        if moved > 0 {
            tracing::info!("Rebased {} cache entries onto {}", moved, root.display());
        }
        moved
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
