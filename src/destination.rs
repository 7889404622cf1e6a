//! Destination folder links
//!
//! A folder link like `https://acme.quip.com/AbCdEf123/Team-Notes` names the
//! folder by its first path segment; the API lives on the `platform.`
//! subdomain of the same host.

use reqwest::Url;

use crate::error::{Result, SyncError};

/// API base used when only a bare folder id is given
pub const DEFAULT_API_URL: &str = "https://platform.quip.com";

/// Resolved destination of a sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub folder_id: String,
    pub api_url: String,
}

impl Destination {
    /// Parse a folder link or a bare folder id
    pub fn parse(link: &str) -> Result<Self> {
        let link = link.trim();
        if link.is_empty() {
            return Err(SyncError::InvalidInput("empty folder link".to_string()));
        }

        if !link.contains("://") {
            let folder_id = link.trim_matches('/');
            if folder_id.is_empty() || folder_id.contains('/') {
                return Err(SyncError::InvalidInput(format!(
                    "not a folder link or id: {}",
                    link
                )));
            }
            return Ok(Self {
                folder_id: folder_id.to_string(),
                api_url: DEFAULT_API_URL.to_string(),
            });
        }

        let url = Url::parse(link)
            .map_err(|e| SyncError::InvalidInput(format!("invalid folder link {}: {}", link, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| SyncError::InvalidInput(format!("folder link has no host: {}", link)))?;
        let folder_id = url
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .ok_or_else(|| {
                SyncError::InvalidInput(format!("folder link has no folder id: {}", link))
            })?;

        Ok(Self {
            folder_id: folder_id.to_string(),
            api_url: api_url_for_host(host),
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

fn api_url_for_host(host: &str) -> String {
    if host.starts_with("platform.") {
        format!("https://{}", host)
    } else {
        format!("https://platform.{}", host)
    }
}
