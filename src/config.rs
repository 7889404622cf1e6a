//! Sync configuration

use std::time::Duration;

use crate::remote::RetryPolicy;

/// Default name of the cache file, created inside the local root
pub const DEFAULT_CACHE_FILE: &str = ".quip_sync_cache.json";

/// Default extension of managed files
pub const DEFAULT_EXTENSION: &str = "md";

/// Configuration for a sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Extension (without dot) of files that are mirrored
    pub extension: String,
    /// Cache file name, relative to the local root
    pub cache_file: String,
    /// Retry and rate limiting for every remote call
    pub retry: RetryPolicy,
    /// Treat image upload failures as a failed sync
    pub strict_media: bool,
    /// Drop deletion candidates that never recorded a remote id
    pub prune_orphans: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            cache_file: DEFAULT_CACHE_FILE.to_string(),
            retry: RetryPolicy::default(),
            strict_media: false,
            prune_orphans: false,
        }
    }
}

impl SyncConfig {
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_cache_file(mut self, name: impl Into<String>) -> Self {
        self.cache_file = name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, interval: Duration) -> Self {
        self.retry.min_interval = interval;
        self
    }

    pub fn with_strict_media(mut self, strict: bool) -> Self {
        self.strict_media = strict;
        self
    }

    pub fn with_prune_orphans(mut self, prune: bool) -> Self {
        self.prune_orphans = prune;
        self
    }
}
