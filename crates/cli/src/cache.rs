//! Time-based memoization of fetch results
//!
//! One `moka` cache per fetch function, keyed by the full argument tuple.
//! Concurrent loads of the same key share one in-flight fetch. Failed and
//! absent results are handed to every waiter but never stored.

use std::future::Future;
use std::sync::Arc;

use moka::future::Cache;
use pkgpulse_core::{DateRange, DownloadRecord, Granularity, RepositoryStats};
use tracing::debug;

use crate::config::CacheSettings;
use crate::error::Result;

/// Key of a download-count query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadQuery {
    pub package: String,
    pub range: DateRange,
    pub granularity: Granularity,
}

#[derive(Clone)]
pub struct FetchCache {
    downloads: Cache<DownloadQuery, Arc<Vec<DownloadRecord>>>,
    lifetime: Cache<String, u64>,
    repositories: Cache<String, Arc<RepositoryStats>>,
}

impl std::fmt::Debug for FetchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCache")
            .field("downloads", &self.downloads.entry_count())
            .field("lifetime", &self.lifetime.entry_count())
            .field("repositories", &self.repositories.entry_count())
            .finish()
    }
}

impl FetchCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            downloads: Cache::builder()
                .time_to_live(settings.downloads_ttl)
                .build(),
            lifetime: Cache::builder()
                .time_to_live(settings.downloads_ttl)
                .build(),
            repositories: Cache::builder()
                .time_to_live(settings.repository_ttl)
                .build(),
        }
    }

    pub async fn downloads<F>(
        &self,
        key: DownloadQuery,
        load: F,
    ) -> Result<Arc<Vec<DownloadRecord>>>
    where
        F: Future<Output = Result<Vec<DownloadRecord>>>,
    {
        debug!("downloads lookup for {:?}", key);
        let records = self
            .downloads
            .try_get_with(key, async move { load.await.map(Arc::new) })
            .await?;
        Ok(records)
    }

    pub async fn lifetime<F>(&self, package: &str, load: F) -> Result<u64>
    where
        F: Future<Output = Result<u64>>,
    {
        let total = self.lifetime.try_get_with(package.to_string(), load).await?;
        Ok(total)
    }

    /// `None` results are returned as-is and retried on the next call
    pub async fn repository<F>(&self, repo: &str, load: F) -> Option<Arc<RepositoryStats>>
    where
        F: Future<Output = Option<RepositoryStats>>,
    {
        self.repositories
            .optionally_get_with(repo.to_string(), async move { load.await.map(Arc::new) })
            .await
    }
}
