// Cached site query
// The view reads sites through here instead of hitting the API on every render

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::FathomConfig;
use crate::error::FetchError;
use crate::fathom::{FathomClient, Site};

struct CacheEntry {
    fetched_at: Instant,
    sites: Arc<Vec<Site>>,
}

pub struct SiteCache {
    client: FathomClient,
    stale_after: Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl SiteCache {
    pub fn from_config(config: &FathomConfig) -> Result<Self, FetchError> {
        let client = FathomClient::new(&config.api_url, config.api_key.clone())?;
        Ok(SiteCache::new(client, Duration::from_secs(config.sites_stale_seconds)))
    }

    pub fn new(client: FathomClient, stale_after: Duration) -> Self {
        SiteCache {
            client,
            stale_after,
            entry: Mutex::new(None),
        }
    }

    /// Returns the cached sites while fresh, fetching otherwise.
    ///
    /// The lock is held across the fetch so concurrent callers share one
    /// request. A failed fetch keeps the previous entry.
    pub async fn get(&self) -> Result<Arc<Vec<Site>>, FetchError> {
        let mut entry = self.entry.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.fetched_at.elapsed() < self.stale_after {
                debug!("Serving {} cached site(s)", cached.sites.len());
                return Ok(Arc::clone(&cached.sites));
            }
        }

        match self.client.list_sites().await {
            Ok(sites) => {
                let sites = Arc::new(sites);
                *entry = Some(CacheEntry {
                    fetched_at: Instant::now(),
                    sites: Arc::clone(&sites),
                });
                Ok(sites)
            }
            Err(e) => {
                warn!("Site query failed: {}", e);
                Err(e)
            }
        }
    }

    /// The cached list, fresh or not, without fetching.
    pub async fn peek(&self) -> Option<Arc<Vec<Site>>> {
        self.entry.lock().await.as_ref().map(|cached| Arc::clone(&cached.sites))
    }

    pub async fn invalidate(&self) {
        debug!("Invalidating site cache");
        *self.entry.lock().await = None;
    }
}
