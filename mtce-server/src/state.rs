use std::sync::Arc;
use std::time::Duration;

use mtce_core::analytics::Store;
use mtce_core::backend::BackendClient;
use mtce_core::cache::Cache;
use mtce_core::config::Config;
use mtce_core::error::{MtceError, Result};
use mtce_core::listing::{ListingCache, ListingOptions};
use mtce_core::model::ListedFile;
use mtce_core::transform::TransformContext;

/// Shared application state, built once in `main` and handed to every
/// handler via `axum::Extension`.
pub struct AppState {
    pub config: Config,
    pub backend: BackendClient,
    pub listing: ListingCache,
    pub transforms: Arc<TransformContext>,
    pub analytics: Store,
}

impl AppState {
    pub fn build(config: Config) -> anyhow::Result<AppState> {
        let backend = BackendClient::new(
            config.backend.base_url.clone(),
            Duration::from_secs(config.backend.timeout_seconds),
        )?;
        let cache = Cache::new(&config.cache.dir)?;
        let listing = ListingCache::new(backend.clone(), config.cache_ttl(), config.cache.capacity);
        let transforms = Arc::new(TransformContext::new(&config, backend.clone(), cache));
        let analytics = Store::open(&config.analytics.db_path, config.analytics.retention_days)?;

        Ok(AppState {
            config,
            backend,
            listing,
            transforms,
            analytics,
        })
    }

    /// Resolve a share-relative path to its listed entry via the Share
    /// Listing Cache, used wherever a handler needs the authoritative
    /// source size (fast/HD proxy cache keys, video-sources negotiation).
    /// `UpstreamNotFound` if the share or the path within it don't exist.
    pub async fn resolve_file(&self, share: &str, path: &str) -> Result<ListedFile> {
        let listing = self
            .listing
            .get_listing(share, ListingOptions::default())
            .await?
            .ok_or(MtceError::UpstreamNotFound)?;

        listing
            .into_iter()
            .find(|f| f.path == path)
            .ok_or(MtceError::UpstreamNotFound)
    }
}
