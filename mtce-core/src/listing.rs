//! Share Listing Cache (spec §4.E).
//!
//! A process-local, mutex-guarded TTL cache of a share's flattened file
//! tree, in the same mutex-guarded-map shape as the teacher's
//! `lru_cache::LruCache`, but keyed by age (TTL) rather than idle time,
//! and with spec's blunt overflow policy: clear everything rather than
//! evict one entry at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::backend::BackendClient;
use crate::error::{MtceError, Result};
use crate::model::{extension_of, FileKind, ListedFile};

struct Entry {
    fetched_at: Instant,
    listing: Vec<ListedFile>,
}

pub struct ListingOptions {
    pub force_refresh: bool,
    pub max_age: Option<Duration>,
}

impl Default for ListingOptions {
    fn default() -> Self {
        ListingOptions {
            force_refresh: false,
            max_age: None,
        }
    }
}

pub struct ListingCache {
    backend: BackendClient,
    default_ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ListingCache {
    pub fn new(backend: BackendClient, default_ttl: Duration, capacity: usize) -> ListingCache {
        ListingCache {
            backend,
            default_ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (from cache, or the Backend on miss/expiry/force) the
    /// flattened file list for `share`. Returns `Ok(None)` for a 404
    /// ("not found"); other upstream errors propagate and never evict a
    /// good cached entry (spec §4.E failure semantics).
    pub async fn get_listing(
        &self,
        share: &str,
        opts: ListingOptions,
    ) -> Result<Option<Vec<ListedFile>>> {
        let max_age = opts.max_age.unwrap_or(self.default_ttl);

        if !opts.force_refresh {
            if let Some(listing) = self.cached_if_fresh(share, max_age) {
                debug!("listing cache hit for {share}");
                return Ok(Some(listing));
            }
        }

        match self.fetch_and_store(share).await {
            Ok(listing) => Ok(Some(listing)),
            Err(MtceError::UpstreamNotFound) => Ok(None),
            // A forced refresh that can't reach the Backend at all (bad
            // status, connection failure, timeout — `backend.rs` maps all
            // of these to `UpstreamTransient`) is treated as not-found
            // rather than propagated, so a flaky Backend doesn't turn a
            // refresh button into a 502 (spec §4.E invariant 4).
            Err(MtceError::UpstreamTransient(_)) if opts.force_refresh => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn cached_if_fresh(&self, share: &str, max_age: Duration) -> Option<Vec<ListedFile>> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(share)?;
        if entry.fetched_at.elapsed() >= max_age {
            return None;
        }
        Some(entry.listing.clone())
    }

    async fn fetch_and_store(&self, share: &str) -> Result<Vec<ListedFile>> {
        let listing = self.fetch_from_backend(share).await?;

        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity && !entries.contains_key(share) {
            warn!("listing cache at capacity ({}); clearing", self.capacity);
            entries.clear();
        }
        entries.insert(
            share.to_string(),
            Entry {
                fetched_at: Instant::now(),
                listing: listing.clone(),
            },
        );
        Ok(listing)
    }

    async fn fetch_from_backend(&self, share: &str) -> Result<Vec<ListedFile>> {
        let root = self.backend.list(share, "").await?;

        // Single-file share: no `items`, synthesize a one-element list.
        let Some(root_items) = root.items.clone() else {
            let extension = extension_of(&root.name);
            let kind = FileKind::classify(root.kind.as_deref(), &extension);
            let inline_url = self.backend.dl_url_single_file(share, true);
            let download_url = self.backend.dl_url_single_file(share, false);
            return Ok(vec![ListedFile {
                name: root.name.clone(),
                path: root.name,
                kind,
                extension,
                size: root.size,
                inline_url,
                download_url,
            }]);
        };

        // Folder share: depth-first flatten with an explicit worklist,
        // de-duplicating visited paths.
        let mut out = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut worklist: VecDeque<(String, crate::backend::BackendItem)> =
            root_items.into_iter().map(|item| (String::new(), item)).collect();

        while let Some((prefix, item)) = worklist.pop_front() {
            let path = if prefix.is_empty() {
                item.name.clone()
            } else {
                format!("{prefix}/{}", item.name)
            };

            if item.is_dir {
                if !visited.insert(path.clone()) {
                    continue;
                }
                let sub = self.backend.list(share, &path).await?;
                if let Some(children) = sub.items {
                    for child in children {
                        worklist.push_back((path.clone(), child));
                    }
                }
                continue;
            }

            if !visited.insert(path.clone()) {
                continue;
            }

            let extension = extension_of(&item.name);
            let kind = FileKind::classify(item.kind.as_deref(), &extension);
            out.push(ListedFile {
                name: item.name,
                inline_url: self.backend.dl_url(share, &path, true),
                download_url: self.backend.dl_url(share, &path, false),
                path,
                kind,
                extension,
                size: item.size,
            });
        }

        info!("listed {} files for share {share}", out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_options_default_has_no_override() {
        let opts = ListingOptions::default();
        assert!(!opts.force_refresh);
        assert!(opts.max_age.is_none());
    }

    #[tokio::test]
    async fn forced_refresh_against_unreachable_backend_is_not_found() {
        // Port 1 is a reserved, unlistened port: connection is refused
        // immediately rather than timing out.
        let backend = BackendClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let cache = ListingCache::new(backend, Duration::from_secs(60), 100);

        let result = cache
            .get_listing(
                "share1",
                ListingOptions {
                    force_refresh: true,
                    max_age: None,
                },
            )
            .await;

        assert!(matches!(result, Ok(None)));
    }
}
