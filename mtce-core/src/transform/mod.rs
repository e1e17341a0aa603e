//! Transform Service (spec §4.F): thumbnail, fast-proxy and HD-proxy
//! pipelines built on the encoder runner and content-addressed cache,
//! plus the video-sources negotiation contract that reports readiness
//! and kicks off background preparation.

pub mod fast_proxy;
pub mod hd_proxy;
pub mod sources;
pub mod thumbnail;

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;

use crate::backend::BackendClient;
use crate::cache::Cache;
use crate::config::{Config, HdProxyConfig, ProxyConfig, ThumbnailConfig};
use crate::encoder::EncoderPool;
use crate::error::Result;

pub(crate) const FFMPEG_BIN: &str = "ffmpeg";
pub(crate) const FFPROBE_BIN: &str = "ffprobe";

/// Everything the transform pipelines need, built once at startup and
/// shared (behind an `Arc`) across request handlers.
pub struct TransformContext {
    pub backend: BackendClient,
    pub cache: Cache,
    thumbnail_pool: EncoderPool,
    proxy_pool: EncoderPool,
    hd_pool: EncoderPool,
    thumbnail_cfg: ThumbnailConfig,
    proxy_cfg: ProxyConfig,
    hd_cfg: HdProxyConfig,
    profile_version: u32,
    active_tasks: ActiveTasks,
}

impl TransformContext {
    pub fn new(config: &Config, backend: BackendClient, cache: Cache) -> TransformContext {
        TransformContext {
            backend,
            cache,
            thumbnail_pool: EncoderPool::new("thumbnail", config.thumbnail.pool_size),
            proxy_pool: EncoderPool::new("fast_proxy", config.proxy.pool_size),
            hd_pool: EncoderPool::new("hd_proxy", config.hd.pool_size),
            thumbnail_cfg: config.thumbnail.clone(),
            proxy_cfg: config.proxy.clone(),
            hd_cfg: config.hd.clone(),
            profile_version: config.profile_version,
            active_tasks: ActiveTasks::new(),
        }
    }
}

/// Process-local dedup set for background preparation tasks (spec §5):
/// submitting a `task_id` already in flight is a no-op that reports
/// `started=false`; completion removes the id regardless of outcome.
struct ActiveTasks {
    set: Mutex<HashSet<String>>,
}

impl ActiveTasks {
    fn new() -> ActiveTasks {
        ActiveTasks {
            set: Mutex::new(HashSet::new()),
        }
    }

    /// Attempts to claim `task_id`. Returns `true` if this caller is now
    /// responsible for running it, `false` if someone else already is.
    fn try_start(&self, task_id: &str) -> bool {
        self.set.lock().unwrap().insert(task_id.to_string())
    }

    fn finish(&self, task_id: &str) {
        self.set.lock().unwrap().remove(task_id);
    }
}

/// Runs `cache.fetch_or_build` — which blocks on file-lock I/O — on the
/// current worker thread while letting `build` `.await` the async
/// encoder pool from inside its own synchronous `Builder` closure. Mirrors
/// the teacher's `task::block_in_place` + nested `block_on` used to mix
/// blocking reads with async work in its streaming handler.
fn blocking_fetch_or_build<F, Fut>(
    cache: &Cache,
    key: &str,
    ext: &str,
    build: F,
) -> Result<std::path::PathBuf>
where
    F: Fn(&Path) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    tokio::task::block_in_place(|| {
        let builder = |tmp: &Path| -> Result<()> { tokio::runtime::Handle::current().block_on(build(tmp)) };
        cache.fetch_or_build(key, ext, &builder)
    })
}
