//! Video-sources negotiation contract (spec §4.F.4).
//!
//! Reports readiness and size of the fast/HD renditions without forcing
//! their construction, and optionally kicks off background preparation
//! for renditions the caller asked for but that aren't ready yet.
//! Preparation is fire-and-forget and deduplicated by `task_id` via the
//! context's process-local `ActiveTasks` set (spec §5).

use std::sync::Arc;

use log::warn;
use serde::Serialize;

use super::{fast_proxy, hd_proxy, TransformContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendition {
    Fast,
    Hd,
}

impl Rendition {
    fn as_str(self) -> &'static str {
        match self {
            Rendition::Fast => "fast_proxy",
            Rendition::Hd => "hd_proxy",
        }
    }
}

impl std::str::FromStr for Rendition {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "fast" => Ok(Rendition::Fast),
            "hd" => Ok(Rendition::Hd),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OriginalInfo {
    pub url: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenditionInfo {
    pub url: String,
    pub ready: bool,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareInfo {
    pub requested: Vec<String>,
    pub started: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoSourcesResponse {
    pub share: String,
    pub path: String,
    pub original: OriginalInfo,
    pub fast: RenditionInfo,
    pub hd: RenditionInfo,
    pub prepare: PrepareInfo,
}

/// `requested` is whatever targets the caller named via query params or
/// JSON body; `is_mutating` is true for POST, where an empty `requested`
/// defaults to `["hd"]` per spec.md §4.F.4.
pub fn negotiate(
    ctx: &Arc<TransformContext>,
    share: &str,
    path: &str,
    source_size: u64,
    original_url: String,
    mut requested: Vec<String>,
    is_mutating: bool,
) -> VideoSourcesResponse {
    if is_mutating && requested.is_empty() {
        requested.push("hd".to_string());
    }

    let fast_key = fast_proxy::cache_key(ctx.profile_version, &ctx.proxy_cfg, share, path, source_size);
    let hd_key = hd_proxy::cache_key(ctx.profile_version, &ctx.hd_cfg, share, path, source_size);

    let fast_ready = ctx.cache.lookup(&fast_key, "mp4");
    let hd_ready = ctx.cache.lookup(&hd_key, "mp4");

    let mut started = Vec::new();
    for target in &requested {
        let Ok(rendition) = target.parse::<Rendition>() else {
            continue;
        };
        let already_ready = match rendition {
            Rendition::Fast => fast_ready.is_some(),
            Rendition::Hd => hd_ready.is_some(),
        };
        if already_ready {
            continue;
        }
        if start_preparation(ctx, rendition, share, path, source_size) {
            started.push(target.clone());
        }
    }

    VideoSourcesResponse {
        share: share.to_string(),
        path: path.to_string(),
        original: OriginalInfo {
            url: original_url,
            size: source_size,
        },
        fast: RenditionInfo {
            url: format!("/api/share/{share}/proxy/{path}"),
            ready: fast_ready.is_some(),
            size: fast_ready.map(|(_, size)| size),
        },
        hd: RenditionInfo {
            url: format!("/api/share/{share}/proxy/{path}?rendition=hd"),
            ready: hd_ready.is_some(),
            size: hd_ready.map(|(_, size)| size),
        },
        prepare: PrepareInfo {
            requested,
            started,
        },
    }
}

fn start_preparation(ctx: &Arc<TransformContext>, rendition: Rendition, share: &str, path: &str, source_size: u64) -> bool {
    let key = match rendition {
        Rendition::Fast => fast_proxy::cache_key(ctx.profile_version, &ctx.proxy_cfg, share, path, source_size),
        Rendition::Hd => hd_proxy::cache_key(ctx.profile_version, &ctx.hd_cfg, share, path, source_size),
    };
    let task_id = format!("{}:{key}", rendition.as_str());

    if !ctx.active_tasks.try_start(&task_id) {
        return false;
    }

    let ctx = ctx.clone();
    let share = share.to_string();
    let path = path.to_string();
    tokio::spawn(async move {
        let result = match rendition {
            Rendition::Fast => fast_proxy::ensure(&ctx, &share, &path, source_size).await.map(|_| ()),
            Rendition::Hd => hd_proxy::ensure(&ctx, &share, &path, source_size).await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!("background preparation of {} failed for {share}/{path}: {e}", rendition.as_str());
        }
        ctx.active_tasks.finish(&task_id);
    });

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendition_parses_known_targets() {
        assert_eq!("fast".parse::<Rendition>().unwrap(), Rendition::Fast);
        assert_eq!("hd".parse::<Rendition>().unwrap(), Rendition::Hd);
        assert!("bogus".parse::<Rendition>().is_err());
    }
}
