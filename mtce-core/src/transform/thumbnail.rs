//! Thumbnail pipeline (spec §4.F.1).
//!
//! JPEG, longest side scaled to `min(max_width, input width)`. Images
//! produce a single frame from the file; videos seek to 1s and retry at
//! 0s if that first attempt fails. The cache key deliberately omits
//! source size — the legacy policy spec.md documents as a known gap
//! (editing a source in place without renaming it can leave a stale
//! thumbnail behind).

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::cache::hash_key;
use crate::error::{MtceError, Result};
use crate::model::{is_image_extension, is_video_extension};

use super::{blocking_fetch_or_build, TransformContext, FFMPEG_BIN};

pub fn cache_key(profile_version: u32, share: &str, path: &str) -> String {
    hash_key(&format!("thumbnail:v{profile_version}:{share}:{path}"))
}

/// Returns the on-disk path of the cached thumbnail, building it if
/// absent. An unsupported extension surfaces as `MtceError::UnsupportedMedia`,
/// which `mtce-server` maps to 415.
pub async fn ensure(
    ctx: &TransformContext,
    share: &str,
    path: &str,
    extension: &str,
) -> Result<std::path::PathBuf> {
    let is_video = if is_image_extension(extension) {
        false
    } else if is_video_extension(extension) {
        true
    } else {
        return Err(MtceError::unsupported_media(format!(
            "unsupported extension for preview: {extension}"
        )));
    };

    let key = cache_key(ctx.profile_version, share, path);
    let source_url = ctx.backend.source_url(share, path);
    let pool = ctx.thumbnail_pool.clone();
    let cfg = ctx.thumbnail_cfg.clone();
    let timeout = std::time::Duration::from_secs(cfg.timeout_seconds);

    blocking_fetch_or_build(&ctx.cache, &key, "jpg", move |tmp: &Path| {
        let pool = pool.clone();
        let cfg = cfg.clone();
        let source_url = source_url.clone();
        let tmp = tmp.to_path_buf();
        async move {
            if is_video {
                if run_thumbnail_attempt(&pool, &source_url, &tmp, &cfg, Some(1), timeout).await? {
                    return Ok(());
                }
                let _ = tokio::fs::remove_file(&tmp).await;
                if run_thumbnail_attempt(&pool, &source_url, &tmp, &cfg, Some(0), timeout).await? {
                    return Ok(());
                }
                Err(MtceError::transform("thumbnail extraction failed at seek=1s and seek=0"))
            } else if run_thumbnail_attempt(&pool, &source_url, &tmp, &cfg, None, timeout).await? {
                Ok(())
            } else {
                Err(MtceError::transform("thumbnail extraction failed"))
            }
        }
    })
}

async fn run_thumbnail_attempt(
    pool: &crate::encoder::EncoderPool,
    source_url: &str,
    tmp: &Path,
    cfg: &crate::config::ThumbnailConfig,
    seek_seconds: Option<u32>,
    timeout: std::time::Duration,
) -> Result<bool> {
    let scale = format!("scale='min({},iw)':-2", cfg.max_width);

    let mut cmd = Command::new(FFMPEG_BIN);
    cmd.stdin(Stdio::null());
    if let Some(seek) = seek_seconds {
        cmd.args(["-ss", &seek.to_string()]);
    }
    cmd.args(["-i", source_url])
        .args(["-vf", &scale])
        .args(["-frames:v", "1"])
        .args(["-q:v", &cfg.quality.to_string()])
        .arg("-y")
        .arg(tmp);

    let output = pool.run(cmd, timeout).await?;
    Ok(output.success && tmp.is_file() && tmp.metadata().map(|m| m.len() > 0).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendClient;
    use crate::cache::Cache;
    use crate::config::{
        AnalyticsConfig, BackendConfig, CacheConfig, Config, HdProxyConfig, IpMode, ProxyConfig, ThumbnailConfig,
    };
    use tempfile::TempDir;

    fn test_context(dir: &TempDir) -> TransformContext {
        let config = Config {
            cache: CacheConfig {
                dir: dir.path().to_string_lossy().into_owned(),
                ttl_seconds: 3600,
                capacity: 1000,
            },
            analytics: AnalyticsConfig {
                db_path: dir.path().join("analytics.db").to_string_lossy().into_owned(),
                retention_days: 90,
                ip_mode: IpMode::Anonymized,
                enable_gallery_view: true,
                enable_file_download: true,
                enable_zip_download: true,
            },
            thumbnail: ThumbnailConfig {
                max_width: 640,
                quality: 6,
                pool_size: 2,
                timeout_seconds: 20,
            },
            proxy: ProxyConfig {
                max_dimension: 1280,
                crf: 28,
                preset: "veryfast".to_string(),
                pool_size: 1,
                timeout_seconds: 600,
            },
            hd: HdProxyConfig {
                crf: 20,
                max_dimension: 0,
                pool_size: 1,
                timeout_seconds: 900,
            },
            backend: BackendConfig {
                base_url: "http://localhost:1".to_string(),
                timeout_seconds: 30,
            },
            profile_version: 1,
            admin_token_header: "X-Auth".to_string(),
            bind_addr: "0.0.0.0:8088".to_string(),
        };
        let backend = BackendClient::new(config.backend.base_url.clone(), std::time::Duration::from_secs(1)).unwrap();
        let cache = Cache::new(dir.path().join("cache")).unwrap();
        TransformContext::new(&config, backend, cache)
    }

    #[tokio::test]
    async fn rejects_unsupported_extension_before_touching_backend() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);

        let result = ensure(&ctx, "share1", "doc.pdf", "pdf").await;
        assert!(matches!(result, Err(MtceError::UnsupportedMedia(_))));
    }
}
