//! Fast proxy pipeline (spec §4.F.2): a single bandwidth-optimized MP4
//! rendition, one-shot transcode with no fallback ladder — a failure here
//! is just a failure.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::cache::hash_key;
use crate::error::{MtceError, Result};

use super::{blocking_fetch_or_build, TransformContext, FFMPEG_BIN};

pub fn cache_key(profile_version: u32, cfg: &crate::config::ProxyConfig, share: &str, path: &str, source_size: u64) -> String {
    hash_key(&format!(
        "fast_proxy:v{profile_version}:{share}:{path}:{source_size}:{}:{}:{}",
        cfg.max_dimension, cfg.crf, cfg.preset
    ))
}

pub async fn ensure(
    ctx: &TransformContext,
    share: &str,
    path: &str,
    source_size: u64,
) -> Result<std::path::PathBuf> {
    let key = cache_key(ctx.profile_version, &ctx.proxy_cfg, share, path, source_size);
    let source_url = ctx.backend.source_url(share, path);
    let pool = ctx.proxy_pool.clone();
    let cfg = ctx.proxy_cfg.clone();
    let timeout = std::time::Duration::from_secs(cfg.timeout_seconds);

    blocking_fetch_or_build(&ctx.cache, &key, "mp4", move |tmp: &Path| {
        let pool = pool.clone();
        let cfg = cfg.clone();
        let source_url = source_url.clone();
        let tmp = tmp.to_path_buf();
        async move {
            let scale = format!(
                "scale='if(gt(iw,ih),min(iw,{md}),-2)':'if(gt(iw,ih),-2,min(ih,{md}))'",
                md = cfg.max_dimension
            );

            let mut cmd = Command::new(FFMPEG_BIN);
            cmd.stdin(Stdio::null())
                .args(["-i", &source_url])
                .args(["-map", "0:v:0", "-map", "0:a:0?"])
                .args(["-vf", &scale])
                .args(["-c:v", "libx264", "-profile:v", "main", "-pix_fmt", "yuv420p"])
                .args(["-g", "60", "-sc_threshold", "0"])
                .args(["-crf", &cfg.crf.to_string(), "-preset", &cfg.preset])
                .args(["-c:a", "aac", "-b:a", "128k"])
                .args(["-movflags", "+faststart"])
                .arg("-y")
                .arg(&tmp);

            let output = pool.run(cmd, timeout).await?;
            if output.success && tmp.is_file() {
                Ok(())
            } else {
                Err(MtceError::transform(format!(
                    "fast-proxy transcode failed: {}",
                    output.stderr_lossy()
                )))
            }
        }
    })
}
