//! HD proxy pipeline (spec §4.F.3): a three-attempt fallback ladder
//! sharing one bounded pool slot and one temporary path. Remux first
//! (cheapest), then copy-video/re-encode-audio, then a full transcode.
//! The first attempt to succeed wins; each failed attempt deletes its
//! temporary before the next tries, and a timeout inside an attempt
//! counts as a failure, not a hard error — the ladder just keeps going.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::cache::hash_key;
use crate::error::{MtceError, Result};

use super::{blocking_fetch_or_build, TransformContext, FFMPEG_BIN};

pub fn cache_key(profile_version: u32, cfg: &crate::config::HdProxyConfig, share: &str, path: &str, source_size: u64) -> String {
    hash_key(&format!(
        "hd_proxy:v{profile_version}:{share}:{path}:{source_size}:{}:{}",
        cfg.crf, cfg.max_dimension
    ))
}

pub async fn ensure(
    ctx: &TransformContext,
    share: &str,
    path: &str,
    source_size: u64,
) -> Result<std::path::PathBuf> {
    let key = cache_key(ctx.profile_version, &ctx.hd_cfg, share, path, source_size);
    let source_url = ctx.backend.source_url(share, path);
    let pool = ctx.hd_pool.clone();
    let cfg = ctx.hd_cfg.clone();
    let timeout = std::time::Duration::from_secs(cfg.timeout_seconds);

    blocking_fetch_or_build(&ctx.cache, &key, "mp4", move |tmp: &Path| {
        let pool = pool.clone();
        let cfg = cfg.clone();
        let source_url = source_url.clone();
        let tmp = tmp.to_path_buf();
        async move { run_ladder(&pool, &source_url, &tmp, &cfg, timeout).await }
    })
}

async fn run_ladder(
    pool: &crate::encoder::EncoderPool,
    source_url: &str,
    tmp: &Path,
    cfg: &crate::config::HdProxyConfig,
    timeout: std::time::Duration,
) -> Result<()> {
    // One permit held for the whole ladder, not one per attempt, so the
    // three attempts run back-to-back in the same bounded slot instead of
    // letting another request's attempt interleave between them.
    let permit = pool.acquire().await?;

    if try_remux(pool, &permit, source_url, tmp, timeout).await {
        return Ok(());
    }
    let _ = tokio::fs::remove_file(tmp).await;

    if try_copy_video(pool, &permit, source_url, tmp, timeout).await {
        return Ok(());
    }
    let _ = tokio::fs::remove_file(tmp).await;

    if try_transcode(pool, &permit, source_url, tmp, cfg, timeout).await {
        return Ok(());
    }
    Err(MtceError::transform("all HD proxy ladder attempts failed"))
}

async fn try_remux(
    pool: &crate::encoder::EncoderPool,
    permit: &tokio::sync::OwnedSemaphorePermit,
    source_url: &str,
    tmp: &Path,
    timeout: std::time::Duration,
) -> bool {
    let mut cmd = Command::new(FFMPEG_BIN);
    cmd.stdin(Stdio::null())
        .args(["-i", source_url])
        .args(["-map", "0", "-c", "copy", "-movflags", "+faststart"])
        .arg("-y")
        .arg(tmp);

    matches!(pool.run_with_permit(permit, cmd, timeout).await, Ok(o) if o.success) && tmp.is_file()
}

async fn try_copy_video(
    pool: &crate::encoder::EncoderPool,
    permit: &tokio::sync::OwnedSemaphorePermit,
    source_url: &str,
    tmp: &Path,
    timeout: std::time::Duration,
) -> bool {
    let mut cmd = Command::new(FFMPEG_BIN);
    cmd.stdin(Stdio::null())
        .args(["-i", source_url])
        .args(["-map", "0:v:0", "-map", "0:a:0?"])
        .args(["-c:v", "copy", "-c:a", "aac", "-movflags", "+faststart"])
        .arg("-y")
        .arg(tmp);

    matches!(pool.run_with_permit(permit, cmd, timeout).await, Ok(o) if o.success) && tmp.is_file()
}

async fn try_transcode(
    pool: &crate::encoder::EncoderPool,
    permit: &tokio::sync::OwnedSemaphorePermit,
    source_url: &str,
    tmp: &Path,
    cfg: &crate::config::HdProxyConfig,
    timeout: std::time::Duration,
) -> bool {
    let mut cmd = Command::new(FFMPEG_BIN);
    cmd.stdin(Stdio::null()).args(["-i", source_url]);

    if cfg.max_dimension > 0 {
        let scale = format!(
            "scale='if(gt(iw,ih),min(iw,{md}),-2)':'if(gt(iw,ih),-2,min(ih,{md}))'",
            md = cfg.max_dimension
        );
        cmd.args(["-vf", &scale]);
    }

    cmd.args(["-c:v", "libx264", "-profile:v", "high", "-pix_fmt", "yuv420p"])
        .args(["-g", "60", "-sc_threshold", "0"])
        .args(["-crf", &cfg.crf.to_string()])
        .args(["-c:a", "aac", "-b:a", "192k"])
        .args(["-movflags", "+faststart"])
        .arg("-y")
        .arg(tmp);

    matches!(pool.run_with_permit(permit, cmd, timeout).await, Ok(o) if o.success) && tmp.is_file()
}
