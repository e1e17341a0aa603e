//! Faststart decision ladder (spec §4.B), invoked by the `mtce-faststart`
//! binary once per candidate media file. Grounded in
//! `original_source/faststart/faststart.py`, reworked into explicit
//! result types per spec §9 ("exception-based skip-on-any-failure
//! idioms... translate to explicit result types").

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::atom::scan_top_level_atoms;

const STABILIZE_INTERVAL: Duration = Duration::from_secs(2);
const STABILIZE_TIMEOUT: Duration = Duration::from_secs(120);
const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(3600);
const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(60);

const TIMESTAMP_ERROR_MARKERS: &[&str] = &[
    "non monotonically increasing dts",
    "invalid dts",
    "discarding invalid",
];

/// Outcome of a single `process` call, for logging and tests. Mirrors the
/// Python prototype's branch-per-reason log lines.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    SkippedNotAFile,
    SkippedUnstable,
    TranscodedHevc,
    FixedExtraStreams,
    FixedTimestamps,
    AlreadyFaststart,
    Remuxed,
    RemuxFailed,
}

/// Entry point used by the `mtce-faststart` binary. Never fails the
/// process: exit code is always 0 from here (usage errors are handled by
/// the binary's argument parsing, not this function).
pub fn process(path: &Path, ffmpeg: &str, ffprobe: &str) -> Outcome {
    match path.metadata() {
        Ok(m) if m.is_file() => {}
        _ => return Outcome::SkippedNotAFile,
    }

    if !wait_for_stable_size(path) {
        info!("skipping (file not stable): {}", path.display());
        return Outcome::SkippedUnstable;
    }

    let offsets = match scan_top_level_atoms(path) {
        Ok(o) => o,
        Err(e) => {
            warn!("skipping (failed to inspect atoms): {}: {e}", path.display());
            crate::atom::AtomOffsets::default()
        }
    };

    if let Some(codec) = get_video_codec(path, ffprobe) {
        if codec == "hevc" || codec == "h265" {
            info!("detected HEVC codec, transcoding to H.264: {}", path.display());
            transcode_full(path, ffmpeg);
            return Outcome::TranscodedHevc;
        }
    }

    if has_extra_data_streams(path, ffprobe) {
        info!("detected extra data streams: {}", path.display());
        fix_video_errors(path, ffmpeg);
        return Outcome::FixedExtraStreams;
    }

    if has_timestamp_errors(path, ffmpeg) {
        info!("detected timestamp errors: {}", path.display());
        fix_video_errors(path, ffmpeg);
        return Outcome::FixedTimestamps;
    }

    if !offsets.both_known() {
        return Outcome::AlreadyFaststart;
    }
    if offsets.moov_before_mdat() {
        return Outcome::AlreadyFaststart;
    }

    info!("optimizing for streaming (moov after mdat): {}", path.display());
    if faststart_in_place(path, ffmpeg) {
        info!("done: {}", path.display());
        Outcome::Remuxed
    } else {
        Outcome::RemuxFailed
    }
}

fn wait_for_stable_size(path: &Path) -> bool {
    let deadline = Instant::now() + STABILIZE_TIMEOUT;
    let mut last_size: Option<u64> = None;
    let mut stable_count = 0u32;

    while Instant::now() < deadline {
        let size = match fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => return false,
        };

        if Some(size) == last_size && size > 0 {
            stable_count += 1;
            if stable_count >= 2 {
                return true;
            }
        } else {
            stable_count = 0;
            last_size = Some(size);
        }

        std::thread::sleep(STABILIZE_INTERVAL);
    }

    false
}

fn get_video_codec(path: &Path, ffprobe: &str) -> Option<String> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_lowercase())
}

fn has_extra_data_streams(path: &Path, ffprobe: &str) -> bool {
    let output = match Command::new(ffprobe)
        .args(["-v", "error", "-show_entries", "stream=codec_type", "-of", "csv=p=0"])
        .arg(path)
        .output()
    {
        Ok(o) if o.status.success() => o,
        _ => return false,
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .any(|line| line == "data" || line == "unknown")
}

fn has_timestamp_errors(path: &Path, ffmpeg: &str) -> bool {
    let output = match Command::new(ffmpeg)
        .args(["-v", "error", "-i"])
        .arg(path)
        .args(["-f", "null", "-t", "10", "-"])
        .output()
    {
        Ok(o) => o,
        Err(_) => return false,
    };

    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    TIMESTAMP_ERROR_MARKERS.iter().any(|m| stderr.contains(m))
}

fn sibling_temp(path: &Path, tag: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("mp4");
    path.with_file_name(format!(".{stem}.{tag}.{ext}"))
}

/// Re-encode with explicit stream mapping (first video + optional first
/// audio only), same codec params as the HEVC path. Used for the
/// extra-data-streams and timestamp-error branches.
fn fix_video_errors(path: &Path, ffmpeg: &str) -> bool {
    let tmp = sibling_temp(path, "fixed");
    let mode = match fs::metadata(path) {
        Ok(m) => Some(m),
        Err(_) => None,
    };

    let status = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(path)
        .args([
            "-map", "0:v:0", "-map", "0:a:0?", "-c:v", "libx264", "-preset", "fast", "-crf", "23",
            "-c:a", "aac", "-movflags", "+faststart",
        ])
        .arg(&tmp)
        .status();

    finish_replace(path, &tmp, status, mode, false)
}

fn transcode_full(path: &Path, ffmpeg: &str) -> bool {
    // Same parameters as fix_video_errors; HEVC input needs the decoder
    // to pick the right codec automatically, so no extra mapping flags.
    let tmp = sibling_temp(path, "h264");
    let mode = fs::metadata(path).ok();

    let status = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(path)
        .args([
            "-c:v", "libx264", "-preset", "fast", "-crf", "23", "-c:a", "aac", "-movflags",
            "+faststart",
        ])
        .arg(&tmp)
        .status();

    finish_replace(path, &tmp, status, mode, false)
}

/// Remux with stream-copy and index-first flag. On the remux path the
/// original mode and access/mod times are preserved on the replacement,
/// since stream-copy output is semantically the same file, just
/// reordered — unlike the transcode paths, which produce a genuinely new
/// encode.
fn faststart_in_place(path: &Path, ffmpeg: &str) -> bool {
    let tmp = sibling_temp(path, "faststart");
    let mode = fs::metadata(path).ok();

    let status = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(path)
        .args(["-map", "0", "-c", "copy", "-movflags", "+faststart"])
        .arg(&tmp)
        .status();

    finish_replace(path, &tmp, status, mode, true)
}

fn finish_replace(
    path: &Path,
    tmp: &Path,
    status: std::io::Result<std::process::ExitStatus>,
    original_meta: Option<fs::Metadata>,
    copy_timestamps: bool,
) -> bool {
    let ok = matches!(status, Ok(s) if s.success());
    if !ok {
        let _ = fs::remove_file(tmp);
        warn!("faststart step failed for {}", path.display());
        return false;
    }

    if let Some(meta) = &original_meta {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(tmp, fs::Permissions::from_mode(meta.permissions().mode()));
        }
        if copy_timestamps {
            let atime = filetime::FileTime::from_last_access_time(meta);
            let mtime = filetime::FileTime::from_last_modification_time(meta);
            let _ = filetime::set_file_times(tmp, atime, mtime);
        }
    }

    match fs::rename(tmp, path) {
        Ok(()) => true,
        Err(e) => {
            warn!("failed to replace {}: {e}", path.display());
            let _ = fs::remove_file(tmp);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn skips_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.mp4");
        assert_eq!(process(&missing, "ffmpeg", "ffprobe"), Outcome::SkippedNotAFile);
    }

    #[test]
    fn skips_directories() {
        let dir = TempDir::new().unwrap();
        assert_eq!(process(dir.path(), "ffmpeg", "ffprobe"), Outcome::SkippedNotAFile);
    }
}
