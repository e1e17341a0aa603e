//! Content-Addressed Cache (spec §4.D).
//!
//! Maps a cache key (kind, profile version, tuning params, share, path,
//! source size) to an on-disk artifact, with cross-process single-flight
//! via a per-key advisory file lock and atomic publish-by-rename.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use sha2::{Digest, Sha256};

use crate::error::{MtceError, Result};

/// Pure function of its inputs — §8 property 2 (key stability). Callers
/// build the key string from whatever fields are relevant to their
/// rendition (kind, profile version, tuning params, share, path, size)
/// and pass it here to get the on-disk-safe hashed form.
pub fn hash_key(key_string: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key_string.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct Cache {
    dir: PathBuf,
}

/// Builder callback: write the artifact to `tmp_path`. Returning `Err`
/// aborts publication; the cache deletes the temp file for you.
pub trait Builder {
    fn build(&self, tmp_path: &Path) -> Result<()>;
}

impl<F> Builder for F
where
    F: Fn(&Path) -> Result<()>,
{
    fn build(&self, tmp_path: &Path) -> Result<()> {
        self(tmp_path)
    }
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Cache> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Cache { dir })
    }

    fn final_path(&self, key: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ext}"))
    }

    /// Single-flight fetch-or-build for a given hashed `key` + file
    /// extension. `builder` is invoked at most once across all processes
    /// racing on this key (barring a crash mid-build, which simply leaves
    /// the lock for the next caller to re-acquire and rebuild).
    pub fn fetch_or_build(&self, key: &str, ext: &str, builder: &dyn Builder) -> Result<PathBuf> {
        let final_path = self.final_path(key, ext);

        // Fast path: already published.
        if final_path.is_file() {
            return Ok(final_path);
        }

        let lock_path = self.dir.join(format!("{key}.{ext}.lock"));
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock_file.lock_exclusive()?;

        // Re-check: another process may have completed while we waited.
        let result = (|| -> Result<PathBuf> {
            if final_path.is_file() {
                return Ok(final_path.clone());
            }

            let tmp_path = self.dir.join(format!("{key}.{ext}.tmp"));
            let _ = fs::remove_file(&tmp_path);

            match builder.build(&tmp_path) {
                Ok(()) => {
                    fs::rename(&tmp_path, &final_path)?;
                    Ok(final_path.clone())
                }
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path);
                    Err(e)
                }
            }
        })();

        // unlock is best-effort; the fd closes on drop regardless.
        let _ = lock_file.unlock();
        result
    }

    /// Returns the final path for a key without building it, for
    /// readiness checks (video-sources negotiation uses this).
    pub fn lookup(&self, key: &str, ext: &str) -> Option<(PathBuf, u64)> {
        let path = self.final_path(key, ext);
        let meta = fs::metadata(&path).ok()?;
        Some((path, meta.len()))
    }
}

/// Poll-with-backoff wrapper for lock acquisition when a caller wants a
/// bounded wait instead of blocking indefinitely (used by the analytics
/// store's schema-init path, which retries rather than blocking forever).
pub fn try_lock_with_backoff(file: &fs::File, attempts: u32, base_delay: Duration) -> Result<()> {
    for attempt in 0..attempts {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(_) if attempt + 1 < attempts => {
                std::thread::sleep(base_delay * (attempt + 1));
            }
            Err(e) => return Err(MtceError::Io(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn key_is_stable_and_size_sensitive() {
        let a = hash_key("thumb:1:share:path:100");
        let b = hash_key("thumb:1:share:path:100");
        let c = hash_key("thumb:1:share:path:101");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fetch_or_build_publishes_atomically() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let key = hash_key("k");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let builder = move |tmp: &Path| -> Result<()> {
            calls2.fetch_add(1, Ordering::SeqCst);
            fs::write(tmp, b"hello").map_err(MtceError::from)
        };

        let path = cache.fetch_or_build(&key, "jpg", &builder).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second call is a fast-path hit; builder not invoked again.
        let path2 = cache.fetch_or_build(&key, "jpg", &builder).unwrap();
        assert_eq!(path, path2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_build_leaves_no_final_file_and_cleans_tmp() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let key = hash_key("k2");

        let builder = |tmp: &Path| -> Result<()> {
            fs::write(tmp, b"partial").unwrap();
            Err(MtceError::transform("encoder exploded"))
        };

        let result = cache.fetch_or_build(&key, "mp4", &builder);
        assert!(result.is_err());
        assert!(cache.lookup(&key, "mp4").is_none());
        assert!(!dir.path().join(format!("{key}.mp4.tmp")).exists());
    }

    #[test]
    fn concurrent_builders_collapse_to_one() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(Cache::new(dir.path()).unwrap());
        let key = hash_key("concurrent");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            let key = key.clone();
            handles.push(std::thread::spawn(move || {
                let builder = move |tmp: &Path| -> Result<()> {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    fs::write(tmp, b"built-once")
                };
                cache.fetch_or_build(&key, "jpg", &builder).unwrap()
            }));
        }

        let paths: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
