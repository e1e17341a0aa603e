//! Bounded Encoder Runner (spec §4.C).
//!
//! Wraps subprocess invocations (`ffmpeg`/`ffprobe`) in a named, bounded
//! `tokio::sync::Semaphore` so that at most N encoder children run at
//! once per pool, with a hard wall-clock timeout per invocation. The
//! token is released on every exit path because it's held by an RAII
//! guard (`OwnedSemaphorePermit`), not acquired/released by hand.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::error::{MtceError, Result};

/// Result of one bounded subprocess invocation.
#[derive(Debug)]
pub struct EncoderOutput {
    pub success: bool,
    pub stderr: Vec<u8>,
}

impl EncoderOutput {
    /// stderr decoded with replacement, for logging/diagnostics.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A named bounded pool of encoder slots (thumbnail / fast-proxy / HD-proxy).
#[derive(Clone)]
pub struct EncoderPool {
    name: &'static str,
    semaphore: Arc<Semaphore>,
}

impl EncoderPool {
    pub fn new(name: &'static str, concurrency: usize) -> EncoderPool {
        EncoderPool {
            name,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Run `cmd` (already populated with args) under this pool's bound,
    /// enforcing `timeout`. Blocks on semaphore acquisition first — that
    /// wait is part of the caller's overall request budget, per spec §5.
    pub async fn run(&self, cmd: Command, timeout_duration: Duration) -> Result<EncoderOutput> {
        let permit = self.acquire().await?;
        self.run_with_permit(&permit, cmd, timeout_duration).await
    }

    /// Acquire one slot in this pool without running anything yet. Lets a
    /// caller hold a single slot across several sequential attempts (the
    /// HD-proxy fallback ladder, spec §4.F.3) instead of letting each
    /// attempt acquire and release its own permit, which would let
    /// another request's attempt interleave between them.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| MtceError::transform(format!("{} pool closed: {e}", self.name)))
    }

    /// Run `cmd` using a slot already held by `permit`. The permit is
    /// borrowed, not consumed, so the same one can back multiple calls.
    pub async fn run_with_permit(
        &self,
        _permit: &OwnedSemaphorePermit,
        mut cmd: Command,
        timeout_duration: Duration,
    ) -> Result<EncoderOutput> {
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let run = async {
            let output = cmd
                .output()
                .await
                .map_err(|e| MtceError::transform(format!("{} spawn failed: {e}", self.name)))?;
            Ok::<_, MtceError>(EncoderOutput {
                success: output.status.success(),
                stderr: output.stderr,
            })
        };

        match timeout(timeout_duration, run).await {
            Ok(inner) => inner,
            Err(_) => Err(MtceError::timeout(format!(
                "{} invocation exceeded {:?}",
                self.name, timeout_duration
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    fn script(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn pool_bounds_concurrency() {
        let dir = TempDir::new().unwrap();
        let sleeper = script(&dir, "sleeper.sh", "#!/usr/bin/env sh\nsleep 0.2\nexit 0\n");

        let pool = Arc::new(EncoderPool::new("test", 1));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let pool = pool.clone();
            let sleeper = sleeper.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            handles.push(tokio::spawn(async move {
                let cmd = Command::new(&sleeper);
                let before = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(before, Ordering::SeqCst);
                let result = pool.run(cmd, StdDuration::from_secs(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                result
            }));
        }

        for h in handles {
            let out = h.await.unwrap().unwrap();
            assert!(out.success);
        }
    }

    #[tokio::test]
    async fn timeout_is_distinguishable_from_failure() {
        let dir = TempDir::new().unwrap();
        let hang = script(&dir, "hang.sh", "#!/usr/bin/env sh\nsleep 5\nexit 0\n");
        let pool = EncoderPool::new("test", 1);

        let cmd = Command::new(&hang);
        let result = pool.run(cmd, StdDuration::from_millis(100)).await;
        assert!(matches!(result, Err(MtceError::Timeout(_))));
    }

    #[tokio::test]
    async fn held_permit_blocks_other_acquirers_across_multiple_runs() {
        let dir = TempDir::new().unwrap();
        let quick = script(&dir, "quick.sh", "#!/usr/bin/env sh\nexit 0\n");
        let pool = Arc::new(EncoderPool::new("test", 1));

        let permit = pool.acquire().await.unwrap();
        let cmd = Command::new(&quick);
        let out = pool.run_with_permit(&permit, cmd, StdDuration::from_secs(5)).await.unwrap();
        assert!(out.success);

        // The permit from the first acquire is still held: a concurrent
        // acquire on this single-slot pool must not resolve yet.
        let other = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(!other.is_finished());

        // A second run under the same held permit still succeeds.
        let cmd = Command::new(&quick);
        let out = pool.run_with_permit(&permit, cmd, StdDuration::from_secs(5)).await.unwrap();
        assert!(out.success);

        drop(permit);
        other.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_errored() {
        let dir = TempDir::new().unwrap();
        let fail = script(&dir, "fail.sh", "#!/usr/bin/env sh\necho boom 1>&2\nexit 1\n");
        let pool = EncoderPool::new("test", 1);

        let cmd = Command::new(&fail);
        let out = pool.run(cmd, StdDuration::from_secs(5)).await.unwrap();
        assert!(!out.success);
        assert!(out.stderr_lossy().contains("boom"));
    }
}
