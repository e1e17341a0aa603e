//! Event Analytics Store (spec §4.G).
//!
//! Embedded `rusqlite` database in WAL mode. Schema init is guarded by a
//! cross-process advisory file lock (retried with backoff on transient
//! "locked" errors); once a worker has initialized successfully it never
//! re-checks. Insertion failures are logged and swallowed — this is one
//! of the three places spec §9 explicitly allows that.

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{error, warn};
use rusqlite::{params, Connection};

use crate::cache::try_lock_with_backoff;
use crate::config::IpMode;
use crate::error::{MtceError, Result};
use crate::model::{DownloadEvent, EventType};

const INIT_RETRY_ATTEMPTS: u32 = 10;
const INIT_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
const INSERT_RETRY_ATTEMPTS: u32 = 3;
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Store {
    conn: Mutex<Connection>,
    retention_days: i64,
    last_sweep: Mutex<Option<std::time::Instant>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ShareTotals {
    pub share_hash: String,
    pub gallery_views: i64,
    pub file_downloads: i64,
    pub zip_downloads: i64,
    pub distinct_download_ips: i64,
    pub last_seen: Option<i64>,
    pub last_download: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IpLeaderboardEntry {
    pub ip: String,
    pub downloads: i64,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl Store {
    /// Open (creating if needed) the analytics database at `db_path`,
    /// creating the schema under a cross-process file lock if this is
    /// the first worker to reach it. Once schema init succeeds here it
    /// never blocks again for the lifetime of this `Store`.
    pub fn open(db_path: impl AsRef<Path>, retention_days: i64) -> Result<Store> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = db_path.with_extension("db.init.lock");
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        try_lock_with_backoff(&lock_file, INIT_RETRY_ATTEMPTS, INIT_RETRY_BASE_DELAY)?;

        let conn = Connection::open(db_path)
            .map_err(|e| MtceError::Analytics(format!("open failed: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| MtceError::Analytics(format!("WAL mode failed: {e}")))?;
        init_schema(&conn)?;

        use fs2::FileExt;
        let _ = lock_file.unlock();

        Ok(Store {
            conn: Mutex::new(conn),
            retention_days,
            last_sweep: Mutex::new(None),
        })
    }

    /// Insert one counted event. Retried up to 3 times on transient lock
    /// errors; any remaining failure is logged at warning and swallowed —
    /// recording an event never fails the user-facing request (spec §3
    /// invariant 3).
    pub fn record(
        &self,
        share_hash: &str,
        event_type: EventType,
        file_path: Option<&str>,
        ip: Option<&str>,
        ip_mode: IpMode,
        user_agent: Option<&str>,
        referer: Option<&str>,
    ) {
        let ip = match ip_mode {
            IpMode::Off => None,
            _ => ip.map(str::to_string),
        };

        let created_at = now_unix();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.try_insert(
                share_hash,
                event_type,
                file_path,
                ip.as_deref(),
                user_agent,
                referer,
                created_at,
            );
            match result {
                Ok(()) => return,
                Err(e) if attempt < INSERT_RETRY_ATTEMPTS => {
                    warn!("analytics insert attempt {attempt} failed: {e}; retrying");
                }
                Err(e) => {
                    error!("analytics insert failed after {attempt} attempts: {e}");
                    return;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_insert(
        &self,
        share_hash: &str,
        event_type: EventType,
        file_path: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
        referer: Option<&str>,
        created_at: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO download_events
                (share_hash, event_type, file_path, ip, user_agent, referer, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                share_hash,
                event_type.as_str(),
                file_path,
                ip,
                user_agent,
                referer,
                created_at
            ],
        )
        .map_err(|e| MtceError::Analytics(e.to_string()))?;
        Ok(())
    }

    /// Delete rows older than `retention_days`. A no-op if retention is
    /// disabled (<=0) or the last sweep was under an hour ago.
    pub fn maybe_sweep_retention(&self) {
        if self.retention_days <= 0 {
            return;
        }

        {
            let mut last = self.last_sweep.lock().unwrap();
            if let Some(t) = *last {
                if t.elapsed() < RETENTION_SWEEP_INTERVAL {
                    return;
                }
            }
            *last = Some(std::time::Instant::now());
        }

        let cutoff = now_unix() - self.retention_days * 86400;
        let conn = self.conn.lock().unwrap();
        match conn.execute("DELETE FROM download_events WHERE created_at < ?1", params![cutoff]) {
            Ok(deleted) if deleted > 0 => {
                log::info!("retention sweep deleted {deleted} events older than {cutoff}");
            }
            Ok(_) => {}
            Err(e) => error!("retention sweep failed: {e}"),
        }
    }

    /// Per-share totals over `[since, until)`, split by event type.
    pub fn share_totals(&self, share_hash: &str, since: i64, until: i64) -> Result<ShareTotals> {
        let conn = self.conn.lock().unwrap();
        let mut totals = ShareTotals {
            share_hash: share_hash.to_string(),
            gallery_views: 0,
            file_downloads: 0,
            zip_downloads: 0,
            distinct_download_ips: 0,
            last_seen: None,
            last_download: None,
        };

        let mut stmt = conn
            .prepare(
                "SELECT event_type, COUNT(*), MAX(created_at)
                 FROM download_events
                 WHERE share_hash = ?1 AND created_at >= ?2 AND created_at < ?3
                 GROUP BY event_type",
            )
            .map_err(|e| MtceError::Analytics(e.to_string()))?;
        let rows = stmt
            .query_map(params![share_hash, since, until], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, Option<i64>>(2)?))
            })
            .map_err(|e| MtceError::Analytics(e.to_string()))?;

        for row in rows {
            let (event_type, count, max_created) = row.map_err(|e| MtceError::Analytics(e.to_string()))?;
            totals.last_seen = max(totals.last_seen, max_created);
            match event_type.parse::<EventType>() {
                Ok(EventType::GalleryView) => totals.gallery_views = count,
                Ok(EventType::FileDownload) => {
                    totals.file_downloads = count;
                    totals.last_download = max(totals.last_download, max_created);
                }
                Ok(EventType::ZipDownload) => {
                    totals.zip_downloads = count;
                    totals.last_download = max(totals.last_download, max_created);
                }
                Err(()) => {}
            }
        }

        totals.distinct_download_ips = conn
            .query_row(
                "SELECT COUNT(DISTINCT ip) FROM download_events
                 WHERE share_hash = ?1 AND created_at >= ?2 AND created_at < ?3
                   AND ip IS NOT NULL
                   AND event_type IN ('file_download', 'zip_download')",
                params![share_hash, since, until],
                |row| row.get(0),
            )
            .map_err(|e| MtceError::Analytics(e.to_string()))?;

        Ok(totals)
    }

    /// Top-200 IPs by total downloads for one share.
    pub fn ip_leaderboard(&self, share_hash: &str, since: i64, until: i64) -> Result<Vec<IpLeaderboardEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT ip, COUNT(*) AS downloads FROM download_events
                 WHERE share_hash = ?1 AND created_at >= ?2 AND created_at < ?3
                   AND ip IS NOT NULL
                   AND event_type IN ('file_download', 'zip_download')
                 GROUP BY ip
                 ORDER BY downloads DESC
                 LIMIT 200",
            )
            .map_err(|e| MtceError::Analytics(e.to_string()))?;
        let rows = stmt
            .query_map(params![share_hash, since, until], |row| {
                Ok(IpLeaderboardEntry {
                    ip: row.get(0)?,
                    downloads: row.get(1)?,
                })
            })
            .map_err(|e| MtceError::Analytics(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MtceError::Analytics(e.to_string()))
    }

    /// Top-200 most recent events for one share.
    pub fn recent_events(&self, share_hash: &str, since: i64, until: i64) -> Result<Vec<DownloadEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, share_hash, event_type, file_path, ip, user_agent, referer, created_at
                 FROM download_events
                 WHERE share_hash = ?1 AND created_at >= ?2 AND created_at < ?3
                 ORDER BY created_at DESC
                 LIMIT 200",
            )
            .map_err(|e| MtceError::Analytics(e.to_string()))?;
        let rows = stmt
            .query_map(params![share_hash, since, until], row_to_event)
            .map_err(|e| MtceError::Analytics(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MtceError::Analytics(e.to_string()))
    }

    /// All events in range, for CSV export — same query shape as
    /// `recent_events` but unbounded (the HTTP layer streams these out).
    pub fn events_in_range(&self, share_hash: &str, since: i64, until: i64) -> Result<Vec<DownloadEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, share_hash, event_type, file_path, ip, user_agent, referer, created_at
                 FROM download_events
                 WHERE share_hash = ?1 AND created_at >= ?2 AND created_at < ?3
                 ORDER BY created_at ASC",
            )
            .map_err(|e| MtceError::Analytics(e.to_string()))?;
        let rows = stmt
            .query_map(params![share_hash, since, until], row_to_event)
            .map_err(|e| MtceError::Analytics(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MtceError::Analytics(e.to_string()))
    }

    /// Distinct share hashes that have any event at all, for the admin
    /// "shares" listing to merge against the Backend's live share list.
    pub fn known_share_hashes(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT share_hash FROM download_events")
            .map_err(|e| MtceError::Analytics(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| MtceError::Analytics(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MtceError::Analytics(e.to_string()))
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<DownloadEvent> {
    let event_type: String = row.get(2)?;
    Ok(DownloadEvent {
        id: row.get(0)?,
        share_hash: row.get(1)?,
        event_type: event_type.parse().unwrap_or(EventType::GalleryView),
        file_path: row.get(3)?,
        ip: row.get(4)?,
        user_agent: row.get(5)?,
        referer: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn max(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS download_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            share_hash  TEXT NOT NULL,
            event_type  TEXT NOT NULL,
            file_path   TEXT,
            ip          TEXT,
            user_agent  TEXT,
            referer     TEXT,
            created_at  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_share_created
            ON download_events (share_hash, created_at);
        CREATE INDEX IF NOT EXISTS idx_events_created
            ON download_events (created_at);
        CREATE INDEX IF NOT EXISTS idx_events_ip
            ON download_events (ip);",
    )
    .map_err(|e| MtceError::Analytics(format!("schema init failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir, retention_days: i64) -> Store {
        Store::open(dir.path().join("analytics.db"), retention_days).unwrap()
    }

    #[test]
    fn records_and_aggregates_events() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 0);

        store.record("abc", EventType::GalleryView, None, Some("1.2.3.4"), IpMode::Full, None, None);
        store.record(
            "abc",
            EventType::FileDownload,
            Some("a/b.jpg"),
            Some("1.2.3.4"),
            IpMode::Full,
            None,
            None,
        );
        store.record(
            "abc",
            EventType::FileDownload,
            Some("a/c.jpg"),
            Some("5.6.7.8"),
            IpMode::Full,
            None,
            None,
        );

        let totals = store.share_totals("abc", 0, now_unix() + 10).unwrap();
        assert_eq!(totals.gallery_views, 1);
        assert_eq!(totals.file_downloads, 2);
        assert_eq!(totals.distinct_download_ips, 2);

        let leaderboard = store.ip_leaderboard("abc", 0, now_unix() + 10).unwrap();
        assert_eq!(leaderboard.len(), 2);
    }

    #[test]
    fn ip_mode_off_stores_no_ip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 0);
        store.record("s", EventType::FileDownload, Some("p"), Some("9.9.9.9"), IpMode::Off, None, None);

        let events = store.events_in_range("s", 0, now_unix() + 10).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].ip.is_none());
    }

    #[test]
    fn retention_sweep_deletes_old_rows() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 30);

        let conn = store.conn.lock().unwrap();
        let old_ts = now_unix() - 90 * 86400;
        conn.execute(
            "INSERT INTO download_events (share_hash, event_type, created_at) VALUES ('s', 'gallery_view', ?1)",
            params![old_ts],
        )
        .unwrap();
        drop(conn);

        // Force the sweep to run regardless of the hourly cooldown.
        *store.last_sweep.lock().unwrap() = None;
        store.maybe_sweep_retention();

        let events = store.events_in_range("s", 0, now_unix() + 10).unwrap();
        assert!(events.iter().all(|e| e.created_at >= now_unix() - 30 * 86400));
    }
}
