//! Admin (token-guarded) HTTP surface (spec §6).
//!
//! The admin token is validated indirectly: MTCE holds no credentials of
//! its own, so every admin call forwards the extracted token to the
//! Backend's share-list endpoint and lets it decide (spec §4.H).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{boxed, Body};
use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mtce_core::analytics::{IpLeaderboardEntry, ShareTotals};
use mtce_core::error::MtceError;
use mtce_core::model::DownloadEvent;
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::error_response::ApiError;
use crate::state::AppState;

const MAX_RANGE_DAYS: i64 = 3650;
const DEFAULT_RANGE_DAYS: i64 = 30;

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

async fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<String, ApiError> {
    let token = auth::extract_token(headers, &state.config.admin_token_header).ok_or(MtceError::UpstreamAuth)?;
    state.backend.validate_token(&token).await?;
    Ok(token)
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub days: Option<i64>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

fn resolve_range(q: &RangeQuery) -> (i64, i64) {
    let now = now_unix();
    if q.since.is_some() || q.until.is_some() {
        return (q.since.unwrap_or(0), q.until.unwrap_or(now));
    }
    let days = q.days.unwrap_or(DEFAULT_RANGE_DAYS).clamp(1, MAX_RANGE_DAYS);
    (now - days * 86400, now)
}

pub async fn config(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    require_admin(&headers, &state).await?;
    Ok(Json(&state.config).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SharesQuery {
    #[serde(flatten)]
    pub range: RangeQuery,
    pub include_empty: Option<bool>,
    pub include_deleted: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ShareAggregate {
    pub share_hash: String,
    pub name: Option<String>,
    pub deleted: bool,
    #[serde(flatten)]
    pub totals: ShareTotals,
}

pub async fn shares(
    headers: HeaderMap,
    Query(q): Query<SharesQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let token = require_admin(&headers, &state).await?;
    let (since, until) = resolve_range(&q.range);
    let include_empty = q.include_empty.unwrap_or(false);
    let include_deleted = q.include_deleted.unwrap_or(false);

    // Spec §9: the source stubs this call to an empty list to work around
    // an upstream crash, which silently hides every non-deleted share from
    // the admin view. MTCE calls through to the real Backend endpoint
    // instead of inheriting that bug.
    let live_shares = state.backend.list_shares(&token).await?;
    let live_hashes: HashSet<&str> = live_shares.iter().map(|s| s.share_hash.as_str()).collect();

    let mut out = Vec::new();
    for meta in &live_shares {
        let totals = state.analytics.share_totals(&meta.share_hash, since, until)?;
        let has_activity = totals.gallery_views > 0 || totals.file_downloads > 0 || totals.zip_downloads > 0;
        if !has_activity && !include_empty {
            continue;
        }
        out.push(ShareAggregate {
            share_hash: meta.share_hash.clone(),
            name: meta.name.clone(),
            deleted: false,
            totals,
        });
    }

    if include_deleted {
        for hash in state.analytics.known_share_hashes()? {
            if live_hashes.contains(hash.as_str()) {
                continue;
            }
            let totals = state.analytics.share_totals(&hash, since, until)?;
            out.push(ShareAggregate {
                share_hash: hash,
                name: None,
                deleted: true,
                totals,
            });
        }
    }

    out.sort_by(|a, b| {
        b.totals
            .last_download
            .cmp(&a.totals.last_download)
            .then(b.totals.last_seen.cmp(&a.totals.last_seen))
    });

    Ok(Json(out).into_response())
}

#[derive(Debug, Serialize)]
pub struct ShareDetail {
    pub totals: ShareTotals,
    pub top_ips: Vec<IpLeaderboardEntry>,
    pub recent_events: Vec<DownloadEvent>,
}

pub async fn share_detail(
    headers: HeaderMap,
    Path(share_hash): Path<String>,
    Query(range): Query<RangeQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    require_admin(&headers, &state).await?;
    if !mtce_core::path_safety::is_valid_share_hash(&share_hash) {
        return Err(MtceError::invalid("invalid share hash").into());
    }

    let (since, until) = resolve_range(&range);
    let detail = ShareDetail {
        totals: state.analytics.share_totals(&share_hash, since, until)?,
        top_ips: state.analytics.ip_leaderboard(&share_hash, since, until)?,
        recent_events: state.analytics.recent_events(&share_hash, since, until)?,
    };

    Ok(Json(detail).into_response())
}

pub async fn export_csv(
    headers: HeaderMap,
    Path(share_hash): Path<String>,
    Query(range): Query<RangeQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    require_admin(&headers, &state).await?;
    if !mtce_core::path_safety::is_valid_share_hash(&share_hash) {
        return Err(MtceError::invalid("invalid share hash").into());
    }

    let (since, until) = resolve_range(&range);
    let events = state.analytics.events_in_range(&share_hash, since, until)?;

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(["event_type", "file_path", "ip", "user_agent", "referer", "created_at"])
        .map_err(|e| MtceError::transform(format!("csv write failed: {e}")))?;
    for event in &events {
        writer
            .write_record([
                event.event_type.as_str().to_string(),
                event.file_path.clone().unwrap_or_default(),
                event.ip.clone().unwrap_or_default(),
                event.user_agent.clone().unwrap_or_default(),
                event.referer.clone().unwrap_or_default(),
                event.created_at.to_string(),
            ])
            .map_err(|e| MtceError::transform(format!("csv write failed: {e}")))?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| MtceError::transform(format!("csv flush failed: {e}")))?;

    Ok(axum::http::Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/csv")
        .header(
            "content-disposition",
            format!("attachment; filename=\"share_{share_hash}_events.csv\""),
        )
        .body(boxed(Body::from(body)))
        .unwrap())
}
