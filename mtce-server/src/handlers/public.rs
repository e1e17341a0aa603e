//! Public (unauthenticated) HTTP surface (spec §6).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{boxed, Body};
use axum::extract::{ConnectInfo, Extension, Path, Query};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use futures::TryStreamExt;
use mtce_core::error::MtceError;
use mtce_core::model::{extension_of, EventType};
use mtce_core::transform::{fast_proxy, hd_proxy, sources, thumbnail};
use serde::Deserialize;
use serde_json::json;

use crate::error_response::ApiError;
use crate::handlers::record_event;
use crate::state::AppState;

fn require_valid(share: &str, path: Option<&str>) -> Result<(), ApiError> {
    if !mtce_core::path_safety::is_valid_share_hash(share) {
        return Err(MtceError::invalid("invalid share hash").into());
    }
    if let Some(p) = path {
        if !mtce_core::path_safety::is_valid_relative_path(p) {
            return Err(MtceError::invalid("invalid path").into());
        }
    }
    Ok(())
}

fn bytes_response(status: StatusCode, content_type: &'static str, bytes: Vec<u8>) -> Response {
    axum::http::Response::builder()
        .status(status)
        .header("content-type", content_type)
        .body(boxed(Body::from(bytes)))
        .unwrap()
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub refresh: Option<String>,
    pub max_age: Option<u64>,
}

pub async fn files(
    Path(share): Path<String>,
    Query(q): Query<FilesQuery>,
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Response, ApiError> {
    require_valid(&share, None)?;

    let force_refresh = matches!(q.refresh.as_deref(), Some("1") | Some("true"));
    let opts = mtce_core::listing::ListingOptions {
        force_refresh,
        max_age: q.max_age.map(std::time::Duration::from_secs),
    };

    let listing = state
        .listing
        .get_listing(&share, opts)
        .await?
        .ok_or(MtceError::UpstreamNotFound)?;

    record_event(&state, &share, EventType::GalleryView, None, &headers, Some(peer));

    let mut response = Json(listing).into_response();
    response
        .headers_mut()
        .insert("cache-control", "no-store".parse().unwrap());
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub download: Option<String>,
}

pub async fn file_redirect(
    Path((share, path)): Path<(String, String)>,
    Query(q): Query<FileQuery>,
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Response, ApiError> {
    require_valid(&share, Some(&path))?;

    let is_download = matches!(q.download.as_deref(), Some("1") | Some("true"));
    let url = state.backend.dl_url(&share, &path, !is_download);

    if is_download {
        record_event(
            &state,
            &share,
            EventType::FileDownload,
            Some(&path),
            &headers,
            Some(peer),
        );
    }

    Ok(Redirect::to(&url).into_response())
}

pub async fn preview(
    Path((share, path)): Path<(String, String)>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    require_valid(&share, Some(&path))?;
    let extension = extension_of(&path);

    let artifact = thumbnail::ensure(&state.transforms, &share, &path, &extension).await?;
    let bytes = tokio::fs::read(&artifact).await.map_err(MtceError::from)?;

    Ok(bytes_response(StatusCode::OK, "image/jpeg", bytes))
}

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub rendition: Option<String>,
}

pub async fn proxy_redirect(
    Path((share, path)): Path<(String, String)>,
    Query(q): Query<ProxyQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    require_valid(&share, Some(&path))?;
    if !mtce_core::model::is_video_extension(&extension_of(&path)) {
        return Err(MtceError::unsupported_media(format!(
            "unsupported extension for proxy: {}",
            extension_of(&path)
        ))
        .into());
    }

    let file = state.resolve_file(&share, &path).await?;
    let rendition = q.rendition.as_deref().unwrap_or("fast");

    let (key, ext) = match rendition {
        "hd" => {
            hd_proxy::ensure(&state.transforms, &share, &path, file.size).await?;
            (hd_proxy::cache_key(state.config.profile_version, &state.config.hd, &share, &path, file.size), "mp4")
        }
        _ => {
            fast_proxy::ensure(&state.transforms, &share, &path, file.size).await?;
            (
                fast_proxy::cache_key(state.config.profile_version, &state.config.proxy, &share, &path, file.size),
                "mp4",
            )
        }
    };

    let url = format!("/api/share/{share}/artifact/{rendition}/{key}.{ext}");
    Ok(Redirect::to(&url).into_response())
}

pub async fn artifact(
    Path((_share, _rendition, filename)): Path<(String, String, String)>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let key = filename.strip_suffix(".mp4").unwrap_or(&filename);
    let (path, _size) = state
        .transforms
        .cache
        .lookup(key, "mp4")
        .ok_or(MtceError::UpstreamNotFound)?;
    let bytes = tokio::fs::read(&path).await.map_err(MtceError::from)?;

    Ok(bytes_response(StatusCode::OK, "video/mp4", bytes))
}

#[derive(Debug, Default, Deserialize)]
pub struct PrepareQuery {
    pub target: Option<String>,
    pub targets: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrepareBody {
    pub target: Option<String>,
    pub targets: Option<Vec<String>>,
}

fn merge_targets(query: PrepareQuery, body: Option<PrepareBody>) -> Vec<String> {
    let mut out = Vec::new();
    let mut push = |v: Option<String>| {
        if let Some(v) = v {
            let v = v.trim();
            if !v.is_empty() && !out.contains(&v.to_string()) {
                out.push(v.to_string());
            }
        }
    };

    push(query.target);
    if let Some(targets) = query.targets {
        for t in targets.split(',') {
            push(Some(t.to_string()));
        }
    }
    if let Some(body) = body {
        push(body.target);
        if let Some(targets) = body.targets {
            for t in targets {
                push(Some(t));
            }
        }
    }
    out
}

pub async fn video_sources(
    Path((share, path)): Path<(String, String)>,
    method: Method,
    Query(q): Query<PrepareQuery>,
    body: Option<Json<PrepareBody>>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    require_valid(&share, Some(&path))?;

    let file = state.resolve_file(&share, &path).await?;
    let is_mutating = method != Method::GET;
    let requested = merge_targets(q, body.map(|Json(b)| b));

    let original_url = state.backend.dl_url(&share, &path, true);
    let response = sources::negotiate(
        &state.transforms,
        &share,
        &path,
        file.size,
        original_url,
        requested,
        is_mutating,
    );

    Ok(Json(response).into_response())
}

pub async fn download_zip(
    Path(share): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Response, ApiError> {
    require_valid(&share, None)?;

    let upstream = state.backend.download_zip(&share).await?;

    let content_disposition = upstream
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("attachment; filename=\"share_{share}.zip\""));

    record_event(&state, &share, EventType::ZipDownload, None, &headers, Some(peer));

    let stream = upstream
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let body = axum::body::StreamBody::new(stream);

    Ok(axum::http::Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/zip")
        .header("content-disposition", content_disposition)
        .body(axum::body::boxed(body))
        .unwrap())
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}
