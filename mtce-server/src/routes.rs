//! Axum router wiring HTTP paths from spec §6 to engine calls (spec.md
//! §9 calls this module `mtce-server::routes` in the expanded spec).

use std::sync::Arc;

use axum::routing::get;
use axum::{Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, public};
use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(public::health))
        .route("/api/share/:hash/files", get(public::files))
        .route("/api/share/:hash/file/*path", get(public::file_redirect))
        .route("/api/share/:hash/preview/*path", get(public::preview))
        .route("/api/share/:hash/proxy/*path", get(public::proxy_redirect))
        .route("/api/share/:hash/artifact/:rendition/:filename", get(public::artifact))
        .route(
            "/api/share/:hash/video-sources/*path",
            get(public::video_sources).post(public::video_sources),
        )
        .route("/api/share/:hash/download", get(public::download_zip))
        .route("/api/analytics/config", get(admin::config))
        .route("/api/analytics/shares", get(admin::shares))
        .route("/api/analytics/shares/:hash", get(admin::share_detail))
        .route("/api/analytics/shares/:hash/export.csv", get(admin::export_csv))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
