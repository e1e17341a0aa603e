pub mod admin;
pub mod public;

use std::net::SocketAddr;

use http::HeaderMap;
use mtce_core::model::EventType;

use crate::ip;
use crate::state::AppState;

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Record one counted event (spec §3 invariant 3 / §4.H): never fails
/// the caller's request, regardless of what happens inside the store.
pub fn record_event(
    state: &AppState,
    share_hash: &str,
    event_type: EventType,
    file_path: Option<&str>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) {
    let enabled = match event_type {
        EventType::GalleryView => state.config.analytics.enable_gallery_view,
        EventType::FileDownload => state.config.analytics.enable_file_download,
        EventType::ZipDownload => state.config.analytics.enable_zip_download,
    };
    if !enabled {
        return;
    }

    let resolved_ip = ip::resolve(headers, peer);
    let ip_string = ip::apply_mode(resolved_ip, state.config.analytics.ip_mode);
    let user_agent = header_str(headers, "user-agent");
    let referer = header_str(headers, "referer");

    state.analytics.record(
        share_hash,
        event_type,
        file_path,
        ip_string.as_deref(),
        state.config.analytics.ip_mode,
        user_agent.as_deref(),
        referer.as_deref(),
    );
    state.analytics.maybe_sweep_retention();
}
