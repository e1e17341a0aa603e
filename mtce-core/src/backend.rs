//! Thin async client for the Backend's public listing, download and
//! auth-validation endpoints. The Backend itself (its storage, its own
//! auth semantics) is an external collaborator per spec §1/§9 — this
//! module only models the shape of the calls MTCE makes into it.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{MtceError, Result};

/// One entry in a Backend directory listing (either the root of a share,
/// or a sub-folder reached while flattening it).
#[derive(Debug, Clone, Deserialize)]
pub struct BackendItem {
    pub name: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    /// Backend's own type label, if any ("image"/"video"/other).
    #[serde(default)]
    pub kind: Option<String>,
}

/// Response shape for a Backend listing call. A folder share advertises
/// `items`; a single-file share omits it and is described by the root
/// fields themselves.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendListing {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub kind: Option<String>,
    pub items: Option<Vec<BackendItem>>,
}

/// One entry in the Backend's share-list response, used by the admin
/// aggregate endpoint to distinguish still-live shares from ones that
/// only survive in the analytics log.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendShareMeta {
    pub share_hash: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<BackendClient> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MtceError::UpstreamTransient(format!("client build failed: {e}")))?;
        Ok(BackendClient {
            http,
            base_url: base_url.into(),
        })
    }

    /// Fetch the listing for `share` at `sub_path` (empty for the share
    /// root). 404 becomes `UpstreamNotFound`; anything else non-2xx
    /// becomes `UpstreamTransient`.
    pub async fn list(&self, share: &str, sub_path: &str) -> Result<BackendListing> {
        let url = format!(
            "{}/api/public/share/{}/{}",
            self.base_url,
            share,
            urlencoding::encode(sub_path)
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MtceError::UpstreamTransient(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MtceError::UpstreamNotFound);
        }
        if !resp.status().is_success() {
            return Err(MtceError::UpstreamTransient(format!(
                "backend listing returned {}",
                resp.status()
            )));
        }

        resp.json::<BackendListing>()
            .await
            .map_err(|e| MtceError::UpstreamTransient(format!("bad listing body: {e}")))
    }

    /// Build the inline-download URL for a file inside a folder share.
    pub fn dl_url(&self, share: &str, path: &str, inline: bool) -> String {
        let flag = if inline { "inline=true" } else { "download=1" };
        format!(
            "/api/public/dl/{}/{}?{}",
            share,
            urlencoding::encode(path),
            flag
        )
    }

    /// Build the inline-download URL for a single-file share.
    pub fn dl_url_single_file(&self, share: &str, inline: bool) -> String {
        let flag = if inline { "inline=true" } else { "download=1" };
        format!("/api/public/file/{share}?{flag}")
    }

    /// Full upstream URL for the raw bytes of one file inside a folder
    /// share, suitable as an encoder's `-i` input — ffmpeg's HTTP demuxer
    /// reads it directly, so MTCE never stages a local copy of the source.
    pub fn source_url(&self, share: &str, path: &str) -> String {
        format!(
            "{}/api/public/dl/{}/{}?download=1",
            self.base_url,
            share,
            urlencoding::encode(path)
        )
    }

    /// Full upstream URL for the raw bytes of a single-file share.
    pub fn source_url_single_file(&self, share: &str) -> String {
        format!("{}/api/public/file/{}?download=1", self.base_url, share)
    }

    /// Validate an operator auth token against the Backend by issuing an
    /// authenticated listing call for the special admin-shares endpoint.
    /// A 401/403 becomes `UpstreamAuth`; anything else non-2xx becomes
    /// `UpstreamTransient`.
    pub async fn validate_token(&self, token: &str) -> Result<()> {
        self.list_shares(token).await.map(|_| ())
    }

    /// List the shares the Backend currently knows about, for the admin
    /// "shares" aggregate to merge against the analytics log (spec §6:
    /// shares absent from this list but present in the log are reported
    /// `deleted:true`). Spec §9 flags the source's version of this call
    /// as a stubbed-to-empty workaround for an upstream crash; MTCE calls
    /// through to the real endpoint rather than inheriting that stub.
    pub async fn list_shares(&self, token: &str) -> Result<Vec<BackendShareMeta>> {
        let url = format!("{}/api/public/share-list", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| MtceError::UpstreamTransient(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => resp
                .json::<Vec<BackendShareMeta>>()
                .await
                .map_err(|e| MtceError::UpstreamTransient(format!("bad share-list body: {e}"))),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(MtceError::UpstreamAuth)
            }
            s => Err(MtceError::UpstreamTransient(format!(
                "share-list returned {s}"
            ))),
        }
    }

    /// Stream the Backend's ZIP download for a whole share. Returns the
    /// upstream response so the caller can pass through headers/body.
    pub async fn download_zip(&self, share: &str) -> Result<reqwest::Response> {
        let url = format!("{}/api/public/dl/{}?download=1", self.base_url, share);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MtceError::UpstreamTransient(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MtceError::UpstreamNotFound);
        }
        if !resp.status().is_success() {
            return Err(MtceError::UpstreamTransient(format!(
                "backend zip download returned {}",
                resp.status()
            )));
        }
        Ok(resp)
    }
}
