//! Crate-wide error taxonomy (spec §7).
//!
//! Each variant maps to exactly one of the seven error classes the edge
//! service distinguishes. `mtce-server` turns these into HTTP status codes;
//! nothing in this crate talks HTTP directly.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum MtceError {
    /// Bad share hash or bad path. Never logged.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Extension isn't one of the recognized image/video sets (spec §7
    /// entry 1 distinguishes this from other invalid input: it maps to
    /// 415, not 400).
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// The Backend reported the resource does not exist.
    #[error("not found")]
    UpstreamNotFound,

    /// The Backend rejected our credentials (401/403).
    #[error("unauthorized")]
    UpstreamAuth,

    /// The Backend call failed for a reason other than not-found/auth.
    #[error("upstream error: {0}")]
    UpstreamTransient(String),

    /// A subprocess or lock wait exceeded its wall-clock budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A local transform (encode/remux/scan) failed outright.
    #[error("transform failed: {0}")]
    TransformFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Swallowed by callers per spec §3 invariant 3 / §7 entry 7; kept as
    /// a distinct variant so call sites can match on it explicitly rather
    /// than stringly-typed logging.
    #[error("analytics error: {0}")]
    Analytics(String),
}

impl MtceError {
    pub fn invalid(msg: impl fmt::Display) -> Self {
        MtceError::InvalidInput(msg.to_string())
    }

    pub fn unsupported_media(msg: impl fmt::Display) -> Self {
        MtceError::UnsupportedMedia(msg.to_string())
    }

    pub fn transform(msg: impl fmt::Display) -> Self {
        MtceError::TransformFailed(msg.to_string())
    }

    pub fn timeout(msg: impl fmt::Display) -> Self {
        MtceError::Timeout(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MtceError>;
