//! Media Transform & Cache Engine core library: share listing cache,
//! content-addressed cache, bounded encoder pools, the faststart
//! decision ladder, the transform pipelines built on top of them, and
//! the download-event analytics store. See `mtce-server` for the HTTP
//! surface and `mtce-faststart` for the offline post-processor binary.

pub mod analytics;
pub mod atom;
pub mod backend;
pub mod cache;
pub mod config;
pub mod encoder;
pub mod error;
pub mod faststart;
pub mod listing;
pub mod model;
pub mod path_safety;
pub mod transform;

pub use crate::config::Config;
pub use crate::error::{MtceError, Result};
