//! Effective runtime configuration, read once at process startup from
//! environment variables. See `SPEC_FULL.md` §6 for the full variable
//! table and defaults.

use std::env;
use std::time::Duration;

use serde::Serialize;

use crate::error::{MtceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IpMode {
    Full,
    Anonymized,
    Off,
}

impl std::str::FromStr for IpMode {
    type Err = MtceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(IpMode::Full),
            "anonymized" => Ok(IpMode::Anonymized),
            "off" => Ok(IpMode::Off),
            other => Err(MtceError::invalid(format!("invalid MTCE_ANALYTICS_IP_MODE: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    pub dir: String,
    pub ttl_seconds: u64,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsConfig {
    pub db_path: String,
    pub retention_days: i64,
    pub ip_mode: IpMode,
    pub enable_gallery_view: bool,
    pub enable_file_download: bool,
    pub enable_zip_download: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThumbnailConfig {
    pub max_width: u32,
    pub quality: u32,
    pub pool_size: usize,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyConfig {
    pub max_dimension: u32,
    pub crf: u32,
    pub preset: String,
    pub pool_size: usize,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HdProxyConfig {
    pub crf: u32,
    pub max_dimension: u32,
    pub pool_size: usize,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub cache: CacheConfig,
    pub analytics: AnalyticsConfig,
    pub thumbnail: ThumbnailConfig,
    pub proxy: ProxyConfig,
    pub hd: HdProxyConfig,
    pub backend: BackendConfig,
    pub profile_version: u32,
    pub admin_token_header: String,
    pub bind_addr: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| MtceError::invalid(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Parse the effective configuration from the process environment.
    /// Invalid values are a startup-time hard error — fail fast, same as
    /// the teacher's `StructOpt::from_args` parsing.
    pub fn from_env() -> Result<Config> {
        let ip_mode_str = env_or("MTCE_ANALYTICS_IP_MODE", "anonymized");
        let ip_mode: IpMode = ip_mode_str.parse()?;

        Ok(Config {
            cache: CacheConfig {
                dir: env_or("MTCE_CACHE_DIR", "./cache"),
                ttl_seconds: env_parse("MTCE_CACHE_TTL_SECONDS", 3600)?,
                capacity: env_parse("MTCE_CACHE_CAPACITY", 1000)?,
            },
            analytics: AnalyticsConfig {
                db_path: env_or("MTCE_ANALYTICS_DB_PATH", "./analytics.db"),
                retention_days: env_parse("MTCE_ANALYTICS_RETENTION_DAYS", 90)?,
                ip_mode,
                enable_gallery_view: env_parse("MTCE_ANALYTICS_ENABLE_GALLERY_VIEW", true)?,
                enable_file_download: env_parse("MTCE_ANALYTICS_ENABLE_FILE_DOWNLOAD", true)?,
                enable_zip_download: env_parse("MTCE_ANALYTICS_ENABLE_ZIP_DOWNLOAD", true)?,
            },
            thumbnail: ThumbnailConfig {
                max_width: env_parse("MTCE_THUMBNAIL_MAX_WIDTH", 640)?,
                quality: env_parse("MTCE_THUMBNAIL_QUALITY", 6)?,
                pool_size: env_parse("MTCE_THUMBNAIL_POOL_SIZE", 2)?,
                timeout_seconds: env_parse("MTCE_THUMBNAIL_TIMEOUT_SECONDS", 20)?,
            },
            proxy: ProxyConfig {
                max_dimension: env_parse("MTCE_PROXY_MAX_DIMENSION", 1280)?,
                crf: env_parse("MTCE_PROXY_CRF", 28)?,
                preset: env_or("MTCE_PROXY_PRESET", "veryfast"),
                pool_size: env_parse("MTCE_PROXY_POOL_SIZE", 1)?,
                timeout_seconds: env_parse("MTCE_PROXY_TIMEOUT_SECONDS", 600)?,
            },
            hd: HdProxyConfig {
                crf: env_parse("MTCE_HD_CRF", 20)?,
                max_dimension: env_parse("MTCE_HD_MAX_DIMENSION", 0)?,
                pool_size: env_parse("MTCE_HD_POOL_SIZE", 1)?,
                timeout_seconds: env_parse("MTCE_HD_TIMEOUT_SECONDS", 900)?,
            },
            backend: BackendConfig {
                base_url: env_or("MTCE_BACKEND_BASE_URL", "http://localhost:8080"),
                timeout_seconds: env_parse("MTCE_BACKEND_TIMEOUT_SECONDS", 30)?,
            },
            profile_version: env_parse("MTCE_PROFILE_VERSION", 1)?,
            admin_token_header: env_or("MTCE_ADMIN_TOKEN_HEADER", "X-Auth"),
            bind_addr: env_or("MTCE_BIND_ADDR", "0.0.0.0:8088"),
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_mode_parses_known_values() {
        assert_eq!("full".parse::<IpMode>().unwrap(), IpMode::Full);
        assert_eq!("anonymized".parse::<IpMode>().unwrap(), IpMode::Anonymized);
        assert_eq!("off".parse::<IpMode>().unwrap(), IpMode::Off);
        assert!("bogus".parse::<IpMode>().is_err());
    }
}
