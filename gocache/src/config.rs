//! Typed configuration the core consumes.
//!
//! Parsing a config *file* is an external collaborator's job (the
//! `gocache-proxy` binary reads TOML into this struct); the core only ever
//! sees a fully-populated [`Config`], already clamped by [`Config::normalize`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Supplies a [`Config`] at startup and again on a reload request (`SIGHUP`,
/// §4.F). Reading and parsing a config *file* is the out-of-scope adapter's
/// job; [`Lifecycle`](crate::Lifecycle) only ever calls `load`.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<Config>;
}

/// A `ConfigSource` that always returns the same value; used where there's
/// no backing file to re-read (SIGHUP becomes a no-op reload).
impl ConfigSource for Config {
    fn load(&self) -> Result<Config> {
        Ok(self.clone())
    }
}

/// Implementation hard maximum for the POST size gates, regardless of what a
/// config file requests (§4.C).
pub const MAX_POST_BODY_SIZE_MB: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy_port: u16,
    pub bind_address: String,

    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub negative_ttl: Duration,

    /// 0 = unlimited.
    pub max_size_mb: u64,

    pub ignore_no_cache: bool,
    pub cacheable_types: Vec<String>,

    pub post_cache: PostCacheConfig,

    /// 0 = unlimited.
    pub max_cert_cache_entries: usize,

    pub persistence: PersistenceConfig,

    /// Directory holding `ca.pem`/`ca.key`; generated on first run if empty.
    pub ca_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostCacheConfig {
    pub enable: bool,
    pub include_query_string: bool,
    pub max_request_body_size_mb: u64,
    pub max_response_body_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enable: bool,
    pub cache_file: String,
    #[serde(with = "duration_secs_opt")]
    pub auto_save_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_port: 8080,
            bind_address: "127.0.0.1".to_string(),
            default_ttl: Duration::from_secs(300),
            negative_ttl: Duration::from_secs(30),
            max_size_mb: 100,
            ignore_no_cache: false,
            cacheable_types: vec![
                "text/".to_string(),
                "application/json".to_string(),
                "application/javascript".to_string(),
                "image/".to_string(),
            ],
            post_cache: PostCacheConfig::default(),
            max_cert_cache_entries: 1000,
            persistence: PersistenceConfig::default(),
            ca_dir: "./gocache-ca".to_string(),
        }
    }
}

impl Default for PostCacheConfig {
    fn default() -> Self {
        Self {
            enable: false,
            include_query_string: true,
            max_request_body_size_mb: 10,
            max_response_body_size_mb: 10,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enable: false,
            cache_file: "./gocache-cache.bin".to_string(),
            auto_save_interval: Some(Duration::from_secs(300)),
        }
    }
}

impl Config {
    /// Clamps the POST size gates to [`MAX_POST_BODY_SIZE_MB`] per §4.C.
    /// Called once, on load; constructors assume an already-normalized config.
    pub fn normalize(mut self) -> Self {
        self.post_cache.max_request_body_size_mb = self
            .post_cache
            .max_request_body_size_mb
            .min(MAX_POST_BODY_SIZE_MB);
        self.post_cache.max_response_body_size_mb = self
            .post_cache
            .max_response_body_size_mb
            .min(MAX_POST_BODY_SIZE_MB);
        self
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_request_body_size_bytes(&self) -> u64 {
        self.post_cache
            .max_request_body_size_mb
            .saturating_mul(1024 * 1024)
    }

    pub fn max_response_body_size_bytes(&self) -> u64 {
        self.post_cache
            .max_response_body_size_mb
            .saturating_mul(1024 * 1024)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
