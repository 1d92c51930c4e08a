//! Access logging is an external collaborator (§1): the core only defines
//! the interface, plus a default `tracing`-backed sink so the workspace
//! runs end to end without an external log pipeline.

use std::time::Duration;

/// One completed request, as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct AccessLogRecord {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub body_size: u64,
    pub duration: Duration,
    /// `None` for requests the policy never considered keyable.
    pub cache_status: Option<CacheStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

pub trait AccessLogSink: Send + Sync {
    fn log(&self, record: &AccessLogRecord);
}

/// Emits one `tracing::info!` event per request. Formatting beyond a
/// structured event — file sinks, rotation, a configurable format string —
/// is the out-of-scope "access-log formatting and sinks" adapter.
pub struct TracingAccessLog;

impl AccessLogSink for TracingAccessLog {
    fn log(&self, record: &AccessLogRecord) {
        tracing::info!(
            method = %record.method,
            url = %record.url,
            status = record.status,
            body_size = record.body_size,
            duration_ms = record.duration.as_millis() as u64,
            cache_status = record.cache_status.map(CacheStatus::as_str).unwrap_or("-"),
            "request"
        );
    }
}
