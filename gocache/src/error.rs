//! Error taxonomy shared across the cache, cert store, and proxy pipeline.
//!
//! Each variant corresponds to one of the failure modes the proxy pipeline
//! must recover from locally (§7): handlers match on the taxonomy rather than
//! propagating to the process, so this is a plain enum rather than a
//! `Box<dyn Error>` chain.

use std::fmt;

/// An error surfaced by one of the core subsystems.
#[derive(Debug)]
pub enum ProxyError {
    /// Malformed request or an operation attempted on a non-hijackable
    /// connection (e.g. `CONNECT` on a server that can't take over the
    /// stream).
    ClientProtocol(String),
    /// DNS, TCP, or TLS-to-origin failure while forwarding.
    UpstreamTransport(String),
    /// The origin responded with a status line but the body failed to read.
    UpstreamBodyRead(String),
    /// A POST body exceeded the configured request-body cap.
    RequestTooLarge { limit_bytes: u64 },
    /// Leaf certificate minting failed; the CONNECT tunnel must be closed
    /// without a response.
    CertGeneration(String),
    /// Cache persistence (load or save) failed.
    Persistence(String),
    /// An entry's body exceeds the store's `max_size`; silently not cached.
    OversizedCacheEntry,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::ClientProtocol(msg) => write!(f, "client protocol error: {msg}"),
            ProxyError::UpstreamTransport(msg) => write!(f, "upstream transport error: {msg}"),
            ProxyError::UpstreamBodyRead(msg) => write!(f, "upstream body read error: {msg}"),
            ProxyError::RequestTooLarge { limit_bytes } => {
                write!(f, "request body exceeds limit of {limit_bytes} bytes")
            }
            ProxyError::CertGeneration(msg) => write!(f, "certificate generation failed: {msg}"),
            ProxyError::Persistence(msg) => write!(f, "persistence error: {msg}"),
            ProxyError::OversizedCacheEntry => write!(f, "entry exceeds the store's max size"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl ProxyError {
    /// Projects this error onto the HTTP status and short text body a
    /// client-facing handler should write.
    pub fn status_and_body(&self) -> (u16, String) {
        match self {
            ProxyError::ClientProtocol(msg) => (500, msg.clone()),
            ProxyError::UpstreamTransport(msg) => (503, msg.clone()),
            ProxyError::UpstreamBodyRead(msg) => (503, msg.clone()),
            ProxyError::RequestTooLarge { limit_bytes } => (
                413,
                format!("request body exceeds limit of {limit_bytes} bytes"),
            ),
            ProxyError::CertGeneration(msg) => (500, msg.clone()),
            ProxyError::Persistence(msg) => (500, msg.clone()),
            ProxyError::OversizedCacheEntry => (200, String::new()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
