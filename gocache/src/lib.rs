//! Core of a local HTTP/HTTPS caching forward proxy.
//!
//! Three tightly coupled subsystems make up this crate: the size-bounded LRU
//! [`cache`] (response store plus cache policy), the [`certs`] store backing
//! MITM interception, and the [`proxy`] pipeline that ties them together.
//! Everything outside the core — config file parsing, the CLI, the
//! management API, PID files, access-log sinks — is an adapter built on top
//! of [`Lifecycle`], [`config::Config`], and [`access_log::AccessLogSink`].

pub mod access_log;
pub mod cache;
pub mod certs;
pub mod config;
pub mod error;
mod lifecycle;
pub mod proxy;

pub use lifecycle::Lifecycle;
