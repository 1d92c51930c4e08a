//! Lifecycle (component F): wires the response store, cert store, and proxy
//! pipeline together, binds the listener, and drives graceful shutdown.
//!
//! Everything here is in-process orchestration; reading a config file,
//! daemonizing, and writing a PID file are the out-of-scope CLI binary's job.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};

use crate::access_log::{AccessLogSink, TracingAccessLog};
use crate::cache::ResponseStore;
use crate::certs::CertStore;
use crate::certs::CertificateAuthority;
use crate::config::{Config, ConfigSource};
use crate::error::{ProxyError, Result};
use crate::proxy::{ProxyClient, ProxyContext, ProxyService};

/// The grace period given to in-flight connections once shutdown begins
/// before they're dropped unconditionally.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Interval at which the response store's background sweeper removes
/// expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct Lifecycle {
    config_source: Arc<dyn ConfigSource>,
    config: Arc<RwLock<Arc<Config>>>,
    bind_address: String,
    proxy_port: u16,
    store: Arc<ResponseStore>,
    cert_store: Arc<CertStore>,
    client: ProxyClient,
    access_log: Arc<dyn AccessLogSink>,
}

impl Lifecycle {
    /// Loads the CA (generating one on first run) and the persisted cache
    /// (if persistence is enabled and a file exists), and constructs the
    /// stores `serve` will drive. `config_source` is consulted once here and
    /// again on every `SIGHUP`.
    pub fn bootstrap(config_source: Arc<dyn ConfigSource>) -> Result<Self> {
        let config = config_source.load()?.normalize();

        let ca = CertificateAuthority::load_or_generate(std::path::Path::new(&config.ca_dir))?;
        let cert_store = Arc::new(CertStore::new(ca, config.max_cert_cache_entries));

        let store = Arc::new(ResponseStore::new(
            config.max_size_bytes(),
            config.default_ttl,
            config.negative_ttl,
        ));
        if config.persistence.enable {
            let path = std::path::Path::new(&config.persistence.cache_file);
            if path.exists() {
                store.load(path)?;
            }
        }

        let bind_address = config.bind_address.clone();
        let proxy_port = config.proxy_port;

        Ok(Self {
            config_source,
            config: Arc::new(RwLock::new(Arc::new(config))),
            bind_address,
            proxy_port,
            store,
            cert_store,
            client: ProxyClient::new(),
            access_log: Arc::new(TracingAccessLog),
        })
    }

    /// Overrides the default `tracing`-backed access log sink; used by
    /// embedders and tests that want to capture records instead.
    pub fn with_access_log(mut self, sink: Arc<dyn AccessLogSink>) -> Self {
        self.access_log = sink;
        self
    }

    /// Binds the listener and serves connections until `SIGINT`/`SIGTERM`,
    /// then drains in-flight connections (up to [`SHUTDOWN_GRACE`]) and
    /// persists the cache if enabled. `SIGHUP` re-reads the config via
    /// `config_source` and swaps it in without touching the cache contents
    /// or rebinding the listener — `bind_address`/`proxy_port` changes in a
    /// reloaded config only take effect on the next restart.
    pub async fn serve(self) -> Result<()> {
        let addr = format!("{}:{}", self.bind_address, self.proxy_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProxyError::ClientProtocol(format!("failed to bind {addr}: {e}")))?;
        tracing::info!(%addr, "gocache proxy listening");

        let ctx = ProxyContext {
            store: self.store.clone(),
            cert_store: self.cert_store.clone(),
            client: self.client.clone(),
            config: self.config.clone(),
            access_log: self.access_log.clone(),
        };

        let graceful = GracefulShutdown::new();
        let sweeper = spawn_sweeper(self.store.clone());
        let auto_saver = spawn_auto_saver(self.store.clone(), self.config.clone());

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| ProxyError::ClientProtocol(format!("install SIGINT handler: {e}")))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| ProxyError::ClientProtocol(format!("install SIGTERM handler: {e}")))?;
        let mut sighup = signal(SignalKind::hangup())
            .map_err(|e| ProxyError::ClientProtocol(format!("install SIGHUP handler: {e}")))?;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tracing::debug!(%peer, "accepted connection");

                    let io = TokioIo::new(stream);
                    let service = ProxyService::new(ctx.clone());
                    let conn = http1::Builder::new().serve_connection(io, service).with_upgrades();
                    let watched = graceful.watch(conn);

                    tokio::spawn(async move {
                        if let Err(e) = watched.await {
                            tracing::debug!(error = %e, "connection error");
                        }
                    });
                }
                _ = sighup.recv() => {
                    reload_config(&self.config_source, &self.config);
                }
                _ = sigint.recv() => {
                    tracing::info!("SIGINT received, draining connections");
                    break;
                }
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, draining connections");
                    break;
                }
            }
        }

        sweeper.abort();
        auto_saver.abort();

        tokio::select! {
            _ = graceful.shutdown() => {
                tracing::info!("all connections drained");
            }
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                tracing::warn!("shutdown grace period elapsed, dropping remaining connections");
            }
        }

        let config = self.config.read().unwrap().clone();
        if config.persistence.enable {
            let path = std::path::Path::new(&config.persistence.cache_file);
            self.store.save(path)?;
            tracing::info!(path = %path.display(), "cache persisted on shutdown");
        }

        Ok(())
    }
}

fn reload_config(source: &Arc<dyn ConfigSource>, slot: &RwLock<Arc<Config>>) {
    match source.load() {
        Ok(new_config) => {
            *slot.write().unwrap() = Arc::new(new_config.normalize());
            tracing::info!("configuration reloaded");
        }
        Err(e) => {
            tracing::warn!(error = %e, "configuration reload failed, keeping previous config");
        }
    }
}

fn spawn_sweeper(store: Arc<ResponseStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let removed = store.sweep_expired();
            if removed > 0 {
                tracing::debug!(removed, "swept expired cache entries");
            }
        }
    })
}

fn spawn_auto_saver(
    store: Arc<ResponseStore>,
    config: Arc<RwLock<Arc<Config>>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = config.read().unwrap().clone();
            let Some(interval) = snapshot
                .persistence
                .enable
                .then_some(snapshot.persistence.auto_save_interval)
                .flatten()
            else {
                return;
            };
            tokio::time::sleep(interval).await;

            let snapshot = config.read().unwrap().clone();
            if !snapshot.persistence.enable {
                continue;
            }
            let path = std::path::Path::new(&snapshot.persistence.cache_file);
            if let Err(e) = store.save(path) {
                tracing::warn!(error = %e, "periodic cache save failed");
            }
        }
    })
}
