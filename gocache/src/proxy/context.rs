//! The shared handles both proxy handlers need, bundled so a connection
//! task only has to carry one cheaply-`Clone`-able value across the
//! `hyper::upgrade::on` boundary.

use std::sync::{Arc, RwLock};

use crate::access_log::AccessLogSink;
use crate::cache::ResponseStore;
use crate::certs::CertStore;
use crate::config::Config;
use crate::proxy::client::ProxyClient;

#[derive(Clone)]
pub struct ProxyContext {
    pub store: Arc<ResponseStore>,
    pub cert_store: Arc<CertStore>,
    pub client: ProxyClient,
    /// Swapped wholesale on a `SIGHUP` reload (§4.F); every request reads a
    /// fresh snapshot rather than holding the lock for the request's
    /// lifetime.
    pub config: Arc<RwLock<Arc<Config>>>,
    pub access_log: Arc<dyn AccessLogSink>,
}

impl ProxyContext {
    pub fn current_config(&self) -> Arc<Config> {
        self.config.read().unwrap().clone()
    }
}
