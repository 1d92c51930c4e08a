//! The LRU-bounded store of dynamically signed per-host leaf certificates
//! (component B).

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;

use crate::certs::ca::CertificateAuthority;
use crate::certs::leaf::{self, LeafCertEntry};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertStats {
    pub size: usize,
    pub evictions: u64,
    pub max_entries: usize,
}

/// Read-write-locked LRU of host → leaf certificate, fronting the root CA.
///
/// Reads take the read lock for the initial lookup, release it, then
/// briefly re-acquire the write lock to promote on hit — this permits a
/// lost update on promotion under heavy contention, which is acceptable:
/// the invariant this store guarantees is structural (`|entries| =
/// lru.length`, `max_entries > 0 ⇒ |entries| ≤ max_entries`), not exact
/// LRU ordering.
pub struct CertStore {
    entries: RwLock<LruCache<String, LeafCertEntry>>,
    max_entries: usize,
    evictions: AtomicU64,
    ca: CertificateAuthority,
}

impl CertStore {
    /// `max_entries = 0` means unlimited.
    pub fn new(ca: CertificateAuthority, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(LruCache::unbounded()),
            max_entries,
            evictions: AtomicU64::new(0),
            ca,
        }
    }

    /// On hit, promotes to MRU and returns the existing leaf. On miss,
    /// generates a new one, evicting the LRU tail first if at capacity.
    pub fn get(&self, host: &str) -> Result<LeafCertEntry> {
        let hit = {
            let entries = self.entries.read().unwrap();
            entries.peek(host).cloned()
        };

        if let Some(entry) = hit {
            let mut entries = self.entries.write().unwrap();
            entries.get(host);
            return Ok(entry);
        }

        let issuer = self.ca.issuer()?;
        let minted = leaf::mint_leaf(host, &issuer)?;

        let mut entries = self.entries.write().unwrap();
        if self.max_entries > 0 && entries.len() >= self.max_entries && entries.peek(host).is_none() {
            if entries.pop_lru().is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        entries.put(host.to_string(), minted.clone());

        Ok(minted)
    }

    pub fn stats(&self) -> CertStats {
        let entries = self.entries.read().unwrap();
        CertStats {
            size: entries.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            max_entries: self.max_entries,
        }
    }

    /// PEM-encoded root CA certificate, for the (out-of-scope) management
    /// API to expose as a downloadable trust anchor.
    pub fn ca_certificate_pem(&self) -> &str {
        self.ca.certificate_pem()
    }
}
