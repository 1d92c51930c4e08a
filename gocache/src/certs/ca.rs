//! Root CA lifecycle: load an existing CA from disk, or generate and
//! persist a fresh one.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::certs::rsa_support::generate_rsa_keypair;
use crate::error::{ProxyError, Result};

const CA_VALIDITY_YEARS: i64 = 10;

/// The root CA used to sign leaf certificates. Held as PEM so `Issuer`s can
/// be constructed fresh per leaf mint without requiring `KeyPair: Clone`.
pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
}

impl CertificateAuthority {
    /// Reads `ca.pem`/`ca.key` from `dir` if present; otherwise generates a
    /// fresh RSA-2048 CA (10-year validity, `CN=GoCache Root CA,
    /// O=GoCache`) and persists it there. Losing this directory invalidates
    /// every leaf minted under the old CA — the proxy does not detect that.
    pub fn load_or_generate(dir: &Path) -> Result<Self> {
        let cert_path = dir.join("ca.pem");
        let key_path = dir.join("ca.key");

        if cert_path.exists() && key_path.exists() {
            let cert_pem = fs::read_to_string(&cert_path)
                .map_err(|e| ProxyError::CertGeneration(format!("read CA cert: {e}")))?;
            let key_pem = fs::read_to_string(&key_path)
                .map_err(|e| ProxyError::CertGeneration(format!("read CA key: {e}")))?;
            return Ok(Self { cert_pem, key_pem });
        }

        fs::create_dir_all(dir)
            .map_err(|e| ProxyError::CertGeneration(format!("create CA directory: {e}")))?;

        let key_pair = generate_rsa_keypair(2048)?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "GoCache Root CA");
        dn.push(DnType::OrganizationName, "GoCache");
        params.distinguished_name = dn;

        params.not_before = OffsetDateTime::now_utc();
        params.not_after = OffsetDateTime::now_utc() + TimeDuration::days(365 * CA_VALIDITY_YEARS);
        params.serial_number = Some(SerialNumber::from(current_unix_epoch()));

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| ProxyError::CertGeneration(format!("self-sign CA: {e}")))?;

        let cert_pem = cert.pem();
        let key_pem = key_pair.serialize_pem();

        fs::write(&key_path, &key_pem)
            .map_err(|e| ProxyError::CertGeneration(format!("write CA key: {e}")))?;
        fs::write(&cert_path, &cert_pem)
            .map_err(|e| ProxyError::CertGeneration(format!("write CA cert: {e}")))?;

        Ok(Self { cert_pem, key_pem })
    }

    /// Builds a fresh `Issuer` from the stored PEM. Leaf minting needs one
    /// per call since `rcgen::Issuer` borrows a `KeyPair` it doesn't own a
    /// reusable handle to.
    pub fn issuer(&self) -> Result<Issuer<'static, KeyPair>> {
        let key_pair = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| ProxyError::CertGeneration(format!("parse CA key: {e}")))?;
        Issuer::from_ca_cert_pem(&self.cert_pem, key_pair)
            .map_err(|e| ProxyError::CertGeneration(format!("build issuer: {e}")))
    }

    /// PEM-encoded X.509 CA certificate, for the management API to expose
    /// as a trust anchor (§6).
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }
}

fn current_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
