//! Per-host leaf certificate minting.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Issuer, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::certs::rsa_support::generate_rsa_keypair;
use crate::error::{ProxyError, Result};

const LEAF_VALIDITY_DAYS: i64 = 365;

/// A dynamically signed per-host TLS certificate and its private key.
#[derive(Debug, Clone)]
pub struct LeafCertEntry {
    pub host: String,
    /// PEM-encoded certificate (leaf only; the CA is not re-sent in the
    /// chain since it isn't trusted as an intermediate by the client — it's
    /// installed directly as a root).
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// `CommonName = host`, 1-year validity, `digitalSignature |
/// keyEncipherment`, `serverAuth`; an IP-literal host goes into
/// `IPAddresses`, anything else into `DNSNames`. Serial = current Unix
/// epoch. RSA-2048, signed by `issuer`.
pub fn mint_leaf(host: &str, issuer: &Issuer<'_, KeyPair>) -> Result<LeafCertEntry> {
    let host_without_port = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);

    let mut params = if let Ok(ip) = host_without_port.parse::<IpAddr>() {
        let mut params = CertificateParams::new(Vec::new())
            .map_err(|e| ProxyError::CertGeneration(format!("cert params for {host}: {e}")))?;
        params.subject_alt_names.push(SanType::IpAddress(ip));
        params
    } else {
        CertificateParams::new(vec![host_without_port.to_string()])
            .map_err(|e| ProxyError::CertGeneration(format!("cert params for {host}: {e}")))?
    };

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, host_without_port);
    params.distinguished_name = dn;

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    params.not_before = OffsetDateTime::now_utc();
    params.not_after = OffsetDateTime::now_utc() + TimeDuration::days(LEAF_VALIDITY_DAYS);
    params.serial_number = Some(SerialNumber::from(current_unix_epoch()));

    let key_pair = generate_rsa_keypair(2048)?;
    let cert = params
        .signed_by(&key_pair, issuer)
        .map_err(|e| ProxyError::CertGeneration(format!("sign leaf for {host}: {e}")))?;

    Ok(LeafCertEntry {
        host: host.to_string(),
        certificate_pem: cert.pem(),
        private_key_pem: key_pair.serialize_pem(),
    })
}

fn current_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
