//! Bridges RustCrypto's `rsa` crate into `rcgen`'s `KeyPair`.
//!
//! `rcgen` can only *generate* ECDSA/Ed25519 key pairs; RSA keys must be
//! generated elsewhere and imported as PKCS#8 DER. The spec calls for
//! RSA-2048 leaf and CA keys, so that's what we generate here.

use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;

use crate::error::{ProxyError, Result};

pub fn generate_rsa_keypair(bits: usize) -> Result<rcgen::KeyPair> {
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        .map_err(|e| ProxyError::CertGeneration(format!("RSA key generation failed: {e}")))?;

    let der = private_key
        .to_pkcs8_der()
        .map_err(|e| ProxyError::CertGeneration(format!("PKCS#8 encoding failed: {e}")))?;

    rcgen::KeyPair::from_der_and_sign_algo(der.as_bytes(), &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| ProxyError::CertGeneration(format!("rcgen key import failed: {e}")))
}
