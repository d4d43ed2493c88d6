//! Certificate and key material used for signing, decryption and trust.

use crate::error::{SamlError, SamlResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;
use std::fmt;

/// An X.509 certificate together with its private key.
///
/// Serves both as the SP's service certificate (assertion decryption,
/// artifact-resolve signing) and as signing credentials on outbound
/// messages.
#[derive(Clone)]
pub struct SigningCredentials {
    pub certificate: X509,
    pub private_key: PKey<Private>,
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials").finish_non_exhaustive()
    }
}

impl SigningCredentials {
    pub fn new(certificate: X509, private_key: PKey<Private>) -> Self {
        SigningCredentials {
            certificate,
            private_key,
        }
    }

    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> SamlResult<Self> {
        let certificate = parse_certificate(certificate_pem)?;
        let private_key = PKey::private_key_from_pem(private_key_pem.as_bytes())
            .map_err(|e| SamlError::config(format!("Private key error: {e}")))?;
        Ok(SigningCredentials {
            certificate,
            private_key,
        })
    }

    /// RSA-SHA256 signature over the given bytes.
    pub fn sign_sha256(&self, data: &[u8]) -> SamlResult<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.private_key)
            .map_err(|e| SamlError::signature(format!("Signer creation failed: {e}")))?;
        signer
            .update(data)
            .map_err(|e| SamlError::signature(format!("Signing failed: {e}")))?;
        signer
            .sign_to_vec()
            .map_err(|e| SamlError::signature(format!("Signing failed: {e}")))
    }

    /// The certificate as base64 DER, the form embedded in `KeyInfo`.
    pub fn certificate_base64_der(&self) -> SamlResult<String> {
        let der = self
            .certificate
            .to_der()
            .map_err(|e| SamlError::config(format!("Certificate encoding failed: {e}")))?;
        Ok(STANDARD.encode(der))
    }
}

/// Parse an X.509 certificate, with or without PEM armor.
pub fn parse_certificate(pem: &str) -> SamlResult<X509> {
    let pem_data = if pem.contains("-----BEGIN CERTIFICATE-----") {
        pem.to_string()
    } else {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
            pem.trim()
        )
    };

    X509::from_pem(pem_data.as_bytes())
        .map_err(|e| SamlError::config(format!("Certificate parsing error: {e}")))
}
