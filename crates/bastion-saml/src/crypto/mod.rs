//! XML-Signature and XML-Encryption primitives over openssl.

pub mod decrypt;
pub mod keys;
pub mod signature;

use crate::error::{SamlError, SamlResult};
use xml_canonicalization::Canonicalizer;

/// Apply Exclusive XML Canonicalization (C14N) without comments.
///
/// Required for all SAML digest and signature computation so both sides
/// hash identical bytes regardless of serialization quirks.
pub fn canonicalize_xml(xml: &str) -> SamlResult<String> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| SamlError::signature(format!("XML canonicalization failed: {e}")))?;

    String::from_utf8(output)
        .map_err(|e| SamlError::signature(format!("Canonicalized XML is not valid UTF-8: {e}")))
}
