//! Enveloped XML-Signature verification and creation.
//!
//! Verification defends against the known XML-DSig attacks on SAML:
//! the reference must point at the root of the element containing the
//! signature (anti-wrapping), the digest is recomputed over the
//! canonicalized content with the signature removed, and only vetted
//! transform algorithms are accepted.

use crate::crypto::canonicalize_xml;
use crate::crypto::keys::SigningCredentials;
use crate::error::{SamlError, SamlResult};
use crate::xml::{XmlElement, XmlNode, DSIG_NS, SAML2_NS};
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::MessageDigest;
use openssl::sign::Verifier;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509StoreContext, X509};

pub(crate) const TAMPERED_MESSAGE: &str =
    "Signature didn't verify. Have the contents been tampered with?";
pub(crate) const INCORRECT_REFERENCE_MESSAGE: &str = "Incorrect reference on Xml signature. The reference must be to the root element of the element containing the signature.";
pub(crate) const CERTIFICATE_VALIDATION_MESSAGE: &str = "The signature was valid, but the verification of the certificate failed. Is it expired or revoked? Are you sure you really want to enable ValidateCertificates (it's normally not needed)?";

const TRANSFORM_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const TRANSFORM_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

fn digest_for_uri(uri: &str) -> SamlResult<MessageDigest> {
    match uri {
        "http://www.w3.org/2000/09/xmldsig#sha1" => Ok(MessageDigest::sha1()),
        "http://www.w3.org/2001/04/xmlenc#sha256" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2001/04/xmldsig-more#sha384" => Ok(MessageDigest::sha384()),
        "http://www.w3.org/2001/04/xmlenc#sha512" => Ok(MessageDigest::sha512()),
        other => Err(SamlError::signature(format!(
            "Unsupported digest algorithm: {other}"
        ))),
    }
}

fn signature_digest_for_uri(uri: &str) -> SamlResult<MessageDigest> {
    match uri {
        "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Ok(MessageDigest::sha1()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Ok(MessageDigest::sha384()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Ok(MessageDigest::sha512()),
        other => Err(SamlError::signature(format!(
            "Unsupported signature algorithm: {other}"
        ))),
    }
}

fn strip_base64_whitespace(value: &str) -> String {
    value.replace(['\n', '\r', ' ', '\t'], "")
}

/// Verify the enveloped signature on `element` against an ordered set of
/// trusted certificates (key rollover: each is tried in turn).
///
/// Returns `Ok(true)` when a signature was present and verified,
/// `Ok(false)` when the element carries no signature at all, and an
/// `InvalidSignature` error for any present-but-invalid signature.
pub fn verify_enveloped(
    element: &XmlElement,
    trusted: &[X509],
    validate_certificates: bool,
) -> SamlResult<bool> {
    let Some(signature) = element.child(DSIG_NS, "Signature") else {
        return Ok(false);
    };

    let signed_info = signature
        .child(DSIG_NS, "SignedInfo")
        .ok_or_else(|| SamlError::signature("The signature contains no SignedInfo element"))?;

    let canonicalization = signed_info
        .child(DSIG_NS, "CanonicalizationMethod")
        .and_then(|m| m.attribute("Algorithm"))
        .unwrap_or_default();
    if canonicalization != TRANSFORM_EXC_C14N {
        return Err(SamlError::signature(format!(
            "Unsupported canonicalization method: {canonicalization}"
        )));
    }

    let reference = signed_info
        .child(DSIG_NS, "Reference")
        .ok_or_else(|| SamlError::signature("The signature contains no Reference element"))?;

    // Anti-wrapping: the reference must target the root of the element
    // carrying the signature, nothing else.
    let reference_uri = reference.attribute("URI").unwrap_or_default();
    let element_id = element.attribute("ID").unwrap_or_default();
    if element_id.is_empty() || reference_uri != format!("#{element_id}") {
        return Err(SamlError::signature(INCORRECT_REFERENCE_MESSAGE));
    }

    if let Some(transforms) = reference.child(DSIG_NS, "Transforms") {
        for transform in transforms.children_named(DSIG_NS, "Transform") {
            let algorithm = transform.attribute("Algorithm").unwrap_or_default();
            if algorithm != TRANSFORM_ENVELOPED && algorithm != TRANSFORM_EXC_C14N {
                return Err(SamlError::signature(format!(
                    "Unsupported signature transform: {algorithm}"
                )));
            }
        }
    }

    let digest_method = reference
        .child(DSIG_NS, "DigestMethod")
        .and_then(|m| m.attribute("Algorithm"))
        .ok_or_else(|| SamlError::signature("The signature reference has no DigestMethod"))?;
    let digest_value = reference
        .child(DSIG_NS, "DigestValue")
        .map(|v| strip_base64_whitespace(&v.text()))
        .ok_or_else(|| SamlError::signature("The signature reference has no DigestValue"))?;

    // Recompute the digest over the canonicalized element with the
    // signature removed (enveloped transform).
    let content = element.without_child(DSIG_NS, "Signature").to_standalone_xml();
    let canonicalized = canonicalize_xml(&content)?;
    let computed = openssl::hash::hash(digest_for_uri(digest_method)?, canonicalized.as_bytes())
        .map_err(|e| SamlError::signature(format!("Digest computation failed: {e}")))?;
    if STANDARD.encode(&computed) != digest_value {
        return Err(SamlError::signature(TAMPERED_MESSAGE));
    }

    let signature_method = signed_info
        .child(DSIG_NS, "SignatureMethod")
        .and_then(|m| m.attribute("Algorithm"))
        .ok_or_else(|| SamlError::signature("The signature has no SignatureMethod"))?;
    let signature_value = signature
        .child(DSIG_NS, "SignatureValue")
        .map(|v| strip_base64_whitespace(&v.text()))
        .ok_or_else(|| SamlError::signature("The signature has no SignatureValue"))?;
    let signature_bytes = STANDARD
        .decode(&signature_value)
        .map_err(|e| SamlError::signature(format!("Invalid signature encoding: {e}")))?;

    let canonicalized_signed_info = canonicalize_xml(&signed_info.to_standalone_xml())?;
    let message_digest = signature_digest_for_uri(signature_method)?;

    for certificate in trusted {
        let public_key = match certificate.public_key() {
            Ok(key) => key,
            Err(_) => continue,
        };
        let mut verifier = Verifier::new(message_digest, &public_key)
            .map_err(|e| SamlError::signature(format!("Verifier creation failed: {e}")))?;
        verifier
            .update(canonicalized_signed_info.as_bytes())
            .map_err(|e| SamlError::signature(format!("Signature update failed: {e}")))?;
        if verifier.verify(&signature_bytes).unwrap_or(false) {
            if validate_certificates {
                validate_certificate_chain(certificate)?;
            }
            return Ok(true);
        }
    }

    Err(SamlError::signature(TAMPERED_MESSAGE))
}

/// Chain/revocation validation of a signing certificate against the
/// system trust store. Only run when the SP opts in.
fn validate_certificate_chain(certificate: &X509) -> SamlResult<()> {
    let mut builder = X509StoreBuilder::new()
        .map_err(|e| SamlError::signature(format!("Certificate store error: {e}")))?;
    builder
        .set_default_paths()
        .map_err(|e| SamlError::signature(format!("Certificate store error: {e}")))?;
    let store = builder.build();

    let chain = Stack::new()
        .map_err(|e| SamlError::signature(format!("Certificate store error: {e}")))?;
    let mut context = X509StoreContext::new()
        .map_err(|e| SamlError::signature(format!("Certificate store error: {e}")))?;
    let valid = context
        .init(&store, certificate, &chain, |c| c.verify_cert())
        .map_err(|e| SamlError::signature(format!("Certificate verification error: {e}")))?;

    if valid {
        Ok(())
    } else {
        Err(SamlError::signature(CERTIFICATE_VALIDATION_MESSAGE))
    }
}

/// Sign an XML document with an enveloped RSA-SHA256 signature over its
/// document element, inserted after the Issuer element when one is
/// present. The document element must carry an `ID` attribute for the
/// signature reference.
pub fn sign_enveloped(xml: &str, credentials: &SigningCredentials) -> SamlResult<String> {
    let parsed = XmlElement::parse(xml)
        .map_err(|e| SamlError::malformed(format!("Cannot sign malformed XML: {e}")))?;
    let mut root = parsed.without_child(DSIG_NS, "Signature");

    let id = root
        .attribute("ID")
        .map(str::to_string)
        .ok_or_else(|| {
            SamlError::invalid_operation(
                "The XML to sign must carry an ID attribute on its document element.",
            )
        })?;

    let canonicalized = canonicalize_xml(&root.to_standalone_xml())?;
    let digest = openssl::hash::hash(MessageDigest::sha256(), canonicalized.as_bytes())
        .map_err(|e| SamlError::signature(format!("Digest computation failed: {e}")))?;
    let digest_b64 = STANDARD.encode(&digest);

    let mut signed_info = String::new();
    signed_info.push_str("<ds:SignedInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">");
    signed_info.push_str(
        "<ds:CanonicalizationMethod Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>",
    );
    signed_info.push_str(
        "<ds:SignatureMethod Algorithm=\"http://www.w3.org/2001/04/xmldsig-more#rsa-sha256\"/>",
    );
    signed_info.push_str("<ds:Reference URI=\"#");
    signed_info.push_str(&id);
    signed_info.push_str("\">");
    signed_info.push_str("<ds:Transforms>");
    signed_info.push_str(
        "<ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/>",
    );
    signed_info.push_str("<ds:Transform Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>");
    signed_info.push_str("</ds:Transforms>");
    signed_info.push_str("<ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/>");
    signed_info.push_str("<ds:DigestValue>");
    signed_info.push_str(&digest_b64);
    signed_info.push_str("</ds:DigestValue>");
    signed_info.push_str("</ds:Reference>");
    signed_info.push_str("</ds:SignedInfo>");

    let canonicalized_signed_info = canonicalize_xml(&signed_info)?;
    let signature = credentials.sign_sha256(canonicalized_signed_info.as_bytes())?;
    let signature_b64 = STANDARD.encode(&signature);
    let certificate_b64 = credentials.certificate_base64_der()?;

    let mut signature_xml = String::new();
    signature_xml.push_str("<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">");
    signature_xml.push_str(&signed_info);
    signature_xml.push_str("<ds:SignatureValue>");
    signature_xml.push_str(&signature_b64);
    signature_xml.push_str("</ds:SignatureValue>");
    signature_xml.push_str("<ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
    signature_xml.push_str(&certificate_b64);
    signature_xml.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo>");
    signature_xml.push_str("</ds:Signature>");

    let signature_element = XmlElement::parse(&signature_xml)
        .map_err(|e| SamlError::signature(format!("Signature serialization failed: {e}")))?;

    // After the Issuer child when present, else first.
    let insert_at = root
        .children
        .iter()
        .position(|n| matches!(n, XmlNode::Element(e) if e.is_named(SAML2_NS, "Issuer")))
        .map(|i| i + 1)
        .unwrap_or(0);
    root.children
        .insert(insert_at, XmlNode::Element(signature_element));

    Ok(root.to_standalone_xml())
}
