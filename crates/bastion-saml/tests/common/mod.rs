//! Shared fixtures: test keys, canned response documents, an encryption
//! helper playing the IdP side, and a stub artifact-resolution endpoint.
#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine};
use bastion_saml::crypto::keys::SigningCredentials;
use bastion_saml::crypto::signature::sign_enveloped;
use bastion_saml::{EntityId, IdentityProvider, Options, SpOptions};
use openssl::rsa::Padding;
use openssl::symm::{Cipher, Crypter, Mode};
use openssl::x509::X509;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

pub const CERT1: &str = include_str!("cert1.pem");
pub const KEY1: &str = include_str!("key1.pem");
pub const CERT2: &str = include_str!("cert2.pem");
pub const KEY2: &str = include_str!("key2.pem");

pub const IDP_ENTITY_ID: &str = "https://idp.example.com";
pub const IDP2_ENTITY_ID: &str = "https://idp2.example.com";
pub const SP_ENTITY_ID: &str = "https://sp.example.com";

/// The IdP's signing credentials (certificate 1).
pub fn idp_credentials() -> SigningCredentials {
    SigningCredentials::from_pem(CERT1, KEY1).unwrap()
}

/// The SP's service certificate (certificate 2), used for decryption.
pub fn service_credentials() -> SigningCredentials {
    SigningCredentials::from_pem(CERT2, KEY2).unwrap()
}

pub fn cert(pem: &str) -> X509 {
    X509::from_pem(pem.as_bytes()).unwrap()
}

/// Options with a default return URL and two registered IdPs: the default
/// one accepts unsolicited responses, the second does not.
pub fn test_options() -> Options {
    let mut sp = SpOptions::new(EntityId::new(SP_ENTITY_ID));
    sp.return_url = Some(Url::parse("https://localhost/returnUrl").unwrap());

    let mut options = Options::new(sp);

    let mut idp = IdentityProvider::new(EntityId::new(IDP_ENTITY_ID));
    idp.allow_unsolicited_authn_response = true;
    idp.add_signing_key(cert(CERT1));
    options.add_identity_provider(idp);

    let mut idp2 = IdentityProvider::new(EntityId::new(IDP2_ENTITY_ID));
    idp2.allow_unsolicited_authn_response = false;
    idp2.add_signing_key(cert(CERT1));
    options.add_identity_provider(idp2);

    options
}

/// Sign a document with the IdP key (enveloped, over the root element).
pub fn sign(xml: &str) -> String {
    sign_enveloped(xml, &idp_credentials()).unwrap()
}

pub fn assertion_xml(id: &str, name_id: &str) -> String {
    format!(
        r#"<saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="2013-09-25T00:00:00Z"><saml2:Issuer>{IDP_ENTITY_ID}</saml2:Issuer><saml2:Subject><saml2:NameID>{name_id}</saml2:NameID><saml2:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"/></saml2:Subject><saml2:Conditions NotOnOrAfter="2100-01-01T00:00:00Z"/></saml2:Assertion>"#
    )
}

/// A Success response from the default IdP wrapping `body`.
pub fn response_xml(id: &str, body: &str) -> String {
    response_from(IDP_ENTITY_ID, "Success", id, None, body)
}

pub fn response_from(
    issuer: &str,
    status: &str,
    id: &str,
    in_response_to: Option<&str>,
    body: &str,
) -> String {
    let in_response_to = in_response_to
        .map(|v| format!(" InResponseTo=\"{v}\""))
        .unwrap_or_default();
    format!(
        r#"<saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="2013-01-01T00:00:00Z"{in_response_to}><saml2:Issuer>{issuer}</saml2:Issuer><saml2p:Status><saml2p:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:{status}"/></saml2p:Status>{body}</saml2p:Response>"#
    )
}

/// Encrypt an assertion for `recipient` the way an IdP would:
/// AES-256-CBC data cipher, RSA-1.5 or RSA-OAEP key transport.
pub fn encrypt_assertion(xml: &str, recipient: &X509, oaep: bool) -> String {
    let mut key = vec![0u8; 32];
    openssl::rand::rand_bytes(&mut key).unwrap();

    let cipher = Cipher::aes_256_cbc();
    let block = cipher.block_size();
    let mut iv = vec![0u8; block];
    openssl::rand::rand_bytes(&mut iv).unwrap();

    let mut padded = xml.as_bytes().to_vec();
    let pad = block - (padded.len() % block);
    padded.extend(std::iter::repeat(pad as u8).take(pad));

    let mut crypter = Crypter::new(cipher, Mode::Encrypt, &key, Some(&iv)).unwrap();
    crypter.pad(false);
    let mut out = vec![0u8; padded.len() + block];
    let mut n = crypter.update(&padded, &mut out).unwrap();
    n += crypter.finalize(&mut out[n..]).unwrap();
    out.truncate(n);

    let mut data = iv;
    data.extend_from_slice(&out);

    let rsa = recipient.public_key().unwrap().rsa().unwrap();
    let mut wrapped = vec![0u8; rsa.size() as usize];
    let padding = if oaep {
        Padding::PKCS1_OAEP
    } else {
        Padding::PKCS1
    };
    let n = rsa.public_encrypt(&key, &mut wrapped, padding).unwrap();
    wrapped.truncate(n);

    let key_alg = if oaep {
        "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p"
    } else {
        "http://www.w3.org/2001/04/xmlenc#rsa-1_5"
    };

    format!(
        r#"<saml2:EncryptedAssertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion"><xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" Type="http://www.w3.org/2001/04/xmlenc#Element"><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes256-cbc"/><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm="{key_alg}"/><xenc:CipherData><xenc:CipherValue>{wrapped}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue>{data}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedData></saml2:EncryptedAssertion>"#,
        wrapped = STANDARD.encode(&wrapped),
        data = STANDARD.encode(&data),
    )
}

/// What the stub artifact-resolution endpoint saw.
#[derive(Debug, Default, Clone)]
pub struct CapturedResolveRequest {
    pub soap_action: Option<String>,
    pub body: String,
}

/// Minimal HTTP server answering every POST with an ArtifactResponse that
/// wraps `message`. Captures the inbound request for assertions.
pub async fn spawn_artifact_service(
    message: String,
    captured: Arc<Mutex<Option<CapturedResolveRequest>>>,
) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];

            let (headers, body) = loop {
                let n = match socket.read(&mut tmp).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&tmp[..n]);
                if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                    let headers = String::from_utf8_lossy(&buf[..pos]).into_owned();
                    let content_length = headers
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(str::to_string))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    let body_start = pos + 4;
                    while buf.len() < body_start + content_length {
                        let n = match socket.read(&mut tmp).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&tmp[..n]);
                    }
                    let body =
                        String::from_utf8_lossy(&buf[body_start..body_start + content_length])
                            .into_owned();
                    break (headers, body);
                }
            };

            let soap_action = headers.lines().find_map(|l| {
                l.strip_prefix("soapaction:")
                    .or_else(|| l.strip_prefix("SOAPAction:"))
                    .map(|v| v.trim().trim_matches('"').to_string())
            });
            *captured.lock().unwrap() = Some(CapturedResolveRequest { soap_action, body });

            let response_body = format!(
                r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"><SOAP-ENV:Body><saml2p:ArtifactResponse xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp" Version="2.0" IssueInstant="2013-01-01T00:00:00Z"><saml2:Issuer>{IDP_ENTITY_ID}</saml2:Issuer><saml2p:Status><saml2p:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></saml2p:Status>{message}</saml2p:ArtifactResponse></SOAP-ENV:Body></SOAP-ENV:Envelope>"#
            );
            let http_response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                response_body.len(),
                response_body
            );
            let _ = socket.write_all(http_response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    addr
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
