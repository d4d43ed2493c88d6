//! HTTP-Artifact binding: a 44-byte reference travels in the request and
//! the actual message is fetched from the IdP with a SOAP-style
//! ArtifactResolve call.

use crate::bindings::{Binding, BindingKind};
use crate::config::{IdentityProvider, Options};
use crate::crypto::signature::sign_enveloped;
use crate::error::{SamlError, SamlResult};
use crate::types::{
    CommandResult, EntityId, HttpRequestData, Saml2Id, Saml2Message, TrustLevel, UnbindResult,
};
use crate::xml::{escape_text, XmlElement, DSIG_NS, SAML2_NS, SAML2P_NS, SOAP_ENV_NS};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use dashmap::DashMap;
use http::Method;
use openssl::hash::MessageDigest;
use rand::rngs::OsRng;
use rand::RngCore;
use url::Url;

/// SOAP action identifying the SAML artifact-resolution protocol.
pub const ARTIFACT_RESOLUTION_SOAP_ACTION: &str = "http://www.oasis-open.org/committees/security";

const ARTIFACT_LENGTH: usize = 44;

/// Outbound messages bound via the artifact binding, waiting to be
/// resolved. Owned by an `Options` instance; removal is the atomic
/// take-once of resolution.
#[derive(Debug, Default)]
pub struct PendingMessageStore {
    messages: DashMap<Vec<u8>, Saml2Message>,
}

impl PendingMessageStore {
    #[must_use]
    pub fn new() -> Self {
        PendingMessageStore::default()
    }

    pub fn insert(&self, artifact: Vec<u8>, message: Saml2Message) {
        self.messages.insert(artifact, message);
    }

    /// Remove and return the message for an artifact. Each artifact
    /// resolves at most once.
    pub fn take(&self, artifact: &[u8]) -> Option<Saml2Message> {
        self.messages.remove(artifact).map(|(_, message)| message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Build a fresh artifact: 2-byte type header `[0, 4]`, 2-byte big-endian
/// endpoint index, SHA-1 of the issuer entity id, 20 random bytes of
/// message handle.
pub fn create_artifact(issuer: &EntityId, endpoint_index: u16) -> SamlResult<[u8; ARTIFACT_LENGTH]> {
    let mut artifact = [0u8; ARTIFACT_LENGTH];
    artifact[0] = 0;
    artifact[1] = 4;
    artifact[2..4].copy_from_slice(&endpoint_index.to_be_bytes());

    let source_id = openssl::hash::hash(MessageDigest::sha1(), issuer.as_str().as_bytes())
        .map_err(|e| SamlError::config(format!("SourceID computation failed: {e}")))?;
    artifact[4..24].copy_from_slice(&source_id);

    OsRng.fill_bytes(&mut artifact[24..44]);
    Ok(artifact)
}

pub struct ArtifactBinding;

impl ArtifactBinding {
    /// The IdP that should resolve this artifact: the stored request
    /// state's issuer when present, otherwise the configured IdP whose
    /// entity-id hash matches the artifact SourceID.
    fn resolving_idp<'a>(
        request: &HttpRequestData,
        options: &'a Options,
        artifact: &[u8],
    ) -> SamlResult<&'a IdentityProvider> {
        if let Some(issuer) = request
            .stored_request_state
            .as_ref()
            .and_then(|state| state.idp.as_ref())
        {
            return options.identity_provider(issuer).ok_or_else(|| {
                SamlError::config(format!(
                    "The issuer \"{issuer}\" from the request state is not a known identity provider."
                ))
            });
        }

        let source_id = &artifact[4..24];
        options
            .identity_providers()
            .find(|idp| {
                openssl::hash::hash(MessageDigest::sha1(), idp.entity_id.as_str().as_bytes())
                    .map(|hash| hash.as_ref() == source_id)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                SamlError::config(
                    "No configured identity provider matches the artifact SourceID.".to_string(),
                )
            })
    }

    async fn resolve(
        artifact_b64: &str,
        idp: &IdentityProvider,
        options: &Options,
    ) -> SamlResult<XmlElement> {
        let endpoint = idp.artifact_resolution_service_url.as_ref().ok_or_else(|| {
            SamlError::config(format!(
                "Identity provider \"{}\" has no artifact resolution service configured.",
                idp.entity_id
            ))
        })?;

        let resolve_id = Saml2Id::generate();
        let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let mut resolve = String::new();
        resolve.push_str("<saml2p:ArtifactResolve xmlns:saml2p=\"urn:oasis:names:tc:SAML:2.0:protocol\" xmlns:saml2=\"urn:oasis:names:tc:SAML:2.0:assertion\" ID=\"");
        resolve.push_str(resolve_id.as_str());
        resolve.push_str("\" Version=\"2.0\" IssueInstant=\"");
        resolve.push_str(&issue_instant.to_string());
        resolve.push_str("\"><saml2:Issuer>");
        resolve.push_str(&escape_text(options.sp.entity_id.as_str()));
        resolve.push_str("</saml2:Issuer><saml2p:Artifact>");
        resolve.push_str(artifact_b64);
        resolve.push_str("</saml2p:Artifact></saml2p:ArtifactResolve>");

        // Sign the resolve request when the SP has a service certificate.
        let resolve = match options.sp.service_certificates.first() {
            Some(credentials) => sign_enveloped(&resolve, credentials)?,
            None => resolve,
        };

        let envelope = format!(
            "<SOAP-ENV:Envelope xmlns:SOAP-ENV=\"http://schemas.xmlsoap.org/soap/envelope/\"><SOAP-ENV:Body>{resolve}</SOAP-ENV:Body></SOAP-ENV:Envelope>"
        );

        tracing::debug!(endpoint = %endpoint, idp = %idp.entity_id, "resolving artifact");

        let response = reqwest::Client::new()
            .post(endpoint.clone())
            .header("SOAPAction", ARTIFACT_RESOLUTION_SOAP_ACTION)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .body(envelope)
            .send()
            .await
            .map_err(|e| SamlError::validation(format!("Artifact resolution failed: {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| SamlError::validation(format!("Artifact resolution failed: {e}")))?;

        extract_resolved_message(&body)
    }
}

/// Pull the enclosed message out of an ArtifactResponse SOAP envelope.
fn extract_resolved_message(body: &str) -> SamlResult<XmlElement> {
    let envelope = XmlElement::parse(body)
        .map_err(|e| SamlError::validation(format!("Artifact response is not valid XML: {e}")))?;
    let artifact_response = envelope
        .child(SOAP_ENV_NS, "Body")
        .and_then(|b| b.child(SAML2P_NS, "ArtifactResponse"))
        .ok_or_else(|| {
            SamlError::validation("Artifact response contains no ArtifactResponse element")
        })?;

    let status = artifact_response
        .child(SAML2P_NS, "Status")
        .and_then(|s| s.child(SAML2P_NS, "StatusCode"))
        .and_then(|c| c.attribute("Value"));
    if let Some(value) = status {
        if value != "urn:oasis:names:tc:SAML:2.0:status:Success" {
            return Err(SamlError::validation(format!(
                "Artifact resolution returned status {value}"
            )));
        }
    }

    let message = artifact_response
        .elements()
        .find(|e| {
            !e.is_named(SAML2_NS, "Issuer")
                && !e.is_named(SAML2P_NS, "Status")
                && !e.is_named(DSIG_NS, "Signature")
        })
        .cloned()
        .ok_or_else(|| SamlError::validation("Artifact response contained no message"));
    message
}

#[async_trait]
impl Binding for ArtifactBinding {
    fn kind(&self) -> BindingKind {
        BindingKind::Artifact
    }

    fn can_unbind(&self, request: &HttpRequestData) -> bool {
        request.query_param("SAMLart").is_some() || request.form_value("SAMLart").is_some()
    }

    async fn unbind(
        &self,
        request: &HttpRequestData,
        options: &Options,
    ) -> SamlResult<UnbindResult> {
        let (artifact_b64, relay_state) = if request.http_method == Method::GET {
            (
                request.query_param("SAMLart"),
                request.query_param("RelayState"),
            )
        } else if request.http_method == Method::POST {
            (
                request.form_value("SAMLart").map(str::to_string),
                request.form_value("RelayState").map(str::to_string),
            )
        } else {
            return Err(SamlError::invalid_operation(format!(
                "Artifact binding can only use GET or POST http method, but found {}",
                request.http_method
            )));
        };
        let artifact_b64 = artifact_b64
            .ok_or_else(|| SamlError::malformed("No SAMLart parameter found in the request"))?;

        let artifact = STANDARD
            .decode(artifact_b64.as_bytes())
            .map_err(|e| SamlError::malformed(format!("Artifact is not valid base64: {e}")))?;
        if artifact.len() != ARTIFACT_LENGTH {
            return Err(SamlError::malformed(format!(
                "Artifact length is {}, expected {ARTIFACT_LENGTH}",
                artifact.len()
            )));
        }

        let idp = Self::resolving_idp(request, options, &artifact)?;
        let data = Self::resolve(&artifact_b64, idp, options).await?;

        Ok(UnbindResult {
            data,
            relay_state,
            trust_level: TrustLevel::None,
        })
    }

    fn bind(&self, message: &Saml2Message, options: &Options) -> SamlResult<CommandResult> {
        let issuer = message.issuer.as_ref().ok_or_else(|| {
            SamlError::invalid_operation("Artifact binding requires an issuer on the message")
        })?;

        let artifact = create_artifact(issuer, 0)?;
        options
            .pending_messages()
            .insert(artifact.to_vec(), message.clone());

        let mut location = message.destination_url.to_string();
        location.push(if message.destination_url.query().is_some() {
            '&'
        } else {
            '?'
        });
        location.push_str("SAMLart=");
        location.push_str(&urlencoding::encode(&STANDARD.encode(artifact)));
        if let Some(relay_state) = &message.relay_state {
            location.push_str("&RelayState=");
            location.push_str(&urlencoding::encode(relay_state));
        }

        let location = Url::parse(&location)
            .map_err(|e| SamlError::config(format!("Destination url error: {e}")))?;
        Ok(CommandResult::redirect(location))
    }
}
