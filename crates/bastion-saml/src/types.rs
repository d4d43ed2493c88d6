//! Wire-level value types shared across bindings, validator and ACS.

use crate::claims::ClaimsPrincipal;
use crate::crypto::keys::SigningCredentials;
use crate::xml::XmlElement;
use chrono::{DateTime, Utc};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Cookie-name prefix for cookie-stored request state, suffixed with the
/// relay state the cookie was keyed by.
pub const STATE_COOKIE_PREFIX: &str = "Saml2Request.";

/// Opaque identifier naming a protocol participant (IdP or SP).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque protocol message/assertion identifier, used for InResponseTo
/// correlation and replay keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Saml2Id(String);

impl Saml2Id {
    pub fn new(id: impl Into<String>) -> Self {
        Saml2Id(id.into())
    }

    /// Fresh identifier for an outbound message. Leading underscore keeps
    /// the value a valid XML NCName regardless of the uuid's first digit.
    pub fn generate() -> Self {
        Saml2Id(format!("_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Saml2Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-level trust asserted by a binding for the payload it decoded.
///
/// The bindings in this crate never vouch for their payload; the payload's
/// own signature is what gets checked downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    None,
}

/// Immutable snapshot of an inbound HTTP request, supplied by a
/// hosting-framework adapter. Constructed once per request and owned by
/// the caller for the request's lifetime.
#[derive(Debug, Clone)]
pub struct HttpRequestData {
    pub http_method: Method,
    pub url: Url,
    /// Application base path, e.g. `/Saml2`.
    pub application_path: String,
    /// Form fields as an ordered multimap; repeated names are legal.
    pub form: Vec<(String, Vec<String>)>,
    pub cookies: HashMap<String, String>,
    /// Request state already decrypted from its cookie by a collaborator.
    pub stored_request_state: Option<StoredRequestState>,
    /// A principal already established by the hosting pipeline, if any.
    pub user: Option<ClaimsPrincipal>,
}

impl HttpRequestData {
    pub fn new(http_method: Method, url: Url) -> Self {
        HttpRequestData {
            http_method,
            url,
            application_path: String::from("/"),
            form: Vec::new(),
            cookies: HashMap::new(),
            stored_request_state: None,
            user: None,
        }
    }

    /// First value of a query parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// First value of a form field.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }
}

/// Correlates an SP-initiated authentication request with its eventual
/// response. Created when the request is issued, read-only when the
/// matching response arrives. A collaborator round-trips it through an
/// encrypted cookie, hence the serde derives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRequestState {
    /// Issuing IdP; unsolicited flows lack it.
    pub idp: Option<EntityId>,
    pub return_url: Option<Url>,
    pub message_id: Option<Saml2Id>,
    pub relay_data: Option<String>,
}

impl StoredRequestState {
    pub fn new(
        idp: Option<EntityId>,
        return_url: Option<Url>,
        message_id: Option<Saml2Id>,
        relay_data: Option<String>,
    ) -> Self {
        StoredRequestState {
            idp,
            return_url,
            message_id,
            relay_data,
        }
    }
}

/// Outcome of unbinding an inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct UnbindResult {
    /// Decoded payload element.
    pub data: XmlElement,
    pub relay_state: Option<String>,
    pub trust_level: TrustLevel,
}

/// HTTP-level instruction handed back to the hosting-framework adapter:
/// either a redirect or a body response, plus the resulting principal and
/// session metadata.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub http_status_code: Option<StatusCode>,
    pub location: Option<Url>,
    pub content: Option<String>,
    pub content_type: Option<String>,
    pub principal: Option<ClaimsPrincipal>,
    pub session_not_on_or_after: Option<DateTime<Utc>>,
    pub clear_cookie_name: Option<String>,
}

impl CommandResult {
    pub fn redirect(location: Url) -> Self {
        CommandResult {
            http_status_code: Some(StatusCode::SEE_OTHER),
            location: Some(location),
            ..CommandResult::default()
        }
    }

    pub fn html(content: String) -> Self {
        CommandResult {
            http_status_code: Some(StatusCode::OK),
            content: Some(content),
            content_type: Some(String::from("text/html")),
            ..CommandResult::default()
        }
    }
}

/// Outbound message envelope handed to a binding's `bind`.
#[derive(Debug, Clone)]
pub struct Saml2Message {
    pub destination_url: Url,
    /// Serialized payload XML.
    pub xml_data: String,
    /// Wire parameter name the payload travels under, `SAMLRequest` or
    /// `SAMLResponse`.
    pub message_name: String,
    pub relay_state: Option<String>,
    pub issuer: Option<EntityId>,
    /// When set, the payload is signed before encoding.
    pub signing_credentials: Option<SigningCredentials>,
}

impl Saml2Message {
    pub fn new(destination_url: Url, xml_data: String, message_name: impl Into<String>) -> Self {
        Saml2Message {
            destination_url,
            xml_data,
            message_name: message_name.into(),
            relay_state: None,
            issuer: None,
            signing_credentials: None,
        }
    }
}
