//! SAML2 Response parsing, security validation and construction.

use crate::claims::{claim_types, Claim, ClaimsIdentity};
use crate::config::{AudienceRestrictionMode, Options};
use crate::crypto::decrypt::decrypt_assertion;
use crate::crypto::keys::SigningCredentials;
use crate::crypto::signature::{sign_enveloped, verify_enveloped};
use crate::error::{SamlError, SamlResult};
use crate::types::{EntityId, Saml2Id};
use crate::xml::{escape_attr, escape_text, XmlElement, SAML2P_NS, SAML2_NS};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::OnceLock;
use url::Url;

/// Wire parameter name a response travels under.
pub const MESSAGE_NAME: &str = "SAMLResponse";

const STATUS_URI_PREFIX: &str = "urn:oasis:names:tc:SAML:2.0:status:";
const NOT_SIGNED_MESSAGE: &str =
    "The SAML Response is not signed and contains unsigned Assertions. Response cannot be trusted.";

/// Validity window stamped on assertions this crate constructs.
const ASSERTION_VALIDITY_SECONDS: i64 = 300;

/// Top-level SAML2 status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Saml2StatusCode {
    Success,
    Requester,
    Responder,
    VersionMismatch,
}

impl Saml2StatusCode {
    /// Parse from the trailing segment of the status URN.
    pub fn from_uri(uri: &str) -> Option<Saml2StatusCode> {
        match uri.strip_prefix(STATUS_URI_PREFIX)? {
            "Success" => Some(Saml2StatusCode::Success),
            "Requester" => Some(Saml2StatusCode::Requester),
            "Responder" => Some(Saml2StatusCode::Responder),
            "VersionMismatch" => Some(Saml2StatusCode::VersionMismatch),
            _ => None,
        }
    }
}

impl fmt::Display for Saml2StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Saml2StatusCode::Success => "Success",
            Saml2StatusCode::Requester => "Requester",
            Saml2StatusCode::Responder => "Responder",
            Saml2StatusCode::VersionMismatch => "VersionMismatch",
        };
        f.write_str(name)
    }
}

/// Cached outcome of the first validation.
#[derive(Debug, Clone)]
struct ValidatedSession {
    identities: Vec<ClaimsIdentity>,
    session_not_on_or_after: Option<DateTime<Utc>>,
}

/// A parsed IdP response.
///
/// Immutable after `read`, except for the validation result which is
/// computed exactly once on the first `get_claims` call and set through an
/// atomic set-once cell: identical inputs on a second call return the
/// cached outcome without re-running cryptographic or replay checks. That
/// matters for failures too — a tampered response keeps reporting its
/// signature failure instead of degrading into replay-detected on retry.
pub struct Saml2Response {
    id: Saml2Id,
    issue_instant: DateTime<Utc>,
    status: Saml2StatusCode,
    status_message: Option<String>,
    second_level_status: Option<String>,
    issuer: Option<EntityId>,
    destination_url: Option<Url>,
    in_response_to: Option<Saml2Id>,
    relay_state: Option<String>,
    source_xml: String,
    element: XmlElement,
    validation: OnceLock<Result<ValidatedSession, SamlError>>,
}

impl fmt::Debug for Saml2Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Saml2Response")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("issuer", &self.issuer)
            .field("in_response_to", &self.in_response_to)
            .finish_non_exhaustive()
    }
}

fn parse_saml_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SamlError::malformed(format!("Invalid timestamp \"{value}\": {e}")))
}

impl Saml2Response {
    /// Parse a response document and correlate it against the id of the
    /// request it is expected to answer, if any.
    pub fn read(xml: &str, expected_in_response_to: Option<&Saml2Id>) -> SamlResult<Saml2Response> {
        let element = XmlElement::parse(xml).map_err(SamlError::malformed)?;

        if !element.is_named(SAML2P_NS, "Response") {
            return Err(SamlError::malformed("Expected a SAML2 assertion document"));
        }
        if element.attribute("Version") != Some("2.0") {
            return Err(SamlError::malformed("Wrong or unsupported SAML2 version"));
        }

        let id = element
            .attribute("ID")
            .map(Saml2Id::new)
            .ok_or_else(|| SamlError::malformed("Response is missing the ID attribute"))?;
        let issue_instant = element
            .attribute("IssueInstant")
            .ok_or_else(|| SamlError::malformed("Response is missing the IssueInstant attribute"))
            .and_then(parse_saml_instant)?;

        let destination_url = match element.attribute("Destination") {
            Some(value) => Some(
                Url::parse(value)
                    .map_err(|_| SamlError::validation("Destination value was not a valid Uri"))?,
            ),
            None => None,
        };

        let in_response_to = element.attribute("InResponseTo").map(Saml2Id::new);
        match (&in_response_to, expected_in_response_to) {
            (None, Some(expected)) => {
                return Err(SamlError::validation(format!(
                    "Expected message to contain InResponseTo \"{expected}\", but found none."
                )));
            }
            (Some(received), None) => {
                return Err(SamlError::UnexpectedInResponseTo {
                    in_response_to: received.as_str().to_string(),
                });
            }
            (Some(received), Some(expected)) if received != expected => {
                return Err(SamlError::validation(format!(
                    "InResponseTo Id \"{received}\" in received response does not match Id \"{expected}\" of the sent request."
                )));
            }
            _ => {}
        }

        let status_element = element
            .child(SAML2P_NS, "Status")
            .ok_or_else(|| SamlError::malformed("Response contains no Status element"))?;
        let status_code = status_element
            .child(SAML2P_NS, "StatusCode")
            .ok_or_else(|| SamlError::malformed("Status contains no StatusCode element"))?;
        let status_uri = status_code.attribute("Value").unwrap_or_default();
        let status = Saml2StatusCode::from_uri(status_uri)
            .ok_or_else(|| SamlError::malformed(format!("Unknown status code \"{status_uri}\"")))?;
        let status_message = status_element
            .child(SAML2P_NS, "StatusMessage")
            .map(|m| m.text());
        let second_level_status = status_code
            .child(SAML2P_NS, "StatusCode")
            .and_then(|c| c.attribute("Value"))
            .map(str::to_string);

        let issuer = element
            .child(SAML2_NS, "Issuer")
            .map(|i| i.text())
            .filter(|t| !t.is_empty())
            .map(EntityId::new);

        Ok(Saml2Response {
            id,
            issue_instant,
            status,
            status_message,
            second_level_status,
            issuer,
            destination_url,
            in_response_to,
            relay_state: None,
            source_xml: xml.to_string(),
            element,
            validation: OnceLock::new(),
        })
    }

    /// Construct a response from data, for the IdP role in testing and
    /// interop scenarios: Success status, a fresh id, `IssueInstant` now,
    /// one assertion per identity, signed when credentials are given.
    #[allow(clippy::too_many_arguments)]
    pub fn from_data(
        issuer: EntityId,
        signing_credentials: Option<&SigningCredentials>,
        destination_url: Option<Url>,
        in_response_to: Option<Saml2Id>,
        audience: Option<&EntityId>,
        relay_state: Option<String>,
        identities: Vec<ClaimsIdentity>,
    ) -> SamlResult<Saml2Response> {
        let id = Saml2Id::generate();
        let now = Utc::now();
        let issue_instant = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let not_on_or_after = (now + Duration::seconds(ASSERTION_VALIDITY_SECONDS))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();

        let mut xml = String::new();
        xml.push_str("<saml2p:Response xmlns:saml2p=\"urn:oasis:names:tc:SAML:2.0:protocol\" xmlns:saml2=\"urn:oasis:names:tc:SAML:2.0:assertion\" ID=\"");
        xml.push_str(&escape_attr(id.as_str()));
        xml.push_str("\" Version=\"2.0\" IssueInstant=\"");
        xml.push_str(&issue_instant);
        xml.push('"');
        if let Some(destination) = &destination_url {
            xml.push_str(" Destination=\"");
            xml.push_str(&escape_attr(destination.as_str()));
            xml.push('"');
        }
        if let Some(in_response_to) = &in_response_to {
            xml.push_str(" InResponseTo=\"");
            xml.push_str(&escape_attr(in_response_to.as_str()));
            xml.push('"');
        }
        xml.push_str("><saml2:Issuer>");
        xml.push_str(&escape_text(issuer.as_str()));
        xml.push_str("</saml2:Issuer><saml2p:Status><saml2p:StatusCode Value=\"urn:oasis:names:tc:SAML:2.0:status:Success\"/></saml2p:Status>");

        for identity in &identities {
            let name_id = identity.name_identifier().ok_or_else(|| {
                SamlError::invalid_operation("Identity contains no name identifier claim")
            })?;
            xml.push_str("<saml2:Assertion ID=\"");
            xml.push_str(&escape_attr(Saml2Id::generate().as_str()));
            xml.push_str("\" Version=\"2.0\" IssueInstant=\"");
            xml.push_str(&issue_instant);
            xml.push_str("\"><saml2:Issuer>");
            xml.push_str(&escape_text(issuer.as_str()));
            xml.push_str("</saml2:Issuer><saml2:Subject><saml2:NameID>");
            xml.push_str(&escape_text(name_id));
            xml.push_str("</saml2:NameID><saml2:SubjectConfirmation Method=\"urn:oasis:names:tc:SAML:2.0:cm:bearer\"/></saml2:Subject><saml2:Conditions NotOnOrAfter=\"");
            xml.push_str(&not_on_or_after);
            xml.push('"');
            match audience {
                Some(audience) => {
                    xml.push_str("><saml2:AudienceRestriction><saml2:Audience>");
                    xml.push_str(&escape_text(audience.as_str()));
                    xml.push_str("</saml2:Audience></saml2:AudienceRestriction></saml2:Conditions>");
                }
                None => xml.push_str("/>"),
            }
            xml.push_str("</saml2:Assertion>");
        }
        xml.push_str("</saml2p:Response>");

        let xml = match signing_credentials {
            Some(credentials) => sign_enveloped(&xml, credentials)?,
            None => xml,
        };

        let element = XmlElement::parse(&xml).map_err(SamlError::malformed)?;

        // A constructed response is trusted by its creator: its claims are
        // the identities it was built from, no validation round-trip.
        let validation = OnceLock::new();
        let _ = validation.set(Ok(ValidatedSession {
            identities,
            session_not_on_or_after: None,
        }));

        Ok(Saml2Response {
            id,
            issue_instant: now,
            status: Saml2StatusCode::Success,
            status_message: None,
            second_level_status: None,
            issuer: Some(issuer),
            destination_url,
            in_response_to,
            relay_state,
            source_xml: xml,
            element,
            validation,
        })
    }

    pub fn id(&self) -> &Saml2Id {
        &self.id
    }

    pub fn issue_instant(&self) -> DateTime<Utc> {
        self.issue_instant
    }

    pub fn status(&self) -> Saml2StatusCode {
        self.status
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn second_level_status(&self) -> Option<&str> {
        self.second_level_status.as_deref()
    }

    pub fn issuer(&self) -> Option<&EntityId> {
        self.issuer.as_ref()
    }

    pub fn destination_url(&self) -> Option<&Url> {
        self.destination_url.as_ref()
    }

    pub fn in_response_to(&self) -> Option<&Saml2Id> {
        self.in_response_to.as_ref()
    }

    pub fn relay_state(&self) -> Option<&str> {
        self.relay_state.as_deref()
    }

    pub fn message_name(&self) -> &'static str {
        MESSAGE_NAME
    }

    pub fn xml_element(&self) -> &XmlElement {
        &self.element
    }

    /// The exact source document for read responses, the built document
    /// for constructed ones.
    pub fn to_xml(&self) -> &str {
        &self.source_xml
    }

    /// Validate the response and produce one identity per assertion.
    ///
    /// Idempotent: the first call computes and caches the outcome, later
    /// calls return it unchanged.
    pub fn get_claims(&self, options: &Options) -> SamlResult<Vec<ClaimsIdentity>> {
        if let Some(outcome) = self.validation.get() {
            return outcome.clone().map(|session| session.identities);
        }
        let outcome = self.validate(options);
        let outcome = self.validation.get_or_init(|| outcome);
        outcome.clone().map(|session| session.identities)
    }

    /// The earliest `SessionNotOnOrAfter` across the response's
    /// authentication statements, absent when none declares one. Only
    /// available once `get_claims` has run.
    pub fn session_not_on_or_after(&self) -> SamlResult<Option<DateTime<Utc>>> {
        match self.validation.get() {
            Some(Ok(session)) => Ok(session.session_not_on_or_after),
            Some(Err(e)) => Err(e.clone()),
            None => Err(SamlError::invalid_operation(
                "The SessionNotOnOrAfter value is only available after get_claims has been called.",
            )),
        }
    }

    fn validate(&self, options: &Options) -> Result<ValidatedSession, SamlError> {
        let issuer = self.issuer.as_ref().ok_or_else(|| {
            SamlError::validation("The response contains no Issuer; cannot establish trust.")
        })?;
        let idp = options.identity_provider(issuer).ok_or_else(|| {
            SamlError::validation(format!(
                "The issuer \"{issuer}\" is not a known identity provider."
            ))
        })?;

        // Unsolicited responses are only accepted from IdPs configured to
        // send them.
        if self.in_response_to.is_none() && !idp.allow_unsolicited_authn_response {
            return Err(SamlError::validation(format!(
                "Unsolicited responses are not allowed for idp \"{issuer}\"."
            )));
        }

        if self.status != Saml2StatusCode::Success {
            return Err(SamlError::UnsuccessfulSamlOperation {
                status: self.status,
                status_message: self.status_message.clone(),
                second_level_status: self.second_level_status.clone(),
            });
        }

        let response_signed = verify_enveloped(
            &self.element,
            &idp.signing_keys,
            options.sp.validate_certificates,
        )?;

        // Decrypt before the trust decision: a decrypted assertion still
        // has to present its own signature when the envelope is unsigned.
        let mut assertions = Vec::new();
        for child in self.element.elements() {
            if child.is_named(SAML2_NS, "Assertion") {
                assertions.push(child.clone());
            } else if child.is_named(SAML2_NS, "EncryptedAssertion") {
                assertions.push(decrypt_assertion(child, &options.sp.service_certificates)?);
            }
        }

        let mut all_signed = !assertions.is_empty();
        for assertion in &assertions {
            let signed = verify_enveloped(
                assertion,
                &idp.signing_keys,
                options.sp.validate_certificates,
            )?;
            all_signed &= signed;
        }

        if !response_signed && !all_signed {
            return Err(SamlError::validation(NOT_SIGNED_MESSAGE));
        }

        let now = Utc::now();
        let mut identities = Vec::new();
        let mut session_not_on_or_after: Option<DateTime<Utc>> = None;

        for assertion in &assertions {
            let assertion_id = assertion
                .attribute("ID")
                .ok_or_else(|| SamlError::malformed("Assertion is missing the ID attribute"))?;

            let conditions = assertion.child(SAML2_NS, "Conditions");
            let not_on_or_after = conditions
                .and_then(|c| c.attribute("NotOnOrAfter"))
                .map(parse_saml_instant)
                .transpose()?;
            if let Some(expiry) = not_on_or_after {
                if expiry <= now {
                    return Err(SamlError::validation(format!(
                        "The assertion \"{assertion_id}\" has expired: NotOnOrAfter was {expiry}."
                    )));
                }
            }

            if options.sp.audience_restriction == AudienceRestrictionMode::Always {
                if let Some(conditions) = conditions {
                    for restriction in conditions.children_named(SAML2_NS, "AudienceRestriction") {
                        let audiences: Vec<String> = restriction
                            .children_named(SAML2_NS, "Audience")
                            .map(|a| a.text())
                            .collect();
                        if !audiences.iter().any(|a| a == options.sp.entity_id.as_str()) {
                            return Err(SamlError::AudienceValidationFailed { audiences });
                        }
                    }
                }
            }

            let replay_expiry =
                not_on_or_after.unwrap_or_else(|| now + Duration::seconds(ASSERTION_VALIDITY_SECONDS));
            if !options.replay_cache().register(assertion_id, replay_expiry) {
                return Err(SamlError::ReplayDetected {
                    assertion_id: assertion_id.to_string(),
                });
            }

            identities.push(build_identity(assertion, &mut session_not_on_or_after)?);
        }

        tracing::info!(
            response_id = %self.id,
            issuer = %issuer,
            assertions = identities.len(),
            "SAML response validated"
        );

        Ok(ValidatedSession {
            identities,
            session_not_on_or_after,
        })
    }
}

/// One identity per assertion, carrying the subject name identifier and,
/// when an `AuthnStatement` is present, the composite logout name
/// identifier and the session index.
fn build_identity(
    assertion: &XmlElement,
    session_not_on_or_after: &mut Option<DateTime<Utc>>,
) -> SamlResult<ClaimsIdentity> {
    let assertion_issuer = assertion
        .child(SAML2_NS, "Issuer")
        .map(|i| i.text())
        .filter(|t| !t.is_empty());

    let name_id = assertion
        .child(SAML2_NS, "Subject")
        .and_then(|s| s.child(SAML2_NS, "NameID"))
        .ok_or_else(|| SamlError::validation("Assertion contains no Subject/NameID"))?;
    let name_id_value = name_id.text();

    let mut claims = vec![Claim::new(
        claim_types::NAME_IDENTIFIER,
        name_id_value.clone(),
        assertion_issuer.clone(),
    )];

    if let Some(authn_statement) = assertion.child(SAML2_NS, "AuthnStatement") {
        // Comma-joined logout identifier; empty components keep their slot.
        let logout_name_id = [
            name_id.attribute("NameQualifier").unwrap_or_default(),
            name_id.attribute("SPNameQualifier").unwrap_or_default(),
            name_id.attribute("Format").unwrap_or_default(),
            name_id.attribute("SPProvidedID").unwrap_or_default(),
            name_id_value.as_str(),
        ]
        .join(",");
        claims.push(Claim::new(
            claim_types::LOGOUT_NAME_IDENTIFIER,
            logout_name_id,
            assertion_issuer.clone(),
        ));

        if let Some(session_index) = authn_statement.attribute("SessionIndex") {
            claims.push(Claim::new(
                claim_types::SESSION_INDEX,
                session_index,
                assertion_issuer.clone(),
            ));
        }

        if let Some(value) = authn_statement.attribute("SessionNotOnOrAfter") {
            let expiry = parse_saml_instant(value)?;
            *session_not_on_or_after = Some(match *session_not_on_or_after {
                Some(current) => current.min(expiry),
                None => expiry,
            });
        }
    }

    Ok(ClaimsIdentity::new(claims))
}
