//! SAML-specific error types

use crate::response::Saml2StatusCode;
use thiserror::Error;

/// Result type for SAML operations
pub type SamlResult<T> = Result<T, SamlError>;

/// SAML-specific errors.
///
/// Every variant is a terminal, local failure; nothing in this crate retries
/// on its own. Variants carry enough structured context (offending id,
/// status code, raw payload) for the caller to log or display without
/// re-parsing the message. The enum is `Clone` because a response's first
/// validation outcome is cached and handed back verbatim on later calls.
#[derive(Debug, Error, Clone)]
pub enum SamlError {
    /// Payload could not be decoded: not well-formed XML, wrong root
    /// element or version, or invalid base64.
    #[error("{message}")]
    MalformedMessage { message: String },

    /// A malformed payload reached the ACS endpoint. Wraps the underlying
    /// decode failure and attaches the offending payload for diagnostics.
    #[error("{message}")]
    BadFormatSamlResponse {
        message: String,
        payload: Option<String>,
    },

    /// Business-rule violation: InResponseTo mismatch, unsigned assertions,
    /// decryption failure, unsolicited-response policy, expiry, unknown
    /// issuer, artifact resolution failure.
    #[error("{message}")]
    ValidationFailed { message: String },

    /// The message carries an InResponseTo but no request was pending.
    #[error("Received message contains unexpected InResponseTo \"{in_response_to}\". No request state was found matching this response, so the message was not expected to have an InResponseTo attribute.")]
    UnexpectedInResponseTo { in_response_to: String },

    /// The response status was not Success.
    #[error("The Saml2Response must have status success to extract claims. Status: {status}.{}", .status_message.as_ref().map(|m| format!(" Message: {m}.")).unwrap_or_default())]
    UnsuccessfulSamlOperation {
        status: Saml2StatusCode,
        status_message: Option<String>,
        second_level_status: Option<String>,
    },

    /// Cryptographic or trust failure on an XML signature, including the
    /// anti-wrapping reference check and certificate-chain validation.
    #[error("{message}")]
    InvalidSignature { message: String },

    /// The assertion declares an audience restriction that does not contain
    /// the SP's entity id.
    #[error("The assertion's audience restriction does not contain the SP entity id. Audiences in the assertion: {}", .audiences.join(", "))]
    AudienceValidationFailed { audiences: Vec<String> },

    /// The assertion id has already been consumed under this configuration.
    #[error("Replay detected. The assertion id \"{assertion_id}\" has already been used.")]
    ReplayDetected { assertion_id: String },

    /// No binding recognized a SAML payload in the inbound request.
    #[error("No Saml2 Response found in the http request.")]
    NoSamlResponseFound,

    /// The service provider configuration cannot support the flow:
    /// missing return URL, missing resolution endpoint, unknown artifact
    /// source.
    #[error("{message}")]
    ConfigurationError { message: String },

    /// The operation is not valid in the object's current state, e.g. an
    /// artifact carried on a non-GET/POST method, or reading the session
    /// expiry before claims extraction.
    #[error("{message}")]
    InvalidOperation { message: String },

    /// Reserved for stub bindings and adapter-level status mapping.
    #[error("{message}")]
    NotImplemented { message: String },
}

impl SamlError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        SamlError::MalformedMessage {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        SamlError::ValidationFailed {
            message: message.into(),
        }
    }

    pub(crate) fn signature(message: impl Into<String>) -> Self {
        SamlError::InvalidSignature {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        SamlError::ConfigurationError {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        SamlError::InvalidOperation {
            message: message.into(),
        }
    }
}
