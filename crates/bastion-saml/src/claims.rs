//! Claims produced from validated assertions.

use serde::{Deserialize, Serialize};

/// Claim type identifiers emitted by the response validator.
pub mod claim_types {
    /// The subject's name identifier.
    pub const NAME_IDENTIFIER: &str = "name-identifier";
    /// Composite identifier needed to later issue a logout request:
    /// comma-joined name qualifier, SP name qualifier, format, SP-provided
    /// id and the bare name id. Empty components keep their slot.
    pub const LOGOUT_NAME_IDENTIFIER: &str = "logout-name-identifier";
    /// The IdP session index from the assertion's `AuthnStatement`.
    pub const SESSION_INDEX: &str = "session-index";
}

/// Authentication type recorded on identities built from assertions.
pub const FEDERATION_AUTHENTICATION_TYPE: &str = "Federation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
    /// Entity id of the asserting party.
    pub issuer: Option<String>,
}

impl Claim {
    pub fn new(
        claim_type: impl Into<String>,
        value: impl Into<String>,
        issuer: Option<String>,
    ) -> Self {
        Claim {
            claim_type: claim_type.into(),
            value: value.into(),
            issuer,
        }
    }
}

/// One identity per validated assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimsIdentity {
    pub authentication_type: String,
    pub claims: Vec<Claim>,
}

impl ClaimsIdentity {
    pub fn new(claims: Vec<Claim>) -> Self {
        ClaimsIdentity {
            authentication_type: FEDERATION_AUTHENTICATION_TYPE.to_string(),
            claims,
        }
    }

    /// First claim of the given type, if any.
    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.claim_type == claim_type)
    }

    /// Value of the subject's name identifier claim.
    pub fn name_identifier(&self) -> Option<&str> {
        self.find_first(claim_types::NAME_IDENTIFIER)
            .map(|c| c.value.as_str())
    }
}

/// The authenticated principal: one identity per assertion in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimsPrincipal {
    pub identities: Vec<ClaimsIdentity>,
}

impl ClaimsPrincipal {
    pub fn new(identities: Vec<ClaimsIdentity>) -> Self {
        ClaimsPrincipal { identities }
    }
}
