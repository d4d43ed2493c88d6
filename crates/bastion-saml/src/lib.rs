//! Service-provider side of the SAML2 Web Browser SSO profile.
//!
//! This crate provides the protocol core an SP needs to accept identity
//! provider responses:
//! - The three wire bindings (HTTP-Redirect, HTTP-POST, HTTP-Artifact
//!   with synchronous artifact resolution)
//! - Response security validation: XML signature verification with
//!   anti-wrapping defenses, assertion decryption, replay detection,
//!   temporal and audience validation, InResponseTo correlation and the
//!   unsolicited-response policy
//! - The Assertion Consumer Service orchestrator tying unbinding,
//!   validation, claims extraction and result construction together
//!
//! Hosting-framework adapters translate their native request/response
//! objects into [`HttpRequestData`] and [`CommandResult`]; everything in
//! between is handled here.

pub mod acs;
pub mod bindings;
pub mod claims;
pub mod config;
pub mod crypto;
pub mod error;
pub mod replay;
pub mod response;
pub mod types;
pub mod xml;

pub use acs::AcsCommand;
pub use bindings::artifact::{create_artifact, PendingMessageStore};
pub use bindings::{Binding, BindingKind};
pub use claims::{claim_types, Claim, ClaimsIdentity, ClaimsPrincipal};
pub use config::{
    AcsNotification, AudienceRestrictionMode, IdentityProvider, NoopNotification, Options,
    SpOptions,
};
pub use crypto::keys::SigningCredentials;
pub use error::{SamlError, SamlResult};
pub use replay::ReplayCache;
pub use response::{Saml2Response, Saml2StatusCode};
pub use types::{
    CommandResult, EntityId, HttpRequestData, Saml2Id, Saml2Message, StoredRequestState,
    TrustLevel, UnbindResult, STATE_COOKIE_PREFIX,
};
