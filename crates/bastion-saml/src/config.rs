//! Service-provider configuration.
//!
//! Configuration is mutated during a distinct setup phase and read-only
//! during request processing; this crate does not lock it. The two pieces
//! of shared mutable state the pipeline touches — the replay cache and the
//! pending artifact-message store — are owned by the `Options` instance so
//! per-tenant and per-test isolation is explicit.

use crate::bindings::artifact::PendingMessageStore;
use crate::bindings::Binding;
use crate::crypto::keys::SigningCredentials;
use crate::replay::ReplayCache;
use crate::response::Saml2Response;
use crate::types::{CommandResult, EntityId, HttpRequestData, UnbindResult};
use openssl::x509::X509;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Whether assertion audience restrictions are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudienceRestrictionMode {
    /// Enforce the restriction whenever an assertion declares one.
    #[default]
    Always,
    /// Skip the check entirely.
    Never,
}

/// A trusted identity provider.
#[derive(Clone)]
pub struct IdentityProvider {
    pub entity_id: EntityId,
    /// Ordered trusted signing certificates; each is tried in turn, which
    /// is what makes key rollover work.
    pub signing_keys: Vec<X509>,
    pub allow_unsolicited_authn_response: bool,
    pub artifact_resolution_service_url: Option<Url>,
}

impl std::fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProvider")
            .field("entity_id", &self.entity_id)
            .field("signing_keys", &self.signing_keys.len())
            .field(
                "allow_unsolicited_authn_response",
                &self.allow_unsolicited_authn_response,
            )
            .field(
                "artifact_resolution_service_url",
                &self.artifact_resolution_service_url,
            )
            .finish()
    }
}

impl IdentityProvider {
    pub fn new(entity_id: EntityId) -> Self {
        IdentityProvider {
            entity_id,
            signing_keys: Vec::new(),
            allow_unsolicited_authn_response: false,
            artifact_resolution_service_url: None,
        }
    }

    pub fn add_signing_key(&mut self, certificate: X509) {
        self.signing_keys.push(certificate);
    }
}

/// SP-wide settings.
#[derive(Debug, Clone)]
pub struct SpOptions {
    pub entity_id: EntityId,
    /// Where to send the browser after a login that carries no stored
    /// return URL.
    pub return_url: Option<Url>,
    /// Ordered service certificates; decryption tries each in turn.
    pub service_certificates: Vec<SigningCredentials>,
    /// Chain/revocation validation of signing certificates. Normally off:
    /// SAML trust comes from key pinning, not PKI.
    pub validate_certificates: bool,
    pub audience_restriction: AudienceRestrictionMode,
}

impl SpOptions {
    pub fn new(entity_id: EntityId) -> Self {
        SpOptions {
            entity_id,
            return_url: None,
            service_certificates: Vec::new(),
            validate_certificates: false,
            audience_restriction: AudienceRestrictionMode::default(),
        }
    }
}

/// Lifecycle hooks the ACS orchestrator fires while processing a response.
///
/// Held by reference with default no-op implementations, so tests and
/// embedders can substitute behavior without global patching.
pub trait AcsNotification: Send + Sync {
    /// Override binding selection; `None` falls back to probing each
    /// binding in turn.
    fn select_binding(&self, _request: &HttpRequestData) -> Option<Arc<dyn Binding>> {
        None
    }

    /// Fired with the raw unbound result before validation.
    fn message_unbound(&self, _result: &UnbindResult) {}

    /// Fired with the finished command result and the parsed response.
    fn acs_command_result_created(&self, _result: &CommandResult, _response: &Saml2Response) {}
}

/// The default, do-nothing notification set.
pub struct NoopNotification;

impl AcsNotification for NoopNotification {}

/// Everything request processing needs: SP settings, the IdP registry,
/// notification hooks, and the two shared stores scoped to this instance.
pub struct Options {
    pub sp: SpOptions,
    identity_providers: HashMap<EntityId, IdentityProvider>,
    pub notifications: Arc<dyn AcsNotification>,
    replay_cache: ReplayCache,
    pending_messages: PendingMessageStore,
}

impl Options {
    pub fn new(sp: SpOptions) -> Self {
        Options {
            sp,
            identity_providers: HashMap::new(),
            notifications: Arc::new(NoopNotification),
            replay_cache: ReplayCache::new(),
            pending_messages: PendingMessageStore::new(),
        }
    }

    pub fn add_identity_provider(&mut self, idp: IdentityProvider) {
        self.identity_providers.insert(idp.entity_id.clone(), idp);
    }

    pub fn identity_provider(&self, entity_id: &EntityId) -> Option<&IdentityProvider> {
        self.identity_providers.get(entity_id)
    }

    pub fn identity_providers(&self) -> impl Iterator<Item = &IdentityProvider> {
        self.identity_providers.values()
    }

    pub fn replay_cache(&self) -> &ReplayCache {
        &self.replay_cache
    }

    pub fn pending_messages(&self) -> &PendingMessageStore {
        &self.pending_messages
    }
}
