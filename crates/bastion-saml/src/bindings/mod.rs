//! Wire bindings for transporting SAML messages.
//!
//! A closed set of three codecs behind one capability interface, selected
//! by asking each in turn whether it recognizes the inbound request.

pub mod artifact;
pub mod post;
pub mod redirect;

use crate::config::Options;
use crate::error::SamlResult;
use crate::types::{CommandResult, HttpRequestData, Saml2Message, UnbindResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Recognized wire parameter names a SAML payload travels under.
pub(crate) const MESSAGE_PARAMETER_NAMES: [&str; 2] = ["SAMLResponse", "SAMLRequest"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Redirect,
    Post,
    Artifact,
}

/// A wire binding codec.
///
/// `unbind` is async because the artifact binding resolves its payload
/// over the network; the redirect and POST paths never suspend. `bind`
/// takes the options because the artifact binding stores the outbound
/// message in the Options-scoped pending store.
#[async_trait]
pub trait Binding: Send + Sync {
    fn kind(&self) -> BindingKind;

    /// Whether this binding can decode the request. Never mutates.
    fn can_unbind(&self, request: &HttpRequestData) -> bool;

    /// Decode the inbound request into the raw payload element plus relay
    /// state and transport trust level.
    async fn unbind(
        &self,
        request: &HttpRequestData,
        options: &Options,
    ) -> SamlResult<UnbindResult>;

    /// Encode an outbound message into an HTTP-level instruction.
    fn bind(&self, message: &Saml2Message, options: &Options) -> SamlResult<CommandResult>;
}

/// The binding for a kind.
pub fn get(kind: BindingKind) -> Arc<dyn Binding> {
    match kind {
        BindingKind::Redirect => Arc::new(redirect::RedirectBinding),
        BindingKind::Post => Arc::new(post::PostBinding),
        BindingKind::Artifact => Arc::new(artifact::ArtifactBinding),
    }
}

/// First binding that recognizes the request, probing in a fixed order.
pub fn for_request(request: &HttpRequestData) -> Option<Arc<dyn Binding>> {
    [BindingKind::Artifact, BindingKind::Post, BindingKind::Redirect]
        .into_iter()
        .map(get)
        .find(|b| b.can_unbind(request))
}
