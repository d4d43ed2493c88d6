//! Assertion Consumer Service orchestration: unbind, validate, correlate
//! and build the HTTP-level result that completes the login.

use crate::bindings;
use crate::claims::ClaimsPrincipal;
use crate::config::Options;
use crate::error::{SamlError, SamlResult};
use crate::response::Saml2Response;
use crate::types::{CommandResult, HttpRequestData, STATE_COOKIE_PREFIX};
use url::Url;

pub const BAD_FORMAT_XML_MESSAGE: &str = "The SAML response contains incorrect XML";

pub struct AcsCommand;

impl AcsCommand {
    /// Configuration failure message for an unsolicited response when no
    /// return URL is configured.
    pub const UNSOLICITED_MISSING_RETURN_URL_MESSAGE: &'static str = "Unsolicited authentication response received, but no ReturnUrl is configured. Add a ReturnUrl to the service provider options to accept unsolicited responses.";

    /// Configuration failure message for an SP-initiated response whose
    /// stored request state carries no return URL and no default is
    /// configured either.
    pub const SP_INITIATED_MISSING_RETURN_URL_MESSAGE: &'static str = "The response matched a pending authentication request, but the request state contains no return URL and the service provider has no ReturnUrl configured.";

    /// Process an inbound response: select a binding, unbind, validate,
    /// resolve the return URL and build the redirect completing the login.
    pub async fn run(request: &HttpRequestData, options: &Options) -> SamlResult<CommandResult> {
        let binding = options
            .notifications
            .select_binding(request)
            .or_else(|| bindings::for_request(request))
            .ok_or(SamlError::NoSamlResponseFound)?;

        let unbind_result = binding.unbind(request, options).await.map_err(|e| match e {
            SamlError::MalformedMessage { message } => SamlError::BadFormatSamlResponse {
                message,
                payload: None,
            },
            other => other,
        })?;
        options.notifications.message_unbound(&unbind_result);

        let xml = unbind_result.data.to_xml();
        let expected_in_response_to = request
            .stored_request_state
            .as_ref()
            .and_then(|state| state.message_id.as_ref());

        let response = Saml2Response::read(&xml, expected_in_response_to).map_err(|e| match e {
            SamlError::MalformedMessage { .. } => SamlError::BadFormatSamlResponse {
                message: BAD_FORMAT_XML_MESSAGE.to_string(),
                payload: Some(xml.clone()),
            },
            other => other,
        })?;

        let identities = response.get_claims(options)?;
        let session_not_on_or_after = response.session_not_on_or_after()?;

        let return_url = Self::resolve_return_url(request, options)?;

        let clear_cookie_name = request
            .stored_request_state
            .as_ref()
            .and(unbind_result.relay_state.as_ref())
            .map(|relay_state| format!("{STATE_COOKIE_PREFIX}{relay_state}"));

        let mut result = CommandResult::redirect(return_url);
        result.principal = Some(ClaimsPrincipal::new(identities));
        result.session_not_on_or_after = session_not_on_or_after;
        result.clear_cookie_name = clear_cookie_name;

        tracing::info!(
            response_id = %response.id(),
            location = %result.location.as_ref().map(Url::as_str).unwrap_or_default(),
            "ACS command completed"
        );
        options
            .notifications
            .acs_command_result_created(&result, &response);

        Ok(result)
    }

    /// Stored return URL first, then the configured default; failing both
    /// is a configuration error whose message depends on whether the
    /// response was solicited.
    fn resolve_return_url(request: &HttpRequestData, options: &Options) -> SamlResult<Url> {
        if let Some(url) = request
            .stored_request_state
            .as_ref()
            .and_then(|state| state.return_url.clone())
        {
            return Ok(url);
        }
        if let Some(url) = options.sp.return_url.clone() {
            return Ok(url);
        }
        if request.stored_request_state.is_some() {
            Err(SamlError::config(
                Self::SP_INITIATED_MISSING_RETURN_URL_MESSAGE,
            ))
        } else {
            Err(SamlError::config(
                Self::UNSOLICITED_MISSING_RETURN_URL_MESSAGE,
            ))
        }
    }
}
