//! HTTP-POST binding: base64 payload in a form field, delivered back to
//! the browser as an auto-submitting XHTML form.

use crate::bindings::{Binding, BindingKind, MESSAGE_PARAMETER_NAMES};
use crate::config::Options;
use crate::crypto::signature::sign_enveloped;
use crate::error::{SamlError, SamlResult};
use crate::types::{CommandResult, HttpRequestData, Saml2Message, TrustLevel, UnbindResult};
use crate::xml::{escape_attr, XmlElement};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};

pub(crate) const NOT_BASE64_MESSAGE: &str =
    "The SAML Response did not contain valid BASE64 encoded data.";

pub struct PostBinding;

impl PostBinding {
    fn payload_field<'a>(request: &'a HttpRequestData) -> Option<&'a str> {
        MESSAGE_PARAMETER_NAMES
            .iter()
            .find_map(|name| request.form_value(name))
    }
}

#[async_trait]
impl Binding for PostBinding {
    fn kind(&self) -> BindingKind {
        BindingKind::Post
    }

    fn can_unbind(&self, request: &HttpRequestData) -> bool {
        Self::payload_field(request).is_some()
    }

    async fn unbind(
        &self,
        request: &HttpRequestData,
        _options: &Options,
    ) -> SamlResult<UnbindResult> {
        let encoded = Self::payload_field(request)
            .ok_or_else(|| SamlError::malformed("No SAML message found in the form data"))?;

        let decoded = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| SamlError::malformed(NOT_BASE64_MESSAGE))?;
        let xml = String::from_utf8(decoded)
            .map_err(|e| SamlError::malformed(format!("Message is not valid UTF-8: {e}")))?;

        // The XML is decoded unmodified here; signature and protocol
        // validation happen downstream.
        let data = XmlElement::parse(&xml).map_err(SamlError::malformed)?;

        Ok(UnbindResult {
            data,
            relay_state: request.form_value("RelayState").map(str::to_string),
            trust_level: TrustLevel::None,
        })
    }

    fn bind(&self, message: &Saml2Message, _options: &Options) -> SamlResult<CommandResult> {
        let xml = match &message.signing_credentials {
            Some(credentials) => sign_enveloped(&message.xml_data, credentials)?,
            None => message.xml_data.clone(),
        };
        let encoded = STANDARD.encode(xml.as_bytes());

        // Fixed XHTML 1.1 document; field order matters for interop: the
        // RelayState field precedes the message field.
        let mut html = String::new();
        html.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        html.push_str("<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\"\n");
        html.push_str("\"http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd\">\n");
        html.push_str("<html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"en\">\n");
        html.push_str("<body onload=\"document.forms[0].submit()\">\n");
        html.push_str("<noscript>\n<p>\n<strong>Note:</strong> Since your browser does not support JavaScript,\nyou must press the Continue button once to proceed.\n</p>\n</noscript>\n");
        html.push_str("<form action=\"");
        html.push_str(&escape_attr(message.destination_url.as_str()));
        html.push_str("\" method=\"post\">\n<div>\n");
        if let Some(relay_state) = &message.relay_state {
            html.push_str("<input type=\"hidden\" name=\"RelayState\" value=\"");
            html.push_str(&escape_attr(relay_state));
            html.push_str("\"/>\n");
        }
        html.push_str("<input type=\"hidden\" name=\"");
        html.push_str(&escape_attr(&message.message_name));
        html.push_str("\"\nvalue=\"");
        html.push_str(&encoded);
        html.push_str("\"/>\n</div>\n");
        html.push_str("<noscript>\n<div>\n<input type=\"submit\" value=\"Continue\"/>\n</div>\n</noscript>\n");
        html.push_str("</form>\n</body>\n</html>");

        Ok(CommandResult::html(html))
    }
}
