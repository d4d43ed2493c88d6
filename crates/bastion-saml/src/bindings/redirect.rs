//! HTTP-Redirect binding: deflated, base64- and URL-encoded payload in the
//! query string.

use crate::bindings::{Binding, BindingKind, MESSAGE_PARAMETER_NAMES};
use crate::config::Options;
use crate::crypto::signature::sign_enveloped;
use crate::error::{SamlError, SamlResult};
use crate::types::{CommandResult, HttpRequestData, Saml2Message, TrustLevel, UnbindResult};
use crate::xml::XmlElement;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Decompression ceiling; a deflate bomb must not exhaust memory.
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

pub struct RedirectBinding;

impl RedirectBinding {
    fn payload_param(request: &HttpRequestData) -> Option<(String, String)> {
        MESSAGE_PARAMETER_NAMES
            .iter()
            .find_map(|name| request.query_param(name).map(|v| (name.to_string(), v)))
    }
}

#[async_trait]
impl Binding for RedirectBinding {
    fn kind(&self) -> BindingKind {
        BindingKind::Redirect
    }

    fn can_unbind(&self, request: &HttpRequestData) -> bool {
        Self::payload_param(request).is_some()
    }

    async fn unbind(
        &self,
        request: &HttpRequestData,
        _options: &Options,
    ) -> SamlResult<UnbindResult> {
        let (_, encoded) = Self::payload_param(request)
            .ok_or_else(|| SamlError::malformed("No SAML message found in the query string"))?;

        let compressed = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| SamlError::malformed(format!("Base64 decode failed: {e}")))?;

        let decoder = DeflateDecoder::new(&compressed[..]);
        let mut xml = String::new();
        decoder
            .take(MAX_DECOMPRESSED_SIZE)
            .read_to_string(&mut xml)
            .map_err(|e| SamlError::malformed(format!("Deflate decode failed: {e}")))?;
        if xml.len() as u64 >= MAX_DECOMPRESSED_SIZE {
            return Err(SamlError::malformed(
                "Decompressed message exceeds maximum size limit (64 KB)",
            ));
        }

        let data = XmlElement::parse(&xml).map_err(|e| SamlError::malformed(e))?;

        Ok(UnbindResult {
            data,
            relay_state: request.query_param("RelayState"),
            trust_level: TrustLevel::None,
        })
    }

    fn bind(&self, message: &Saml2Message, _options: &Options) -> SamlResult<CommandResult> {
        let xml = match &message.signing_credentials {
            Some(credentials) => sign_enveloped(&message.xml_data, credentials)?,
            None => message.xml_data.clone(),
        };

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(xml.as_bytes())
            .and_then(|()| encoder.finish())
            .map_err(|e| SamlError::malformed(format!("Deflate encode failed: {e}")))
            .and_then(|compressed| {
                let payload = urlencoding::encode(&STANDARD.encode(compressed)).into_owned();

                let mut location = message.destination_url.to_string();
                location.push(if message.destination_url.query().is_some() {
                    '&'
                } else {
                    '?'
                });
                location.push_str(&message.message_name);
                location.push('=');
                location.push_str(&payload);
                if let Some(relay_state) = &message.relay_state {
                    location.push_str("&RelayState=");
                    location.push_str(&urlencoding::encode(relay_state));
                }

                let location = url::Url::parse(&location)
                    .map_err(|e| SamlError::config(format!("Destination url error: {e}")))?;
                Ok(CommandResult::redirect(location))
            })
    }
}
