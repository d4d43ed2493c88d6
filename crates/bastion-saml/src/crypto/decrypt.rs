//! XML-Encryption decryption of `EncryptedAssertion` elements.

use crate::crypto::keys::SigningCredentials;
use crate::error::{SamlError, SamlResult};
use crate::xml::{XmlElement, DSIG_NS, XENC_NS};
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::rsa::Padding;
use openssl::symm::{decrypt_aead, Cipher, Crypter, Mode};

pub(crate) const DECRYPTION_FAILED_MESSAGE: &str =
    "Encrypted Assertion(s) could not be decrypted using the configured Service Certificate(s).";

const KEY_TRANSPORT_RSA15: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
const KEY_TRANSPORT_RSA_OAEP: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";

/// Symmetric data cipher selected by the `EncryptedData` algorithm URI.
enum DataCipher {
    Cbc(Cipher),
    Gcm(Cipher),
}

fn data_cipher_for_uri(uri: &str) -> SamlResult<DataCipher> {
    match uri {
        "http://www.w3.org/2001/04/xmlenc#aes128-cbc" => Ok(DataCipher::Cbc(Cipher::aes_128_cbc())),
        "http://www.w3.org/2001/04/xmlenc#aes192-cbc" => Ok(DataCipher::Cbc(Cipher::aes_192_cbc())),
        "http://www.w3.org/2001/04/xmlenc#aes256-cbc" => Ok(DataCipher::Cbc(Cipher::aes_256_cbc())),
        "http://www.w3.org/2001/04/xmlenc#tripledes-cbc" => {
            Ok(DataCipher::Cbc(Cipher::des_ede3_cbc()))
        }
        "http://www.w3.org/2009/xmlenc11#aes128-gcm" => Ok(DataCipher::Gcm(Cipher::aes_128_gcm())),
        "http://www.w3.org/2009/xmlenc11#aes192-gcm" => Ok(DataCipher::Gcm(Cipher::aes_192_gcm())),
        "http://www.w3.org/2009/xmlenc11#aes256-gcm" => Ok(DataCipher::Gcm(Cipher::aes_256_gcm())),
        other => Err(SamlError::validation(format!(
            "Unsupported data encryption algorithm: {other}"
        ))),
    }
}

fn cipher_value(parent: &XmlElement) -> Option<Vec<u8>> {
    let value = parent
        .child(XENC_NS, "CipherData")?
        .child(XENC_NS, "CipherValue")?
        .text()
        .replace(['\n', '\r', ' ', '\t'], "");
    STANDARD.decode(value).ok()
}

/// Decrypt one `EncryptedAssertion`, trying each configured service
/// certificate in turn. Returns the decrypted assertion element.
pub fn decrypt_assertion(
    encrypted: &XmlElement,
    service_certificates: &[SigningCredentials],
) -> SamlResult<XmlElement> {
    let encrypted_data = encrypted
        .child(XENC_NS, "EncryptedData")
        .ok_or_else(|| SamlError::malformed("EncryptedAssertion contains no EncryptedData"))?;

    let data_algorithm = encrypted_data
        .child(XENC_NS, "EncryptionMethod")
        .and_then(|m| m.attribute("Algorithm"))
        .ok_or_else(|| SamlError::malformed("EncryptedData declares no EncryptionMethod"))?;
    let cipher = data_cipher_for_uri(data_algorithm)?;

    // The EncryptedKey usually sits inside the EncryptedData's KeyInfo but
    // may also be a sibling under the EncryptedAssertion.
    let encrypted_key = encrypted_data
        .child(DSIG_NS, "KeyInfo")
        .and_then(|ki| ki.child(XENC_NS, "EncryptedKey"))
        .or_else(|| encrypted.child(XENC_NS, "EncryptedKey"))
        .ok_or_else(|| SamlError::malformed("EncryptedAssertion contains no EncryptedKey"))?;

    let key_algorithm = encrypted_key
        .child(XENC_NS, "EncryptionMethod")
        .and_then(|m| m.attribute("Algorithm"))
        .ok_or_else(|| SamlError::malformed("EncryptedKey declares no EncryptionMethod"))?;
    let padding = match key_algorithm {
        KEY_TRANSPORT_RSA15 => Padding::PKCS1,
        KEY_TRANSPORT_RSA_OAEP => Padding::PKCS1_OAEP,
        other => {
            return Err(SamlError::validation(format!(
                "Unsupported key transport algorithm: {other}"
            )))
        }
    };

    let wrapped_key = cipher_value(encrypted_key)
        .ok_or_else(|| SamlError::malformed("EncryptedKey contains no CipherValue"))?;
    let ciphertext = cipher_value(encrypted_data)
        .ok_or_else(|| SamlError::malformed("EncryptedData contains no CipherValue"))?;

    for credentials in service_certificates {
        let Some(key) = unwrap_key(credentials, &wrapped_key, padding) else {
            continue;
        };
        let Some(plaintext) = decrypt_data(&cipher, &key, &ciphertext) else {
            continue;
        };
        let Ok(xml) = String::from_utf8(plaintext) else {
            continue;
        };
        if let Ok(element) = XmlElement::parse(&xml) {
            tracing::debug!("encrypted assertion decrypted");
            return Ok(element);
        }
    }

    Err(SamlError::validation(DECRYPTION_FAILED_MESSAGE))
}

fn unwrap_key(
    credentials: &SigningCredentials,
    wrapped: &[u8],
    padding: Padding,
) -> Option<Vec<u8>> {
    let rsa = credentials.private_key.rsa().ok()?;
    let mut out = vec![0u8; rsa.size() as usize];
    let len = rsa.private_decrypt(wrapped, &mut out, padding).ok()?;
    out.truncate(len);
    Some(out)
}

fn decrypt_data(cipher: &DataCipher, key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    match cipher {
        DataCipher::Cbc(cipher) => {
            let block = cipher.block_size();
            if data.len() < 2 * block || key.len() != cipher.key_len() {
                return None;
            }
            let (iv, body) = data.split_at(block);
            // XML-ENC padding is last-byte-count with arbitrary fill, so
            // PKCS7 verification must stay off.
            let mut crypter = Crypter::new(*cipher, Mode::Decrypt, key, Some(iv)).ok()?;
            crypter.pad(false);
            let mut out = vec![0u8; body.len() + block];
            let mut written = crypter.update(body, &mut out).ok()?;
            written += crypter.finalize(&mut out[written..]).ok()?;
            out.truncate(written);

            let pad = *out.last()? as usize;
            if pad == 0 || pad > block || pad > out.len() {
                return None;
            }
            out.truncate(out.len() - pad);
            Some(out)
        }
        DataCipher::Gcm(cipher) => {
            const IV_LEN: usize = 12;
            const TAG_LEN: usize = 16;
            if data.len() < IV_LEN + TAG_LEN || key.len() != cipher.key_len() {
                return None;
            }
            let (iv, rest) = data.split_at(IV_LEN);
            let (body, tag) = rest.split_at(rest.len() - TAG_LEN);
            decrypt_aead(*cipher, key, Some(iv), &[], body, tag).ok()
        }
    }
}
