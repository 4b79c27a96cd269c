//! Content encryption under the DEK
//!
//! Payload formats (both base64, standard alphabet):
//! - v2 (written): `"v2:" || b64(iv_len u8 || tag_len u8 || iv || tag || ciphertext)`
//! - legacy (read only): `b64(iv || tag || ciphertext)` with fixed 12/16 byte parts
//!
//! `:` never appears in base64 output, so the prefix cannot collide with a
//! legacy payload.

use crate::crypto::keys::DataEncryptionKey;
use crate::crypto::{encryption, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

const V2_PREFIX: &str = "v2:";

/// Encrypted content as stored and synced
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedPayload(String);

/// Decoded parts of a payload
#[derive(Debug, Clone)]
pub struct PayloadParts {
    /// 1 for the legacy fixed-offset format, 2 for the length-prefixed one
    pub version: u8,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Decode the payload into its parts without decrypting
    pub fn parse(&self) -> Result<PayloadParts> {
        match self.0.strip_prefix(V2_PREFIX) {
            Some(body) => parse_v2(&decode(body)?),
            None => parse_legacy(&decode(&self.0)?),
        }
    }

    fn from_sealed(sealed: encryption::SealedData) -> Self {
        let mut bytes = Vec::with_capacity(2 + NONCE_SIZE + TAG_SIZE + sealed.ciphertext.len());
        bytes.push(NONCE_SIZE as u8);
        bytes.push(TAG_SIZE as u8);
        bytes.extend_from_slice(&sealed.nonce);
        bytes.extend_from_slice(&sealed.tag);
        bytes.extend_from_slice(&sealed.ciphertext);
        EncryptedPayload(format!("{}{}", V2_PREFIX, STANDARD.encode(bytes)))
    }
}

impl From<String> for EncryptedPayload {
    fn from(s: String) -> Self {
        EncryptedPayload(s)
    }
}

impl From<&str> for EncryptedPayload {
    fn from(s: &str) -> Self {
        EncryptedPayload(s.to_string())
    }
}

impl fmt::Display for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn decode(body: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(body.trim())
        .map_err(|e| Error::Decryption(format!("Malformed payload encoding: {}", e)))
}

fn parse_v2(bytes: &[u8]) -> Result<PayloadParts> {
    if bytes.len() < 2 {
        return Err(Error::Decryption("Payload too short".to_string()));
    }
    let iv_len = bytes[0] as usize;
    let tag_len = bytes[1] as usize;
    if iv_len != NONCE_SIZE || tag_len != TAG_SIZE {
        return Err(Error::UnsupportedFormat(format!(
            "Unsupported payload layout: iv {} bytes, tag {} bytes",
            iv_len, tag_len
        )));
    }
    split_parts(2, &bytes[2..])
}

fn parse_legacy(bytes: &[u8]) -> Result<PayloadParts> {
    split_parts(1, bytes)
}

fn split_parts(version: u8, bytes: &[u8]) -> Result<PayloadParts> {
    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Decryption("Payload too short".to_string()));
    }
    let (iv, rest) = bytes.split_at(NONCE_SIZE);
    let (auth_tag, ciphertext) = rest.split_at(TAG_SIZE);
    Ok(PayloadParts {
        version,
        iv: iv.to_vec(),
        auth_tag: auth_tag.to_vec(),
        ciphertext: ciphertext.to_vec(),
    })
}

/// Encrypt a string under the DEK with a fresh random IV
pub fn encrypt(dek: &DataEncryptionKey, plaintext: &str) -> Result<EncryptedPayload> {
    let sealed = encryption::seal(dek.as_bytes(), plaintext.as_bytes(), &[])?;
    Ok(EncryptedPayload::from_sealed(sealed))
}

/// Decrypt a payload produced by [`encrypt`] (or the legacy layout)
///
/// # Errors
/// `Decryption` on tampering, wrong key or malformed input. `Deserialization`
/// when the plaintext authenticates but is not UTF-8.
pub fn decrypt(dek: &DataEncryptionKey, payload: &EncryptedPayload) -> Result<String> {
    let parts = payload.parse()?;
    let plaintext = encryption::open(
        dek.as_bytes(),
        &parts.iv,
        &parts.auth_tag,
        &parts.ciphertext,
        &[],
    )?;
    String::from_utf8(plaintext.to_vec())
        .map_err(|e| Error::Deserialization(format!("Plaintext is not UTF-8: {}", e)))
}

/// Serialize `value` to JSON and encrypt it
pub fn encrypt_object<T: Serialize + ?Sized>(
    dek: &DataEncryptionKey,
    value: &T,
) -> Result<EncryptedPayload> {
    let json = serde_json::to_string(value)?;
    encrypt(dek, &json)
}

/// Decrypt a payload and deserialize the JSON inside it
pub fn decrypt_object<T: DeserializeOwned>(
    dek: &DataEncryptionKey,
    payload: &EncryptedPayload,
) -> Result<T> {
    let json = decrypt(dek, payload)?;
    serde_json::from_str(&json).map_err(|e| Error::Deserialization(e.to_string()))
}
