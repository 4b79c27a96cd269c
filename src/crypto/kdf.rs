//! Password-based key derivation (PBKDF2-HMAC)
//!
//! Derivation never fails because a secret is wrong. It always yields some
//! key, and the AEAD tag check downstream decides whether it was the right one.

use crate::crypto::{KeyWrappingKey, KEY_SIZE, SALT_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::pbkdf2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use zeroize::Zeroizing;

/// HMAC hash used inside PBKDF2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfHash {
    Sha256,
    Sha384,
    Sha512,
}

impl KdfHash {
    /// Canonical identifier as stored in key material
    pub fn as_str(&self) -> &'static str {
        match self {
            KdfHash::Sha256 => "sha256",
            KdfHash::Sha384 => "sha384",
            KdfHash::Sha512 => "sha512",
        }
    }

    fn algorithm(&self) -> pbkdf2::Algorithm {
        match self {
            KdfHash::Sha256 => pbkdf2::PBKDF2_HMAC_SHA256,
            KdfHash::Sha384 => pbkdf2::PBKDF2_HMAC_SHA384,
            KdfHash::Sha512 => pbkdf2::PBKDF2_HMAC_SHA512,
        }
    }
}

impl FromStr for KdfHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(KdfHash::Sha256),
            "sha384" => Ok(KdfHash::Sha384),
            "sha512" => Ok(KdfHash::Sha512),
            other => Err(Error::KeyDerivation(format!(
                "Unsupported KDF hash: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for KdfHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive `output_len` bytes from a secret with PBKDF2
///
/// # Errors
/// `KeyDerivation` for an empty salt, zero iterations, zero output length
/// or an unknown hash identifier.
pub fn derive_key(
    secret: &str,
    salt: &[u8],
    iterations: u32,
    hash: &str,
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hash = KdfHash::from_str(hash)?;
    derive_with(secret, salt, iterations, hash, output_len)
}

fn derive_with(
    secret: &str,
    salt: &[u8],
    iterations: u32,
    hash: KdfHash,
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    if salt.is_empty() {
        return Err(Error::KeyDerivation("Salt must not be empty".to_string()));
    }
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| Error::KeyDerivation("Iterations must be positive".to_string()))?;
    if output_len == 0 {
        return Err(Error::KeyDerivation(
            "Output length must be positive".to_string(),
        ));
    }

    let mut out = Zeroizing::new(vec![0u8; output_len]);
    pbkdf2::derive(
        hash.algorithm(),
        iterations,
        salt,
        secret.as_bytes(),
        out.as_mut_slice(),
    );
    Ok(out)
}

/// Everything needed to re-derive a wrapping key from a secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub hash: KdfHash,
}

impl KdfParams {
    /// Parameters with a fresh random salt
    pub fn generate(iterations: u32, hash: KdfHash) -> Self {
        let mut salt = vec![0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        KdfParams {
            salt,
            iterations,
            hash,
        }
    }

    /// Derive the key-wrapping key for `secret`
    pub fn derive_kwk(&self, secret: &str) -> Result<KeyWrappingKey> {
        let bytes = derive_with(secret, &self.salt, self.iterations, self.hash, KEY_SIZE)?;
        KeyWrappingKey::from_slice(&bytes)
    }
}
