//! Key types for e2ekeys
//!
//! Two keys exist per account:
//! - Data Encryption Key (DEK): encrypts all user content, minted by the backend
//! - Key Wrapping Key (KWK): derived from the user secret, protects the DEK
//!
//! Both are zeroized on drop and never printed.

use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

fn key_from_slice(bytes: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    if bytes.len() != KEY_SIZE {
        return Err(Error::InvalidKeyLength {
            expected: KEY_SIZE,
            got: bytes.len(),
        });
    }
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(bytes);
    Ok(key)
}

/// Unwrapped 256-bit data encryption key, held only in memory
#[derive(Clone)]
pub struct DataEncryptionKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl DataEncryptionKey {
    /// Generate a random key
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        rand::thread_rng().fill_bytes(key.as_mut());
        DataEncryptionKey { key }
    }

    /// Create from raw key material
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(DataEncryptionKey {
            key: key_from_slice(bytes)?,
        })
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl fmt::Debug for DataEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataEncryptionKey([redacted])")
    }
}

/// Key derived from a user secret, used only to wrap and unwrap a DEK
pub struct KeyWrappingKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl KeyWrappingKey {
    /// Create from derived key material
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(KeyWrappingKey {
            key: key_from_slice(bytes)?,
        })
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl fmt::Debug for KeyWrappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyWrappingKey([redacted])")
    }
}
