//! Cryptography module for e2ekeys
//!
//! Provides PBKDF2 key derivation, AES-256-GCM key wrapping and
//! AES-256-GCM content encryption. Nothing in here touches disk or network.

mod cipher;
mod encryption;
mod kdf;
mod keys;
mod wrap;

pub use cipher::{decrypt, decrypt_object, encrypt, encrypt_object, EncryptedPayload, PayloadParts};
pub use encryption::{open, seal, SealedData};
pub use kdf::{derive_key, KdfHash, KdfParams};
pub use keys::{DataEncryptionKey, KeyWrappingKey};
pub use wrap::{unwrap, wrap, WrappedKeyMaterial, WRAPPED_KEY_VERSION};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Size of freshly generated KDF salts
pub const SALT_SIZE: usize = 32;

/// Algorithm identifier carried in wrapped key material
pub const ALGORITHM: &str = "aes-256-gcm";

/// Base64 serialization for byte fields in wire structures
pub(crate) mod b64_serde {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.trim()).map_err(serde::de::Error::custom)
    }
}
