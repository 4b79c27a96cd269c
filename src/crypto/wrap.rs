//! Key wrapping codec
//!
//! A DEK is wrapped with AES-256-GCM under a KWK derived from the user secret.
//! The unwrap tag check is the single point that decides whether a secret
//! is correct.

use crate::crypto::kdf::{KdfHash, KdfParams};
use crate::crypto::keys::{DataEncryptionKey, KeyWrappingKey};
use crate::crypto::{b64_serde, encryption, ALGORITHM, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Current schema version of wrapped key material
pub const WRAPPED_KEY_VERSION: u32 = 1;

/// Durable, wire-level form of a wrapped DEK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKeyMaterial {
    #[serde(with = "b64_serde")]
    pub wrapped_key: Vec<u8>,
    #[serde(with = "b64_serde")]
    pub iv: Vec<u8>,
    #[serde(with = "b64_serde")]
    pub auth_tag: Vec<u8>,
    #[serde(with = "b64_serde")]
    pub salt: Vec<u8>,
    pub algorithm: String,
    pub kdf_iterations: u32,
    pub kdf_hash: String,
    pub version: u32,
}

impl WrappedKeyMaterial {
    /// Check the algorithm, version and fixed part sizes
    pub fn validate(&self) -> Result<()> {
        if !self.algorithm.eq_ignore_ascii_case(ALGORITHM) {
            return Err(Error::UnsupportedFormat(format!(
                "Unsupported wrap algorithm: {}",
                self.algorithm
            )));
        }
        if self.version != WRAPPED_KEY_VERSION {
            return Err(Error::UnsupportedFormat(format!(
                "Unsupported key material version: {}",
                self.version
            )));
        }
        if self.iv.len() != NONCE_SIZE {
            return Err(Error::UnsupportedFormat(format!(
                "Invalid IV length: {}",
                self.iv.len()
            )));
        }
        if self.auth_tag.len() != TAG_SIZE {
            return Err(Error::UnsupportedFormat(format!(
                "Invalid auth tag length: {}",
                self.auth_tag.len()
            )));
        }
        Ok(())
    }

    /// KDF parameters carried by this material
    pub fn kdf_params(&self) -> Result<KdfParams> {
        Ok(KdfParams {
            salt: self.salt.clone(),
            iterations: self.kdf_iterations,
            hash: KdfHash::from_str(&self.kdf_hash)?,
        })
    }

    /// Derive the KWK from `secret` and unwrap the DEK in one step
    pub fn unwrap_with_secret(&self, secret: &str) -> Result<DataEncryptionKey> {
        self.validate()?;
        let kwk = self.kdf_params()?.derive_kwk(secret)?;
        unwrap(self, &kwk)
    }
}

/// Wrap a DEK under a KWK, recording the KDF parameters that produced it
pub fn wrap(
    dek: &DataEncryptionKey,
    kwk: &KeyWrappingKey,
    params: &KdfParams,
) -> Result<WrappedKeyMaterial> {
    let sealed = encryption::seal(kwk.as_bytes(), dek.as_bytes(), &[])?;

    Ok(WrappedKeyMaterial {
        wrapped_key: sealed.ciphertext,
        iv: sealed.nonce.to_vec(),
        auth_tag: sealed.tag.to_vec(),
        salt: params.salt.clone(),
        algorithm: ALGORITHM.to_string(),
        kdf_iterations: params.iterations,
        kdf_hash: params.hash.to_string(),
        version: WRAPPED_KEY_VERSION,
    })
}

/// Unwrap a DEK
///
/// # Errors
/// `UnsupportedFormat` when the material is structurally invalid, and
/// `KeyUnwrap` when the tag does not verify under `kwk`.
pub fn unwrap(material: &WrappedKeyMaterial, kwk: &KeyWrappingKey) -> Result<DataEncryptionKey> {
    material.validate()?;

    let plaintext = encryption::open(
        kwk.as_bytes(),
        &material.iv,
        &material.auth_tag,
        &material.wrapped_key,
        &[],
    )
    .map_err(|_| Error::KeyUnwrap)?;

    DataEncryptionKey::from_slice(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> KdfParams {
        KdfParams::generate(1000, KdfHash::Sha256)
    }

    #[test]
    fn test_wrap_unwrap() {
        let dek = DataEncryptionKey::generate();
        let params = params();
        let kwk = params.derive_kwk("correct horse").unwrap();

        let material = wrap(&dek, &kwk, &params).unwrap();
        let again = params.derive_kwk("correct horse").unwrap();
        let unwrapped = unwrap(&material, &again).unwrap();

        assert_eq!(unwrapped.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let dek = DataEncryptionKey::generate();
        let params = params();
        let kwk = params.derive_kwk("correct horse").unwrap();
        let material = wrap(&dek, &kwk, &params).unwrap();

        let wrong = params.derive_kwk("wrong horse").unwrap();
        assert!(matches!(unwrap(&material, &wrong), Err(Error::KeyUnwrap)));
        assert!(matches!(
            material.unwrap_with_secret("wrong horse"),
            Err(Error::KeyUnwrap)
        ));
    }

    #[test]
    fn test_material_carries_parameters() {
        let dek = DataEncryptionKey::generate();
        let params = KdfParams::generate(2000, KdfHash::Sha512);
        let kwk = params.derive_kwk("pw").unwrap();
        let material = wrap(&dek, &kwk, &params).unwrap();

        assert_eq!(material.algorithm, "aes-256-gcm");
        assert_eq!(material.kdf_iterations, 2000);
        assert_eq!(material.kdf_hash, "sha512");
        assert_eq!(material.version, WRAPPED_KEY_VERSION);
        assert_eq!(material.kdf_params().unwrap(), params);
        assert_eq!(
            material.unwrap_with_secret("pw").unwrap().as_bytes(),
            dek.as_bytes()
        );
    }

    #[test]
    fn test_fresh_iv_per_wrap() {
        let dek = DataEncryptionKey::generate();
        let params = params();
        let kwk = params.derive_kwk("pw").unwrap();
        let a = wrap(&dek, &kwk, &params).unwrap();
        let b = wrap(&dek, &kwk, &params).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.wrapped_key, b.wrapped_key);
    }

    #[test]
    fn test_tampered_material_rejected() {
        let dek = DataEncryptionKey::generate();
        let params = params();
        let kwk = params.derive_kwk("pw").unwrap();
        let mut material = wrap(&dek, &kwk, &params).unwrap();
        material.wrapped_key[0] ^= 0x80;
        assert!(matches!(unwrap(&material, &kwk), Err(Error::KeyUnwrap)));
    }

    #[test]
    fn test_structural_checks() {
        let dek = DataEncryptionKey::generate();
        let params = params();
        let kwk = params.derive_kwk("pw").unwrap();
        let material = wrap(&dek, &kwk, &params).unwrap();

        let mut bad_alg = material.clone();
        bad_alg.algorithm = "chacha20-poly1305".to_string();
        assert!(matches!(unwrap(&bad_alg, &kwk), Err(Error::UnsupportedFormat(_))));

        let mut bad_version = material.clone();
        bad_version.version = 9;
        assert!(matches!(unwrap(&bad_version, &kwk), Err(Error::UnsupportedFormat(_))));

        let mut short_iv = material;
        short_iv.iv.truncate(8);
        assert!(matches!(unwrap(&short_iv, &kwk), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::json!({
            "wrappedKey": "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=",
            "iv": "AAAAAAAAAAAAAAAA",
            "authTag": "AAAAAAAAAAAAAAAAAAAAAA==",
            "salt": "c2FsdA==",
            "algorithm": "aes-256-gcm",
            "kdfIterations": 100000,
            "kdfHash": "sha256",
            "version": 1
        });
        let material: WrappedKeyMaterial = serde_json::from_value(json).unwrap();
        assert_eq!(material.wrapped_key.len(), 32);
        assert_eq!(material.iv.len(), NONCE_SIZE);
        assert_eq!(material.auth_tag.len(), TAG_SIZE);
        assert_eq!(material.salt, b"salt");
        assert!(material.validate().is_ok());

        let back = serde_json::to_value(&material).unwrap();
        assert_eq!(back["kdfIterations"], 100000);
        assert_eq!(back["salt"], "c2FsdA==");
    }
}
