//! AES-256-GCM primitive
//!
//! Thin layer over ring that keeps nonce, tag and ciphertext as separate
//! parts, since both wire formats in this crate store the tag on its own.
//! A fresh random nonce is drawn for every seal.

use crate::crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use zeroize::Zeroizing;

/// Output of a single seal operation
#[derive(Debug, Clone)]
pub struct SealedData {
    /// Nonce used for encryption (unique per encryption)
    pub nonce: [u8; NONCE_SIZE],
    /// GCM authentication tag
    pub tag: [u8; TAG_SIZE],
    /// Ciphertext without the tag
    pub ciphertext: Vec<u8>,
}

fn aead_key(key: &[u8; KEY_SIZE]) -> Result<LessSafeKey> {
    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| Error::Encryption("Failed to create AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound_key))
}

/// Encrypt data using AES-256-GCM
///
/// # Arguments
/// * `key` - 256-bit encryption key
/// * `plaintext` - Data to encrypt
/// * `aad` - Additional authenticated data (authenticated but not encrypted)
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> Result<SealedData> {
    let sealing_key = aead_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    let tag = sealing_key
        .seal_in_place_separate_tag(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| Error::Encryption("Encryption failed".to_string()))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_ref());

    Ok(SealedData {
        nonce: nonce_bytes,
        tag: tag_bytes,
        ciphertext: in_out,
    })
}

/// Decrypt data using AES-256-GCM
///
/// Fails with `Decryption` on malformed parts or when the tag does not verify.
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8],
    tag: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_SIZE {
        return Err(Error::Decryption(format!(
            "Invalid nonce length: {}",
            nonce.len()
        )));
    }
    if tag.len() != TAG_SIZE {
        return Err(Error::Decryption(format!(
            "Invalid tag length: {}",
            tag.len()
        )));
    }

    let opening_key = aead_key(key).map_err(|e| Error::Decryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(nonce);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    // ring expects ciphertext || tag
    let mut in_out = Zeroizing::new(Vec::with_capacity(ciphertext.len() + TAG_SIZE));
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let plaintext_len = opening_key
        .open_in_place(nonce, Aad::from(aad), in_out.as_mut_slice())
        .map_err(|_| {
            Error::Decryption("Decryption failed - data corrupted or wrong key".to_string())
        })?
        .len();

    in_out.truncate(plaintext_len);
    Ok(in_out)
}
