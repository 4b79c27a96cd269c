//! Local key cache
//!
//! Keeps an encrypted-at-rest copy of the unwrapped DEK on disk so repeat
//! unlocks skip the backend. The DEK is wrapped again under a storage key
//! derived from the user secret with a fresh salt on every store, never the
//! backend's salt. Writes go to a temp file in the same directory and are
//! renamed into place, so readers see either the old entry or the new one.

use crate::config::CacheConfig;
use crate::crypto::{
    b64_serde, wrap, DataEncryptionKey, KdfHash, KdfParams, WrappedKeyMaterial, ALGORITHM,
    WRAPPED_KEY_VERSION,
};
use crate::error::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Current on-disk format version
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Disk-resident cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalKeyCacheEntry {
    #[serde(with = "b64_serde")]
    pub salt: Vec<u8>,
    #[serde(with = "b64_serde")]
    pub iv: Vec<u8>,
    #[serde(with = "b64_serde")]
    pub auth_tag: Vec<u8>,
    #[serde(with = "b64_serde")]
    pub encrypted_key: Vec<u8>,
    pub kdf_iterations: u32,
    pub kdf_hash: String,
    pub version: u32,
}

impl LocalKeyCacheEntry {
    fn from_material(material: WrappedKeyMaterial) -> Self {
        LocalKeyCacheEntry {
            salt: material.salt,
            iv: material.iv,
            auth_tag: material.auth_tag,
            encrypted_key: material.wrapped_key,
            kdf_iterations: material.kdf_iterations,
            kdf_hash: material.kdf_hash,
            version: CACHE_FORMAT_VERSION,
        }
    }

    fn to_material(&self) -> WrappedKeyMaterial {
        WrappedKeyMaterial {
            wrapped_key: self.encrypted_key.clone(),
            iv: self.iv.clone(),
            auth_tag: self.auth_tag.clone(),
            salt: self.salt.clone(),
            algorithm: ALGORITHM.to_string(),
            kdf_iterations: self.kdf_iterations,
            kdf_hash: self.kdf_hash.clone(),
            version: WRAPPED_KEY_VERSION,
        }
    }
}

/// Outcome of a cache lookup
#[derive(Debug)]
pub enum CacheLookup {
    /// Entry present and unlocked by the secret
    Hit(DataEncryptionKey),
    /// No usable entry (absent, unreadable, unparseable or old format)
    Miss,
    /// Well-formed entry present but the secret failed authentication
    Rejected,
}

/// One user's key cache file
pub struct LocalKeyCache {
    path: PathBuf,
    kdf_iterations: u32,
    kdf_hash: KdfHash,
}

impl LocalKeyCache {
    /// Cache at an explicit file path
    pub fn new(path: impl Into<PathBuf>, config: &CacheConfig) -> Result<Self> {
        Ok(LocalKeyCache {
            path: path.into(),
            kdf_iterations: config.kdf_iterations,
            kdf_hash: config.hash()?,
        })
    }

    /// Cache for `user_id` under the configured cache directory.
    ///
    /// The file is named by the BLAKE3 hash of the id, so any id is a safe file name.
    pub fn for_user(config: &CacheConfig, user_id: &str) -> Result<Self> {
        if user_id.is_empty() {
            return Err(Error::InvalidConfig("User id must not be empty".to_string()));
        }
        let digest = blake3::hash(user_id.as_bytes());
        let name = format!("{}.json", hex::encode(&digest.as_bytes()[..16]));
        Self::new(config.cache_dir.join(name), config)
    }

    /// Path of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a cache file currently exists
    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Wrap `dek` under a storage key derived from `secret` and persist it,
    /// replacing any previous entry.
    pub async fn store(&self, dek: &DataEncryptionKey, secret: &str) -> Result<()> {
        let params = KdfParams::generate(self.kdf_iterations, self.kdf_hash);
        let storage_key = params.derive_kwk(secret)?;
        let material = wrap(dek, &storage_key, &params)?;
        let entry = LocalKeyCacheEntry::from_material(material);
        let content = serde_json::to_vec_pretty(&entry)?;

        self.write_atomic(&content).await?;
        debug!("Stored key cache at {}", self.path.display());
        Ok(())
    }

    /// Load the cached DEK; any failure is a cache miss
    pub async fn load(&self, secret: &str) -> Option<DataEncryptionKey> {
        match self.lookup(secret).await {
            CacheLookup::Hit(dek) => Some(dek),
            CacheLookup::Miss | CacheLookup::Rejected => None,
        }
    }

    /// Load the cached DEK, telling a missing entry apart from a rejected secret
    pub async fn lookup(&self, secret: &str) -> CacheLookup {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No key cache at {}", self.path.display());
                return CacheLookup::Miss;
            }
            Err(e) => {
                warn!("Key cache unreadable: {}", e);
                return CacheLookup::Miss;
            }
        };

        let entry: LocalKeyCacheEntry = match serde_json::from_slice(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Key cache unparseable: {}", e);
                return CacheLookup::Miss;
            }
        };

        if entry.version != CACHE_FORMAT_VERSION {
            debug!("Ignoring key cache with format version {}", entry.version);
            return CacheLookup::Miss;
        }

        match entry.to_material().unwrap_with_secret(secret) {
            Ok(dek) => {
                debug!("Key cache hit");
                CacheLookup::Hit(dek)
            }
            Err(Error::KeyUnwrap) => {
                debug!("Key cache rejected the supplied secret");
                CacheLookup::Rejected
            }
            Err(e) => {
                warn!("Key cache entry invalid: {}", e);
                CacheLookup::Miss
            }
        }
    }

    /// Delete the cache file. Succeeds if it is already gone.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Key cache cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, content: &[u8]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut dir = fs::DirBuilder::new();
        dir.recursive(true);
        #[cfg(unix)]
        dir.mode(0o700);
        dir.create(parent).await?;

        let tmp_path = self.tmp_path();
        let result = async {
            let mut opts = fs::OpenOptions::new();
            opts.write(true).create_new(true);
            #[cfg(unix)]
            opts.mode(0o600);

            let mut file = opts.open(&tmp_path).await?;
            file.write_all(content).await?;
            file.sync_all().await?;
            drop(file);

            fs::rename(&tmp_path, &self.path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Io(e));
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut suffix = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut suffix);
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}.tmp", hex::encode(suffix)));
        PathBuf::from(name)
    }
}
