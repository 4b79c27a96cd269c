//! Session key management
//!
//! Drives the setup / unlock / OAuth bootstrap flows and holds the unwrapped
//! DEK for the lifetime of a session. The manager is an explicit value owned
//! by the caller, one per account session.
//!
//! States: `Locked` -> `Unlocking` -> `Unlocked` -> `Locked` (on clear).
//! `SettingUp` is entered from `Locked` only, when the account has no key yet.

use crate::api::ApiClient;
use crate::cache::{CacheLookup, LocalKeyCache};
use crate::crypto::{self, DataEncryptionKey, EncryptedPayload, WrappedKeyMaterial};
use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Bytes of randomness in a generated OAuth-account secret
const OAUTH_SECRET_BYTES: usize = 32;

/// Lifecycle state of a session's keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No DEK in memory
    Locked,
    /// Provisioning a new key for an account that has none
    SettingUp,
    /// Looking up the DEK in the cache or on the backend
    Unlocking,
    /// DEK held in memory
    Unlocked,
}

/// Owns the in-memory DEK and the local key cache for one account
pub struct SessionKeyManager {
    api: ApiClient,
    cache: LocalKeyCache,
    state: SessionState,
    dek: Option<DataEncryptionKey>,
}

impl SessionKeyManager {
    pub fn new(api: ApiClient, cache: LocalKeyCache) -> Self {
        SessionKeyManager {
            api,
            cache,
            state: SessionState::Locked,
            dek: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_unlocked(&self) -> bool {
        self.state == SessionState::Unlocked && self.dek.is_some()
    }

    /// The unwrapped DEK, or `Locked`
    pub fn data_key(&self) -> Result<&DataEncryptionKey> {
        match (&self.state, &self.dek) {
            (SessionState::Unlocked, Some(dek)) => Ok(dek),
            _ => Err(Error::Locked),
        }
    }

    pub fn cache(&self) -> &LocalKeyCache {
        &self.cache
    }

    fn unlock_with(&mut self, dek: DataEncryptionKey) {
        self.dek = Some(dek);
        self.state = SessionState::Unlocked;
        info!("Encryption keys unlocked");
    }

    fn relock(&mut self) {
        self.dek = None;
        self.state = SessionState::Locked;
    }

    /// Cache the DEK; the cache is an optimization, so failures only warn
    async fn populate_cache(&self, dek: &DataEncryptionKey, secret: &str) {
        if let Err(e) = self.cache.store(dek, secret).await {
            warn!("Failed to write key cache: {}", e);
        }
    }

    /// Provision E2E for an account that has no wrapped key yet.
    ///
    /// The backend mints the DEK and returns it wrapped under a KWK derived
    /// from `secret`. The DEK is only accepted once it unwraps locally.
    pub async fn setup_encryption(&mut self, access_token: &str, secret: &str) -> Result<()> {
        // `SettingUp` and `Unlocking` only outlive a call whose future was
        // dropped, so they count as locked here.
        if self.state == SessionState::Unlocked {
            return Err(Error::setup("session is already unlocked"));
        }

        self.dek = None;
        self.state = SessionState::SettingUp;
        info!("Setting up end-to-end encryption");

        match self.provision(access_token, secret).await {
            Ok(dek) => {
                self.populate_cache(&dek, secret).await;
                self.unlock_with(dek);
                Ok(())
            }
            Err(e) => {
                warn!("Encryption setup failed: {}", e);
                self.relock();
                Err(e)
            }
        }
    }

    async fn provision(&self, access_token: &str, secret: &str) -> Result<DataEncryptionKey> {
        let response = self
            .api
            .setup_e2e(access_token, secret)
            .await
            .map_err(|e| Error::setup_from("backend setup call failed", e))?;

        if !response.success {
            return Err(Error::setup(
                response
                    .error
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            ));
        }

        let material = response
            .wrapped_key_data
            .ok_or_else(|| Error::setup("backend returned no wrapped key"))?;

        material
            .unwrap_with_secret(secret)
            .map_err(|e| Error::setup_from("returned key did not unwrap", e))
    }

    /// Unlock with a password, cache first.
    ///
    /// Returns `Ok(false)` when the account has no E2E configured and
    /// `Err(KeyUnwrap)` when the password is wrong. A cache entry that
    /// rejects the password fails immediately without a network call.
    pub async fn unlock_with_password(&mut self, access_token: &str, secret: &str) -> Result<bool> {
        self.state = SessionState::Unlocking;
        self.dek = None;

        match self.cache.lookup(secret).await {
            CacheLookup::Hit(dek) => {
                debug!("Unlocked from local key cache");
                self.unlock_with(dek);
                return Ok(true);
            }
            CacheLookup::Rejected => {
                warn!("Local key cache rejected the supplied password");
                self.relock();
                return Err(Error::KeyUnwrap);
            }
            CacheLookup::Miss => {}
        }

        let stale_cache = self.cache.exists().await;

        let material = match self.api.get_wrapped_key(access_token).await {
            Ok(Some(material)) => material,
            Ok(None) => {
                info!("No end-to-end encryption configured for this account");
                self.relock();
                return Ok(false);
            }
            Err(e) => {
                warn!("Failed to fetch wrapped key: {}", e);
                self.relock();
                return Err(e);
            }
        };

        match material.unwrap_with_secret(secret) {
            Ok(dek) => {
                self.populate_cache(&dek, secret).await;
                self.unlock_with(dek);
                Ok(true)
            }
            Err(e) => {
                if stale_cache {
                    if let Err(clear_err) = self.cache.clear().await {
                        warn!("Failed to remove stale key cache: {}", clear_err);
                    }
                }
                self.relock();
                Err(e)
            }
        }
    }

    /// Provision E2E for an identity-provider account that has no password.
    ///
    /// A random secret is generated and stored on the backend before it is
    /// used for anything else, so other devices can always retrieve it.
    pub async fn setup_encryption_for_oauth_user(&mut self, access_token: &str) -> Result<()> {
        let secret = self.store_new_oauth_secret(access_token).await?;
        self.setup_encryption(access_token, &secret).await
    }

    async fn store_new_oauth_secret(&self, access_token: &str) -> Result<Zeroizing<String>> {
        let secret = generate_oauth_secret();
        self.api
            .store_oauth_password(access_token, &secret)
            .await
            .map_err(|e| Error::setup_from("storing OAuth secret failed", e))?;
        info!("Stored generated secret for OAuth account");
        Ok(secret)
    }

    /// The OAuth account's stored secret, minting and storing one if absent
    pub(crate) async fn resolve_oauth_secret(&self, access_token: &str) -> Result<Zeroizing<String>> {
        match self.api.get_oauth_password(access_token).await? {
            Some(secret) => Ok(Zeroizing::new(secret)),
            None => self.store_new_oauth_secret(access_token).await,
        }
    }

    /// Unlock an OAuth account with its stored secret.
    ///
    /// Returns `Ok(false)` when no secret has been stored yet.
    pub async fn unlock_with_oauth_stored_password(&mut self, access_token: &str) -> Result<bool> {
        let secret = match self.api.get_oauth_password(access_token).await? {
            Some(secret) => Zeroizing::new(secret),
            None => {
                info!("No stored secret for OAuth account");
                return Ok(false);
            }
        };

        self.unlock_with_password(access_token, &secret).await
    }

    /// Whether the backend reports E2E enabled. Any failure reads as disabled.
    pub async fn check_encryption_status(&self, access_token: &str) -> bool {
        match self.api.get_encryption_status(access_token).await {
            Ok(status) => status.has_encryption,
            Err(e) => {
                warn!("Encryption status check failed: {}", e);
                false
            }
        }
    }

    /// Drop the in-memory DEK and delete the cache file. Safe from any state.
    pub async fn clear_keys(&mut self) -> Result<()> {
        self.relock();
        self.cache.clear().await?;
        info!("Encryption keys cleared");
        Ok(())
    }

    /// Adopt a freshly minted wrapped key, as handed back by a migration
    pub(crate) async fn adopt_wrapped_key(
        &mut self,
        material: &WrappedKeyMaterial,
        secret: &str,
    ) -> Result<()> {
        self.state = SessionState::Unlocking;
        match material.unwrap_with_secret(secret) {
            Ok(dek) => {
                self.populate_cache(&dek, secret).await;
                self.unlock_with(dek);
                Ok(())
            }
            Err(e) => {
                self.relock();
                Err(e)
            }
        }
    }

    /// Encrypt a string under the session DEK
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPayload> {
        crypto::encrypt(self.data_key()?, plaintext)
    }

    /// Decrypt a payload under the session DEK
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<String> {
        crypto::decrypt(self.data_key()?, payload)
    }

    pub fn encrypt_object<T: Serialize + ?Sized>(&self, value: &T) -> Result<EncryptedPayload> {
        crypto::encrypt_object(self.data_key()?, value)
    }

    pub fn decrypt_object<T: DeserializeOwned>(&self, payload: &EncryptedPayload) -> Result<T> {
        crypto::decrypt_object(self.data_key()?, payload)
    }
}

fn generate_oauth_secret() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; OAUTH_SECRET_BYTES]);
    rand::thread_rng().fill_bytes(bytes.as_mut());
    Zeroizing::new(URL_SAFE_NO_PAD.encode(bytes.as_ref()))
}
