//! e2ekeys - Account-locked end-to-end encryption keys
//!
//! This library manages a per-account data encryption key (DEK) that the
//! backend only ever sees wrapped under a key derived from the user's secret.
//! It caches the wrapped DEK locally, encrypts user content with it, and
//! migrates accounts off the legacy server-held encryption scheme.

pub mod api;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod migration;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use migration::MigrationCoordinator;
pub use session::SessionKeyManager;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::ApiClient;
    pub use crate::cache::LocalKeyCache;
    pub use crate::config::Config;
    pub use crate::crypto::{DataEncryptionKey, EncryptedPayload, WrappedKeyMaterial};
    pub use crate::error::{Error, Result};
    pub use crate::migration::{Credential, MigrationCoordinator, MigrationOptions, MigrationProgress};
    pub use crate::session::{SessionKeyManager, SessionState};
}
