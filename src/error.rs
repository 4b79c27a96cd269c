//! Error types for e2ekeys

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for e2ekeys
#[derive(Error, Debug)]
pub enum Error {
    // Crypto errors
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// AEAD verification failed while unwrapping key material.
    /// Either the secret is wrong or the wrapped blob was corrupted.
    #[error("Key unwrap failed: wrong password or corrupted key material")]
    KeyUnwrap,

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Decryption succeeded but the plaintext did not match the expected shape
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Session errors
    #[error("Encryption keys are locked")]
    Locked,

    #[error("Encryption setup failed: {message}")]
    Setup {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    // Backend errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },

    // Migration errors
    #[error("Migration failed: {message}")]
    Migration {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Setup failure without an underlying cause
    pub fn setup(message: impl Into<String>) -> Self {
        Error::Setup {
            message: message.into(),
            source: None,
        }
    }

    /// Setup failure caused by `source`
    pub fn setup_from(context: &str, source: Error) -> Self {
        Error::Setup {
            message: format!("{}: {}", context, source),
            source: Some(Box::new(source)),
        }
    }

    /// Migration failure without an underlying cause
    pub fn migration(message: impl Into<String>) -> Self {
        Error::Migration {
            message: message.into(),
            source: None,
        }
    }

    /// Migration failure caused by `source`
    pub fn migration_from(context: &str, source: Error) -> Self {
        Error::Migration {
            message: format!("{}: {}", context, source),
            source: Some(Box::new(source)),
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) => true,
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            Error::Setup {
                source: Some(source),
                ..
            }
            | Error::Migration {
                source: Some(source),
                ..
            } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether this error means the supplied secret did not unlock the key.
    ///
    /// Callers should prompt for the secret again, not start setup.
    pub fn is_wrong_password(&self) -> bool {
        matches!(self, Error::KeyUnwrap)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_decode() {
            Error::Serialization(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}
