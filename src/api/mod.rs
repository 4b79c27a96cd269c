//! Backend API module
//!
//! Typed access to the wrapped-key, OAuth-secret, migration and sync endpoints.

mod client;
mod retry;
mod types;

pub use client::ApiClient;
pub use retry::ExponentialBackoff;
pub use types::{
    DecryptedData, EncryptionStatus, LegacyRecord, MigrationStartResponse, MigrationStatus,
    RecordCounts, RecordKind, SetupResponse,
};
