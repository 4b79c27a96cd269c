//! Request and response bodies for the backend endpoints

use crate::crypto::WrappedKeyMaterial;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

const REDACTED: &str = "[REDACTED]";

#[derive(Serialize)]
pub(crate) struct PasswordBody<'a> {
    pub password: &'a str,
}

impl fmt::Debug for PasswordBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordBody")
            .field("password", &REDACTED)
            .finish()
    }
}

/// Response of `POST /api/e2e/setup`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupResponse {
    pub success: bool,
    pub wrapped_key_data: Option<WrappedKeyMaterial>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of `GET /api/e2e/status`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionStatus {
    pub has_encryption: bool,
    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OAuthPasswordResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<OAuthPasswordData>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct OAuthPasswordData {
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for OAuthPasswordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthPasswordData")
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .finish()
    }
}

/// Generic acknowledgement body some endpoints return
#[derive(Debug, Deserialize)]
pub(crate) struct Acknowledgement {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Per-type counts of legacy-encrypted records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCounts {
    #[serde(default)]
    pub tasks: u64,
    #[serde(default)]
    pub action_items: u64,
    #[serde(default)]
    pub notes: u64,
}

impl RecordCounts {
    pub fn total(&self) -> u64 {
        self.tasks
            .saturating_add(self.action_items)
            .saturating_add(self.notes)
    }
}

/// Response of `GET /api/e2e/migration/status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    #[serde(rename = "hasE2E")]
    pub has_e2e: bool,
    pub has_legacy_data: bool,
    #[serde(default)]
    pub legacy_counts: RecordCounts,
}

/// Body of `POST /api/e2e/migration/start`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MigrationStartRequest<'a> {
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_salt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_password: Option<&'a str>,
}

impl fmt::Debug for MigrationStartRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStartRequest")
            .field("password", &REDACTED)
            .field("legacy_salt", &self.legacy_salt)
            .field("legacy_password", &self.legacy_password.map(|_| REDACTED))
            .finish()
    }
}

/// A legacy record returned in cleartext by the start-migration call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Cleartext legacy records grouped by type
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedData {
    #[serde(default)]
    pub tasks: Vec<LegacyRecord>,
    #[serde(default)]
    pub action_items: Vec<LegacyRecord>,
    #[serde(default)]
    pub notes: Vec<LegacyRecord>,
}

impl DecryptedData {
    pub fn total(&self) -> usize {
        self.tasks.len() + self.action_items.len() + self.notes.len()
    }
}

/// Response of `POST /api/e2e/migration/start`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStartResponse {
    pub migration_id: String,
    pub wrapped_key_data: WrappedKeyMaterial,
    #[serde(default)]
    pub decrypted_data: DecryptedData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MigrationCompleteRequest<'a> {
    pub migration_id: &'a str,
}

/// Kinds of user content synced to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Task,
    ActionItem,
    Note,
}

impl RecordKind {
    /// Processing order during migration
    pub const ALL: [RecordKind; 3] = [RecordKind::Task, RecordKind::ActionItem, RecordKind::Note];

    /// Upsert endpoint for this kind
    pub fn sync_path(&self) -> &'static str {
        match self {
            RecordKind::Task => "/api/sync/tasks",
            RecordKind::ActionItem => "/api/sync/action-items",
            RecordKind::Note => "/api/sync/notes",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKind::Task => "task",
            RecordKind::ActionItem => "action item",
            RecordKind::Note => "note",
        })
    }
}
