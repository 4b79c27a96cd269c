//! Re-encryption of legacy records into E2E sync bodies

use crate::api::{LegacyRecord, RecordKind};
use crate::crypto::{self, DataEncryptionKey};
use crate::error::Result;
use serde_json::{Map, Value};

const TASK_FIELDS: &[&str] = &["title", "description"];
const NOTE_FIELDS: &[&str] = &["title", "content"];

/// Fields of `kind` that only ever leave the device encrypted
pub fn sensitive_fields(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Task | RecordKind::ActionItem => TASK_FIELDS,
        RecordKind::Note => NOTE_FIELDS,
    }
}

/// `title` -> `encryptedTitle`
pub fn encrypted_field_name(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => format!("encrypted{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => "encrypted".to_string(),
    }
}

/// Build the sync body for one legacy record.
///
/// Sensitive fields are replaced by their ciphertext under `encrypted<Name>`.
/// Any `encrypted<Name>` already on the legacy record is dropped.
/// String values are encrypted as-is, other JSON values encrypted as objects,
/// nulls dropped. Everything else passes through untouched.
pub fn reencrypt_record(
    dek: &DataEncryptionKey,
    kind: RecordKind,
    record: &LegacyRecord,
) -> Result<Map<String, Value>> {
    let mut body = record.fields.clone();

    for field in sensitive_fields(kind) {
        let encrypted_name = encrypted_field_name(field);
        body.remove(&encrypted_name);
        let payload = match body.remove(*field) {
            None | Some(Value::Null) => continue,
            Some(Value::String(text)) => crypto::encrypt(dek, &text)?,
            Some(other) => crypto::encrypt_object(dek, &other)?,
        };
        body.insert(encrypted_name, Value::String(payload.into_string()));
    }

    body.insert("id".to_string(), Value::String(record.id.clone()));
    body.insert("encrypted".to_string(), Value::Bool(true));
    body.insert("e2eMode".to_string(), Value::Bool(true));
    Ok(body)
}
