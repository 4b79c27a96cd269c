//! Legacy-to-E2E migration
//!
//! Moves an account from server-held legacy encryption to its own DEK. The
//! backend decrypts legacy records once, the client re-encrypts and syncs each
//! of them, and only then is the migration marked complete. An interrupted run
//! leaves the account unmigrated and is safe to start again, since sync is an
//! upsert keyed by record id.

mod record;

pub use record::{encrypted_field_name, reencrypt_record, sensitive_fields};

use crate::api::{ApiClient, LegacyRecord, MigrationStatus, RecordKind};
use crate::error::{Error, Result};
use crate::session::SessionKeyManager;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Account already uses E2E or has nothing to migrate
    NotNeeded,
    /// Legacy data present, no migration started
    PendingMigration,
    InProgress,
    Completed,
    /// Last attempt aborted; calling `migrate_to_e2e` again restarts it
    Failed,
}

/// Step of a migration run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    Checking,
    Starting,
    Unlocking,
    ReEncrypting,
    Completing,
    Done,
}

impl MigrationStage {
    /// Percent range reserved for this stage
    fn band(&self) -> (u8, u8) {
        match self {
            MigrationStage::Checking => (0, 5),
            MigrationStage::Starting => (5, 15),
            MigrationStage::Unlocking => (15, 20),
            MigrationStage::ReEncrypting => (20, 95),
            MigrationStage::Completing => (95, 100),
            MigrationStage::Done => (100, 100),
        }
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationStage::Checking => "checking",
            MigrationStage::Starting => "starting",
            MigrationStage::Unlocking => "unlocking",
            MigrationStage::ReEncrypting => "re-encrypting",
            MigrationStage::Completing => "completing",
            MigrationStage::Done => "done",
        })
    }
}

/// Progress report passed to the caller's callback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationProgress {
    pub stage: MigrationStage,
    /// 0..=100, never decreasing within a run
    pub percent: u8,
    pub processed: usize,
    pub total: usize,
    pub message: String,
}

impl MigrationProgress {
    fn at_start(stage: MigrationStage, message: impl Into<String>) -> Self {
        MigrationProgress {
            stage,
            percent: stage.band().0,
            processed: 0,
            total: 0,
            message: message.into(),
        }
    }

    fn records(processed: usize, total: usize, kind: RecordKind) -> Self {
        let (low, high) = MigrationStage::ReEncrypting.band();
        let span = usize::from(high - low);
        let offset = if total == 0 { span } else { span * processed / total };
        MigrationProgress {
            stage: MigrationStage::ReEncrypting,
            percent: low + offset as u8,
            processed,
            total,
            message: format!("Re-encrypted {} of {} records ({})", processed, total, kind),
        }
    }
}

const REDACTED: &str = "[REDACTED]";

/// Which secret protects the account's new DEK
#[derive(Clone, Copy)]
pub enum Credential<'a> {
    Password(&'a str),
    /// Identity-provider login; the stored random secret is used, minted if absent
    OAuth,
}

impl fmt::Debug for Credential<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.debug_tuple("Password").field(&REDACTED).finish(),
            Credential::OAuth => f.write_str("OAuth"),
        }
    }
}

/// Inputs of one `migrate_to_e2e` run
#[derive(Clone, Copy)]
pub struct MigrationOptions<'a> {
    pub credential: Credential<'a>,
    /// Salt of the legacy scheme, forwarded to the backend
    pub legacy_salt: Option<&'a str>,
    /// Password of the legacy scheme, if it differs from the new secret
    pub legacy_password: Option<&'a str>,
}

impl fmt::Debug for MigrationOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationOptions")
            .field("credential", &self.credential)
            .field("legacy_salt", &self.legacy_salt)
            .field("legacy_password", &self.legacy_password.map(|_| REDACTED))
            .finish()
    }
}

/// How a `migrate_to_e2e` call finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// E2E was already enabled; nothing was touched
    AlreadyMigrated,
    /// No legacy data; a new key was provisioned
    FreshSetup,
    /// Legacy records were re-encrypted and the migration completed
    Migrated { records: usize },
}

/// Drives migration runs for one account
pub struct MigrationCoordinator {
    api: ApiClient,
    state: MigrationState,
}

impl MigrationCoordinator {
    pub fn new(api: ApiClient) -> Self {
        MigrationCoordinator {
            api,
            state: MigrationState::NotNeeded,
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Query the backend for E2E and legacy-data presence
    pub async fn check_migration_status(&mut self, access_token: &str) -> Result<MigrationStatus> {
        let status = self.api.get_migration_status(access_token).await?;
        debug!(
            "Migration status: e2e={} legacy={} records={}",
            status.has_e2e,
            status.has_legacy_data,
            status.legacy_counts.total()
        );

        // Overwrites an `InProgress` left behind by a dropped run.
        self.state = match (status.has_e2e, status.has_legacy_data) {
            (true, _) if self.state == MigrationState::Completed => MigrationState::Completed,
            (false, true) if self.state == MigrationState::Failed => MigrationState::Failed,
            (false, true) => MigrationState::PendingMigration,
            _ => MigrationState::NotNeeded,
        };
        Ok(status)
    }

    /// Bring the account to E2E, migrating legacy records if there are any.
    ///
    /// Already-migrated accounts are left untouched. Any record failure aborts
    /// the run before the backend is told the migration is complete.
    pub async fn migrate_to_e2e<F>(
        &mut self,
        session: &mut SessionKeyManager,
        access_token: &str,
        options: MigrationOptions<'_>,
        mut on_progress: F,
    ) -> Result<MigrationOutcome>
    where
        F: FnMut(MigrationProgress),
    {
        on_progress(MigrationProgress::at_start(
            MigrationStage::Checking,
            "Checking migration status",
        ));
        let status = self.check_migration_status(access_token).await?;

        if status.has_e2e {
            info!("Account already uses end-to-end encryption, nothing to migrate");
            on_progress(MigrationProgress::at_start(MigrationStage::Done, "Already migrated"));
            return Ok(MigrationOutcome::AlreadyMigrated);
        }

        if !status.has_legacy_data {
            info!("No legacy data, provisioning a new key");
            match options.credential {
                Credential::Password(secret) => session.setup_encryption(access_token, secret).await?,
                Credential::OAuth => session.setup_encryption_for_oauth_user(access_token).await?,
            }
            self.state = MigrationState::NotNeeded;
            on_progress(MigrationProgress::at_start(MigrationStage::Done, "Encryption enabled"));
            return Ok(MigrationOutcome::FreshSetup);
        }

        self.state = MigrationState::InProgress;
        match self.run(session, access_token, options, &mut on_progress).await {
            Ok(records) => {
                self.state = MigrationState::Completed;
                info!("Migration completed, {} records re-encrypted", records);
                on_progress(MigrationProgress {
                    stage: MigrationStage::Done,
                    percent: 100,
                    processed: records,
                    total: records,
                    message: "Migration complete".to_string(),
                });
                Ok(MigrationOutcome::Migrated { records })
            }
            Err(e) => {
                error!("Migration failed: {}", e);
                self.state = MigrationState::Failed;
                Err(e)
            }
        }
    }

    async fn run<F>(
        &self,
        session: &mut SessionKeyManager,
        access_token: &str,
        options: MigrationOptions<'_>,
        on_progress: &mut F,
    ) -> Result<usize>
    where
        F: FnMut(MigrationProgress),
    {
        on_progress(MigrationProgress::at_start(
            MigrationStage::Starting,
            "Decrypting legacy records",
        ));

        let oauth_secret;
        let secret = match options.credential {
            Credential::Password(secret) => secret,
            Credential::OAuth => {
                oauth_secret = session
                    .resolve_oauth_secret(access_token)
                    .await
                    .map_err(|e| Error::migration_from("resolving OAuth secret", e))?;
                oauth_secret.as_str()
            }
        };

        let started = self
            .api
            .start_migration(access_token, secret, options.legacy_salt, options.legacy_password)
            .await
            .map_err(|e| Error::migration_from("starting migration", e))?;
        info!(
            "Migration {} started with {} records",
            started.migration_id,
            started.decrypted_data.total()
        );

        on_progress(MigrationProgress::at_start(
            MigrationStage::Unlocking,
            "Unlocking new key",
        ));
        session
            .adopt_wrapped_key(&started.wrapped_key_data, secret)
            .await
            .map_err(|e| Error::migration_from("unwrapping new key", e))?;

        let data = &started.decrypted_data;
        let total = data.total();
        let batches: [(RecordKind, &[LegacyRecord]); 3] = [
            (RecordKind::Task, data.tasks.as_slice()),
            (RecordKind::ActionItem, data.action_items.as_slice()),
            (RecordKind::Note, data.notes.as_slice()),
        ];

        let mut processed = 0;
        on_progress(MigrationProgress::records(0, total, RecordKind::Task));
        for (kind, records) in batches {
            for record in records {
                self.migrate_record(session, access_token, kind, record)
                    .await
                    .map_err(|e| {
                        warn!("Aborting migration at {} {}", kind, record.id);
                        Error::migration_from(&format!("{} {}", kind, record.id), e)
                    })?;
                processed += 1;
                on_progress(MigrationProgress::records(processed, total, kind));
            }
        }

        on_progress(MigrationProgress::at_start(
            MigrationStage::Completing,
            "Finalizing migration",
        ));
        self.api
            .complete_migration(access_token, &started.migration_id)
            .await
            .map_err(|e| Error::migration_from("completing migration", e))?;

        Ok(processed)
    }

    async fn migrate_record(
        &self,
        session: &SessionKeyManager,
        access_token: &str,
        kind: RecordKind,
        record: &LegacyRecord,
    ) -> Result<()> {
        let body = reencrypt_record(session.data_key()?, kind, record)?;
        self.api.sync_record(access_token, kind, &body).await?;
        debug!("Synced {} {}", kind, record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_progress_stays_in_band() {
        let first = MigrationProgress::records(0, 10, RecordKind::Task);
        let half = MigrationProgress::records(5, 10, RecordKind::ActionItem);
        let last = MigrationProgress::records(10, 10, RecordKind::Note);
        assert_eq!(first.percent, 20);
        assert_eq!(half.percent, 57);
        assert_eq!(last.percent, 95);
    }

    #[test]
    fn test_empty_record_set_fills_band() {
        assert_eq!(MigrationProgress::records(0, 0, RecordKind::Task).percent, 95);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let options = MigrationOptions {
            credential: Credential::Password("hunter2"),
            legacy_salt: Some("salt-1"),
            legacy_password: Some("old-hunter"),
        };
        let printed = format!("{:?}", options);
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("old-hunter"));
        assert!(printed.contains("salt-1"));
        assert_eq!(format!("{:?}", Credential::OAuth), "OAuth");
    }

    #[test]
    fn test_stage_bands_are_ordered() {
        let stages = [
            MigrationStage::Checking,
            MigrationStage::Starting,
            MigrationStage::Unlocking,
            MigrationStage::ReEncrypting,
            MigrationStage::Completing,
            MigrationStage::Done,
        ];
        for pair in stages.windows(2) {
            assert_eq!(pair[0].band().1, pair[1].band().0);
        }
    }
}
