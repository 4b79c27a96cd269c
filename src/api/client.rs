//! HTTP client for the backend's key and sync endpoints
//!
//! Every request carries `Authorization: Bearer <token>` and a timeout.
//! Idempotent reads are retried with exponential backoff on transient
//! failures; writes are sent once and callers retry whole operations.

use crate::api::retry::ExponentialBackoff;
use crate::api::types::{
    Acknowledgement, EncryptionStatus, MigrationCompleteRequest, MigrationStartRequest,
    MigrationStartResponse, MigrationStatus, OAuthPasswordResponse, PasswordBody, RecordKind,
    SetupResponse,
};
use crate::config::ApiConfig;
use crate::crypto::WrappedKeyMaterial;
use crate::error::{Error, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Deserialize, Debug)]
struct ServerErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Backend API client
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    retry_attempts: u32,
    retry_base_delay_ms: u64,
    migration_timeout: Duration,
}

impl ApiClient {
    /// Create a client from configuration
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ApiClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry_attempts: config.retry_attempts,
            retry_base_delay_ms: config.retry_base_delay_ms,
            migration_timeout: config.migration_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_from(response: Response) -> Error {
        let status = response.status().as_u16();
        let body = response.json::<ServerErrorBody>().await.ok();
        let message = body
            .and_then(|b| b.error.or(b.message))
            .unwrap_or_else(|| format!("HTTP {}", status));
        Error::Api { status, message }
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Serialization(format!("Unexpected response body: {}", e)))
    }

    /// Accept an empty body or a JSON acknowledgement whose `success` is not false
    async fn acknowledge(response: Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let ack: Acknowledgement = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Serialization(format!("Unexpected acknowledgement body: {}", e))
        })?;
        if !ack.success {
            return Err(Error::Api {
                status: status.as_u16(),
                message: ack
                    .error
                    .or(ack.message)
                    .unwrap_or_else(|| "request reported failure".to_string()),
            });
        }
        Ok(())
    }

    /// GET with retries; a 404 yields `None`
    async fn get_optional<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<Option<T>> {
        let mut backoff = ExponentialBackoff::new(self.retry_base_delay_ms, self.retry_attempts);

        loop {
            let attempt = async {
                let response = self
                    .client
                    .get(self.url(path))
                    .bearer_auth(token)
                    .send()
                    .await?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                Self::parse(response).await.map(Some)
            }
            .await;

            match attempt {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if let Some(delay) = backoff.next_delay() {
                        warn!("GET {} failed, retrying in {:?}: {}", path, delay, e);
                        tokio::time::sleep(delay).await;
                    } else {
                        error!("GET {} failed after max retries: {}", path, e);
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// GET with retries; a 404 is an error
    async fn get<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<T> {
        self.get_optional(token, path).await?.ok_or_else(|| Error::Api {
            status: StatusCode::NOT_FOUND.as_u16(),
            message: format!("{} not found", path),
        })
    }

    fn post<B: Serialize + ?Sized>(&self, token: &str, path: &str, body: &B) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(token).json(body)
    }

    /// Ask the backend to mint a DEK wrapped under `password`
    pub async fn setup_e2e(&self, token: &str, password: &str) -> Result<SetupResponse> {
        debug!("POST /api/e2e/setup");
        let response = self
            .post(token, "/api/e2e/setup", &PasswordBody { password })
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Fetch the account's wrapped key; `None` means E2E is not configured
    pub async fn get_wrapped_key(&self, token: &str) -> Result<Option<WrappedKeyMaterial>> {
        debug!("GET /api/e2e/wrapped-key");
        self.get_optional(token, "/api/e2e/wrapped-key").await
    }

    pub async fn get_encryption_status(&self, token: &str) -> Result<EncryptionStatus> {
        debug!("GET /api/e2e/status");
        self.get(token, "/api/e2e/status").await
    }

    /// Fetch the stored random secret of an OAuth account, if any.
    ///
    /// `None` only for a 404 or a successful reply without a password. A reply
    /// flagged `success: false` is an error.
    pub async fn get_oauth_password(&self, token: &str) -> Result<Option<String>> {
        debug!("GET /api/encryption/oauth-password");
        let response: Option<OAuthPasswordResponse> = self
            .get_optional(token, "/api/encryption/oauth-password")
            .await?;
        let response = match response {
            Some(response) => response,
            None => return Ok(None),
        };
        if !response.success {
            return Err(Error::Api {
                status: StatusCode::OK.as_u16(),
                message: response
                    .error
                    .or(response.message)
                    .unwrap_or_else(|| "OAuth secret lookup reported failure".to_string()),
            });
        }
        Ok(response
            .data
            .and_then(|d| d.password)
            .filter(|p| !p.is_empty()))
    }

    /// Persist the random secret of an OAuth account
    pub async fn store_oauth_password(&self, token: &str, password: &str) -> Result<()> {
        debug!("POST /api/encryption/oauth-password");
        let response = self
            .post(token, "/api/encryption/oauth-password", &PasswordBody { password })
            .send()
            .await?;
        Self::acknowledge(response).await
    }

    pub async fn get_migration_status(&self, token: &str) -> Result<MigrationStatus> {
        debug!("GET /api/e2e/migration/status");
        self.get(token, "/api/e2e/migration/status").await
    }

    /// Start a migration; the backend returns the legacy records in cleartext
    pub async fn start_migration(
        &self,
        token: &str,
        password: &str,
        legacy_salt: Option<&str>,
        legacy_password: Option<&str>,
    ) -> Result<MigrationStartResponse> {
        debug!("POST /api/e2e/migration/start");
        let body = MigrationStartRequest {
            password,
            legacy_salt,
            legacy_password,
        };
        let response = self
            .post(token, "/api/e2e/migration/start", &body)
            .timeout(self.migration_timeout)
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Tell the backend every record has been re-encrypted and synced
    pub async fn complete_migration(&self, token: &str, migration_id: &str) -> Result<()> {
        debug!("POST /api/e2e/migration/complete");
        let response = self
            .post(
                token,
                "/api/e2e/migration/complete",
                &MigrationCompleteRequest { migration_id },
            )
            .send()
            .await?;
        Self::acknowledge(response).await
    }

    /// Upsert one record, keyed by its `id`
    pub async fn sync_record(
        &self,
        token: &str,
        kind: RecordKind,
        body: &Map<String, Value>,
    ) -> Result<()> {
        let response = self.post(token, kind.sync_path(), body).send().await?;
        Self::acknowledge(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const ACCESS_TOKEN: &str = "test_access_token";

    fn client_for(server: &MockServer, retry_attempts: u32) -> ApiClient {
        let config = ApiConfig {
            base_url: server.uri(),
            request_timeout_secs: 1,
            connect_timeout_secs: 1,
            migration_timeout_secs: 2,
            retry_attempts,
            retry_base_delay_ms: 1,
        };
        ApiClient::new(&config).unwrap()
    }

    fn material_json() -> Value {
        json!({
            "wrappedKey": "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=",
            "iv": "AAAAAAAAAAAAAAAA",
            "authTag": "AAAAAAAAAAAAAAAAAAAAAA==",
            "salt": "c2FsdA==",
            "algorithm": "aes-256-gcm",
            "kdfIterations": 100000,
            "kdfHash": "sha256",
            "version": 1
        })
    }

    #[tokio::test]
    async fn test_wrapped_key_not_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/e2e/wrapped-key"))
            .and(header("authorization", format!("Bearer {ACCESS_TOKEN}")))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server, 2).get_wrapped_key(ACCESS_TOKEN).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_wrapped_key_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/e2e/wrapped-key"))
            .and(header("authorization", format!("Bearer {ACCESS_TOKEN}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(material_json()))
            .expect(1)
            .mount(&server)
            .await;

        let material = client_for(&server, 0)
            .get_wrapped_key(ACCESS_TOKEN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(material.kdf_iterations, 100000);
        assert_eq!(material.salt, b"salt");
    }

    #[tokio::test]
    async fn test_transient_read_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/e2e/status"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let result = client_for(&server, 2).get_encryption_status(ACCESS_TOKEN).await;
        assert!(matches!(result, Err(Error::Api { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/e2e/status"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "token expired"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server, 3).get_encryption_status(ACCESS_TOKEN).await;
        match result {
            Err(Error::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "token expired");
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.has_encryption)),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_transient_not_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/e2e/wrapped-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(material_json())
                    .set_delay(Duration::from_millis(1500)),
            )
            .mount(&server)
            .await;

        let result = client_for(&server, 0).get_wrapped_key(ACCESS_TOKEN).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_oauth_password_absent_and_present() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/encryption/oauth-password"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": {"password": null}})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/encryption/oauth-password"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": {"password": "s3cret"}})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        assert_eq!(client.get_oauth_password(ACCESS_TOKEN).await.unwrap(), None);
        assert_eq!(
            client.get_oauth_password(ACCESS_TOKEN).await.unwrap(),
            Some("s3cret".to_string())
        );
    }

    #[tokio::test]
    async fn test_oauth_password_reported_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/encryption/oauth-password"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "error": "db down"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server, 0).get_oauth_password(ACCESS_TOKEN).await;
        assert!(matches!(result, Err(Error::Api { message, .. }) if message == "db down"));
    }

    #[tokio::test]
    async fn test_oauth_password_not_found_and_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/encryption/oauth-password"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/encryption/oauth-password"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": {"password": ""}})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        assert_eq!(client.get_oauth_password(ACCESS_TOKEN).await.unwrap(), None);
        assert_eq!(client.get_oauth_password(ACCESS_TOKEN).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_rejects_non_json_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sync/notes"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>Gateway login</body></html>", "text/html"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut body = Map::new();
        body.insert("id".to_string(), json!("n-1"));

        let result = client_for(&server, 0)
            .sync_record(ACCESS_TOKEN, RecordKind::Note, &body)
            .await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_store_oauth_password_body_and_failure_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/encryption/oauth-password"))
            .and(header("authorization", format!("Bearer {ACCESS_TOKEN}")))
            .and(body_json(json!({"password": "generated"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/encryption/oauth-password"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "error": "quota"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        client.store_oauth_password(ACCESS_TOKEN, "generated").await.unwrap();
        let failed = client.store_oauth_password(ACCESS_TOKEN, "other").await;
        assert!(matches!(failed, Err(Error::Api { message, .. }) if message == "quota"));
    }

    #[tokio::test]
    async fn test_sync_record_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sync/action-items"))
            .and(body_json(json!({"id": "a-1", "encrypted": true})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut body = Map::new();
        body.insert("id".to_string(), json!("a-1"));
        body.insert("encrypted".to_string(), json!(true));

        client_for(&server, 0)
            .sync_record(ACCESS_TOKEN, RecordKind::ActionItem, &body)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_migration_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/e2e/migration/start"))
            .and(body_json(json!({"password": "pw", "legacySalt": "abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "migrationId": "m-1",
                "wrappedKeyData": material_json(),
                "decryptedData": {"tasks": [{"id": "t-1", "title": "x"}], "notes": []}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server, 0)
            .start_migration(ACCESS_TOKEN, "pw", Some("abc"), None)
            .await
            .unwrap();
        assert_eq!(response.migration_id, "m-1");
        assert_eq!(response.decrypted_data.total(), 1);
        assert!(response.decrypted_data.action_items.is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = ApiConfig {
            base_url: "https://api.example.com/".to_string(),
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(client.url("/api/e2e/status"), "https://api.example.com/api/e2e/status");
    }
}
