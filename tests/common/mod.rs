//! Shared fixtures for integration tests

#![allow(dead_code)]

use e2ekeys::api::ApiClient;
use e2ekeys::cache::LocalKeyCache;
use e2ekeys::config::{ApiConfig, CacheConfig};
use e2ekeys::crypto::{wrap, DataEncryptionKey, KdfHash, KdfParams, WrappedKeyMaterial};
use e2ekeys::SessionKeyManager;
use serde_json::{json, Value};
use std::path::Path;
use wiremock::{MockServer, Request, ResponseTemplate};

pub const ACCESS_TOKEN: &str = "integration_access_token";
pub const USER_ID: &str = "user-42";

pub fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: server.uri(),
        request_timeout_secs: 5,
        connect_timeout_secs: 1,
        migration_timeout_secs: 10,
        retry_attempts: 0,
        retry_base_delay_ms: 1,
    }
}

pub fn cache_config(dir: &Path, kdf_iterations: u32) -> CacheConfig {
    CacheConfig {
        cache_dir: dir.to_path_buf(),
        kdf_iterations,
        kdf_hash: "sha256".to_string(),
    }
}

pub fn api_client(server: &MockServer) -> ApiClient {
    ApiClient::new(&api_config(server)).unwrap()
}

/// A fresh manager, as a new process for the same user would build it
pub fn session(server: &MockServer, dir: &Path, kdf_iterations: u32) -> SessionKeyManager {
    let cache = LocalKeyCache::for_user(&cache_config(dir, kdf_iterations), USER_ID).unwrap();
    SessionKeyManager::new(api_client(server), cache)
}

pub fn wrapped_for(dek: &DataEncryptionKey, secret: &str, iterations: u32) -> WrappedKeyMaterial {
    let params = KdfParams::generate(iterations, KdfHash::Sha256);
    let kwk = params.derive_kwk(secret).unwrap();
    wrap(dek, &kwk, &params).unwrap()
}

pub fn password_of(request: &Request) -> String {
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    body["password"].as_str().unwrap().to_string()
}

/// `POST /api/e2e/setup` handler wrapping `dek` under the submitted password
pub fn setup_responder(
    dek: DataEncryptionKey,
    iterations: u32,
) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync {
    move |request: &Request| {
        let material = wrapped_for(&dek, &password_of(request), iterations);
        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "wrappedKeyData": material,
        }))
    }
}

pub fn migration_status(has_e2e: bool, has_legacy_data: bool, tasks: u64) -> Value {
    json!({
        "hasE2E": has_e2e,
        "hasLegacyData": has_legacy_data,
        "legacyCounts": {"tasks": tasks, "actionItems": 0, "notes": 0}
    })
}

pub async fn requests_to(server: &MockServer, path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == path)
        .collect()
}
