//! Shared fixtures for integration tests against mocked Microsoft endpoints.

#![allow(dead_code)]

use copilot_audit::auth::{ClientCredentialsProvider, TokenProvider};
use copilot_audit::config::Config;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT: &str = "tenant-1";

/// Config with every endpoint pointed at `server` and fast retries.
pub fn test_config(server: &MockServer, output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.tenant.tenant_id = TENANT.to_string();
    config.tenant.client_id = "client-1".to_string();
    config.tenant.client_secret = Some(SecretString::new("secret-1".to_string()));
    config.endpoints.login = Some(server.uri());
    config.endpoints.graph = Some(server.uri());
    config.endpoints.management = Some(server.uri());
    config.sync.lookback_days = 2;
    config.sync.subscribe = false;
    config.http.timeout = Duration::from_secs(5);
    config.http.max_attempts = 2;
    config.http.initial_backoff = Duration::from_millis(10);
    config.http.max_backoff = Duration::from_millis(20);
    config.output.dir = output_dir.to_path_buf();
    config
}

pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/v2.0/token", TENANT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

pub fn token_provider(config: &Config) -> Arc<dyn TokenProvider> {
    Arc::new(ClientCredentialsProvider::from_config(config).unwrap())
}

pub fn content_path() -> String {
    format!("/api/v1.0/{}/activity/feed/subscriptions/content", TENANT)
}

/// Listing entry for a blob served at `/blobs/{id}`.
pub fn blob_ref(server: &MockServer, id: &str) -> Value {
    json!({
        "contentType": "Audit.General",
        "contentId": id,
        "contentUri": format!("{}/blobs/{}", server.uri(), id),
        "contentCreated": "2024-01-01T10:05:00.000Z",
        "contentExpiration": "2024-01-08T10:05:00.000Z"
    })
}

pub fn copilot_record(creation_time: &str, user: &str) -> Value {
    json!({
        "Id": format!("{}|{}", user, creation_time),
        "RecordType": 91,
        "CreationTime": creation_time,
        "Operation": "ChatInteraction",
        "UserId": user,
        "Workload": "Copilot",
        "CopilotEventData": {
            "AppHost": "bizchat",
            "ThreadId": "19:thread@thread.v2",
            "Contexts": [],
            "AccessedResources": []
        }
    })
}

pub fn document_record(creation_time: &str, user: &str, document: &str) -> Value {
    let location = format!("https://contoso.sharepoint.com/sites/finance/{}", document);
    json!({
        "Id": format!("{}|{}|{}", user, creation_time, document),
        "RecordType": 91,
        "CreationTime": creation_time,
        "Operation": "CopilotInteraction",
        "UserId": user,
        "CopilotEventData": {
            "AppHost": "Word",
            "Contexts": [{"Id": location.clone(), "Type": "docx"}],
            "AccessedResources": [{"Id": location, "Name": document, "Action": "Read", "Type": "File"}]
        }
    })
}

pub fn graph_user(id: &str, upn: &str, skus: &[&str]) -> Value {
    json!({
        "id": id,
        "displayName": format!("User {}", id),
        "userPrincipalName": upn,
        "jobTitle": "Analyst",
        "department": "Finance",
        "city": "Seattle",
        "country": "United States",
        "usageLocation": "US",
        "assignedLicenses": skus.iter().map(|s| json!({"skuId": s, "disabledPlans": []})).collect::<Vec<_>>()
    })
}
