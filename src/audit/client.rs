use super::record::{ContentBlobRef, RawAuditRecord};
use super::source::{AuditSource, BlobStream};
use super::window::FetchWindow;
use crate::api::ApiError;
use crate::auth::{Scope, TokenProvider};
use crate::config::types::Config;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;

pub const CONTENT_TYPE: &str = "Audit.General";
/// Response header carrying the continuation URL of a content listing.
pub const NEXT_PAGE_HEADER: &str = "NextPageUri";
/// Error code returned when the subscription is already enabled.
const SUBSCRIPTION_ALREADY_ENABLED: &str = "AF20024";

/// One page of a content listing.
#[derive(Debug, Clone)]
pub struct ContentPage {
    pub blobs: Vec<ContentBlobRef>,
    pub next_page_uri: Option<String>,
}

/// HTTP client for the Office 365 Management Activity API.
pub struct ManagementClient {
    tenant_id: String,
    base_url: String,
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

impl ManagementClient {
    pub fn new(config: &Config, tokens: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.http.timeout)
            .build()?;

        Ok(Self {
            tenant_id: config.tenant.tenant_id.clone(),
            base_url: config.management_endpoint().trim_end_matches('/').to_string(),
            client,
            tokens,
            retry: RetryPolicy::from(&config.http),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn feed_url(&self) -> String {
        format!("{}/api/v1.0/{}/activity/feed", self.base_url, self.tenant_id)
    }

    /// URL of the first listing page for `window`.
    pub fn content_url(&self, window: &FetchWindow) -> Result<String, ApiError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/subscriptions/content", self.feed_url()),
            &[
                ("contentType", CONTENT_TYPE),
                ("startTime", window.start_param().as_str()),
                ("endTime", window.end_param().as_str()),
                ("PublisherIdentifier", self.tenant_id.as_str()),
            ],
        )
        .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

        Ok(url.into())
    }

    /// Start the Audit.General subscription. An already-enabled subscription
    /// counts as success.
    pub async fn ensure_subscription(&self) -> Result<(), ApiError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/subscriptions/start", self.feed_url()),
            &[
                ("contentType", CONTENT_TYPE),
                ("PublisherIdentifier", self.tenant_id.as_str()),
            ],
        )
        .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

        let result = self
            .retry
            .run("start_subscription", || async {
                let token = self.tokens.get_token(Scope::Management).await?;
                let response = self
                    .client
                    .post(url.clone())
                    .bearer_auth(token)
                    .header(reqwest::header::CONTENT_LENGTH, 0)
                    .send()
                    .await?;

                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(ApiError::from_response(response).await)
                }
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(content_type = CONTENT_TYPE, "Audit subscription active");
                Ok(())
            }
            Err(ApiError::Status { status: 400, message, .. })
                if message.contains(SUBSCRIPTION_ALREADY_ENABLED)
                    || message.to_ascii_lowercase().contains("already enabled") =>
            {
                tracing::info!(content_type = CONTENT_TYPE, "Audit subscription already active");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch one listing page. HTTP 204 is an empty page.
    pub async fn list_page(&self, url: &str) -> Result<ContentPage, ApiError> {
        let token = self.tokens.get_token(Scope::Management).await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(ContentPage {
                blobs: Vec::new(),
                next_page_uri: None,
            });
        }
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        let next_page_uri = response
            .headers()
            .get(NEXT_PAGE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let blobs: Vec<ContentBlobRef> = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("content listing: {}", e)))?;

        Ok(ContentPage {
            blobs,
            next_page_uri,
        })
    }

    async fn fetch_blob(&self, blob: &ContentBlobRef) -> Result<Vec<RawAuditRecord>, ApiError> {
        let token = self.tokens.get_token(Scope::Management).await?;
        let response = self
            .client
            .get(&blob.content_uri)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        let body = response.text().await?;
        decode_blob(&blob.content_id, &body)
    }
}

/// Decode a blob body. Elements that are not valid records are skipped with a
/// data-quality warning; a body that is not a JSON array is an error.
pub fn decode_blob(content_id: &str, body: &str) -> Result<Vec<RawAuditRecord>, ApiError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ApiError::Decode(format!("blob {}: {}", content_id, e)))?;
    let Value::Array(items) = value else {
        return Err(ApiError::Decode(format!(
            "blob {}: expected a JSON array of records",
            content_id
        )));
    };

    let total = items.len();
    let mut records = Vec::with_capacity(total);
    for (index, item) in items.into_iter().enumerate() {
        match RawAuditRecord::from_value(item) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                content_id = content_id,
                index = index,
                error = %e,
                "Skipping malformed audit record"
            ),
        }
    }

    tracing::debug!(
        content_id = content_id,
        total = total,
        decoded = records.len(),
        "Decoded content blob"
    );

    Ok(records)
}

#[async_trait]
impl AuditSource for ManagementClient {
    fn list(&self, window: FetchWindow) -> BlobStream<'_> {
        let first_page = match self.content_url(&window) {
            Ok(url) => url,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };

        let pages = stream::try_unfold(Some(first_page), move |next| async move {
            let Some(url) = next else {
                return Ok::<_, ApiError>(None);
            };

            let page = self.retry.run("list_content", || self.list_page(&url)).await?;
            tracing::debug!(
                window = %window,
                blobs = page.blobs.len(),
                has_more = page.next_page_uri.is_some(),
                "Listed content page"
            );

            // A continuation pointing back at the same page would never end
            let next = page.next_page_uri.filter(|next| *next != url);
            Ok(Some((page.blobs, next)))
        });

        pages
            .map_ok(|blobs| stream::iter(blobs.into_iter().map(Ok::<_, ApiError>)))
            .try_flatten()
            .boxed()
    }

    async fn fetch(&self, blob: &ContentBlobRef) -> Result<Vec<RawAuditRecord>, ApiError> {
        self.retry.run("fetch_content", || self.fetch_blob(blob)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn get_token(&self, _scope: Scope) -> Result<String, AuthError> {
            Ok("token".to_string())
        }
    }

    fn client() -> ManagementClient {
        let mut config = Config::default();
        config.tenant.tenant_id = "tenant-1".to_string();
        config.endpoints.management = Some("https://manage.example.test/".to_string());
        ManagementClient::new(&config, Arc::new(StaticToken)).unwrap()
    }

    #[test]
    fn test_content_url() {
        let window = FetchWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        );
        let url = reqwest::Url::parse(&client().content_url(&window).unwrap()).unwrap();

        assert_eq!(url.path(), "/api/v1.0/tenant-1/activity/feed/subscriptions/content");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("contentType".to_string(), "Audit.General".to_string())));
        assert!(query.contains(&("startTime".to_string(), "2024-01-01T00:00:00".to_string())));
        assert!(query.contains(&("endTime".to_string(), "2024-01-02T00:00:00".to_string())));
        assert!(query.contains(&("PublisherIdentifier".to_string(), "tenant-1".to_string())));
    }

    #[test]
    fn test_decode_blob_skips_malformed_records() {
        let body = json!([
            {"RecordType": 91, "UserId": "alice@example.com", "CreationTime": "2024-01-01T10:00:00"},
            "garbage",
            {"RecordType": 91, "UserId": ["not", "a", "string"]},
            {"RecordType": 15, "UserId": "bob@example.com"}
        ])
        .to_string();

        let records = decode_blob("blob-1", &body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id.as_deref(), Some("alice@example.com"));
        assert_eq!(records[1].record_type, Some(15));
    }

    #[test]
    fn test_decode_blob_rejects_non_array() {
        assert!(matches!(
            decode_blob("blob-1", r#"{"error": "nope"}"#),
            Err(ApiError::Decode(_))
        ));
        assert!(matches!(decode_blob("blob-1", "<html>"), Err(ApiError::Decode(_))));
    }
}
