//! OAuth2 client-credentials tokens for Microsoft Graph and the Management
//! Activity API.

use crate::config::types::Config;
use crate::retry::{RetryPolicy, Retryable};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

impl Retryable for AuthError {
    fn is_transient(&self) -> bool {
        match self {
            AuthError::Http(e) => e.is_timeout() || e.is_connect(),
            AuthError::Rejected { status, .. } => *status == 429 || *status >= 500,
            AuthError::MissingCredential(_) => false,
        }
    }
}

/// The API a token is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Microsoft Graph (user roster)
    Graph,
    /// Office 365 Management Activity API (audit content)
    Management,
}

/// Supplies bearer tokens. Opaque to the collectors that consume it.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, scope: Scope) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Client-credentials flow against `{login}/{tenant}/oauth2/v2.0/token`, with
/// one cached token per scope.
#[derive(Debug)]
pub struct ClientCredentialsProvider {
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    login_endpoint: String,
    graph_resource: String,
    management_resource: String,
    http_client: reqwest::Client,
    retry: RetryPolicy,
    cache: RwLock<HashMap<Scope, CachedToken>>,
    /// Refresh this long before expiry.
    grace_period: Duration,
}

impl ClientCredentialsProvider {
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let client_secret = config
            .tenant
            .client_secret
            .as_ref()
            .map(|s| SecretString::new(s.expose_secret().clone()))
            .ok_or(AuthError::MissingCredential("client_secret"))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.http.timeout)
            .build()?;

        Ok(Self {
            tenant_id: config.tenant.tenant_id.clone(),
            client_id: config.tenant.client_id.clone(),
            client_secret,
            login_endpoint: config.login_endpoint(),
            graph_resource: config.graph_endpoint(),
            management_resource: config.management_endpoint(),
            http_client,
            retry: RetryPolicy::from(&config.http),
            cache: RwLock::new(HashMap::new()),
            grace_period: Duration::minutes(5),
        })
    }

    fn scope_string(&self, scope: Scope) -> String {
        let resource = match scope {
            Scope::Graph => &self.graph_resource,
            Scope::Management => &self.management_resource,
        };
        format!("{}/.default", resource.trim_end_matches('/'))
    }

    async fn acquire_token(&self, scope: Scope) -> Result<CachedToken, AuthError> {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint.trim_end_matches('/'),
            self.tenant_id
        );
        let scope_string = self.scope_string(scope);

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("scope", scope_string.as_str()),
        ];

        let response = self
            .http_client
            .post(&token_url)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::Rejected {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let token_response: TokenResponse = response.json().await?;
        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);

        debug!(
            scope = ?scope,
            expires_at = %expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            "Acquired access token"
        );

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at,
        })
    }

    /// Drop every cached token, forcing a refresh on next use.
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn get_token(&self, scope: Scope) -> Result<String, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(token) = cache.get(&scope) {
                if !token.is_expired(self.grace_period) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let token = self
            .retry
            .run("acquire_token", || self.acquire_token(scope))
            .await?;

        let access_token = token.access_token.clone();
        self.cache.write().await.insert(scope, token);
        Ok(access_token)
    }
}
