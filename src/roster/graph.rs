use crate::api::ApiError;
use crate::auth::{Scope, TokenProvider};
use crate::config::types::Config;
use crate::retry::RetryPolicy;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const API_VERSION: &str = "v1.0";

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
pub struct ODataPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

/// Read-only Microsoft Graph client.
pub struct GraphClient {
    base_url: String,
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

impl GraphClient {
    pub fn new(config: &Config, tokens: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.http.timeout)
            .build()?;

        Ok(Self {
            base_url: format!(
                "{}/{}",
                config.graph_endpoint().trim_end_matches('/'),
                API_VERSION
            ),
            client,
            tokens,
            retry: RetryPolicy::from(&config.http),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Absolute URL for a path such as `/users`, with query parameters.
    pub fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<String, ApiError> {
        let url = reqwest::Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        Ok(url.into())
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let token = self.tokens.get_token(Scope::Graph).await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.retry.run("graph_get", || self.get_once(url)).await
    }

    /// Like [`GraphClient::get`], but a 404 is `Ok(None)`.
    pub async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ApiError> {
        match self.get(url).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Collect every item of a collection, following `@odata.nextLink`.
    pub async fn get_all_pages<T: DeserializeOwned>(&self, initial_url: &str) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut url = initial_url.to_string();

        loop {
            debug!(url = %url, "Fetching Graph page");
            let page: ODataPage<T> = self.get(&url).await?;
            items.extend(page.value);

            match page.next_link {
                Some(next) if next != url => url = next,
                _ => return Ok(items),
            }
        }
    }
}
