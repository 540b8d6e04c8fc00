//! HTTP client for the Consul agent API

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

use super::error::ConsulError;
use super::{parse_flag, ConsulBackend, ConsulResult};
use crate::config::ConsulConfig;
use crate::models::HealthCheck;
use crate::utils::retry::{with_retry_if, RetryConfig};

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the Consul client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Agent URL, without trailing slash
    pub base_url: String,

    /// ACL token
    pub token: Option<String>,

    /// Request timeout
    pub timeout: Duration,

    /// Retry policy for reads
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Create a new client config
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }

    /// Set ACL token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl From<&ConsulConfig> for ClientConfig {
    fn from(config: &ConsulConfig) -> Self {
        let mut client = Self::new(config.url.clone())
            .with_timeout(Duration::from_secs(config.request_timeout_secs))
            .with_retry(config.retry.clone());
        client.token = config.token.clone();
        client
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    key: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogNode {
    node: String,
}

#[derive(Debug, Deserialize)]
struct FireResponse {
    #[serde(rename = "ID")]
    id: String,
}

// ============================================================================
// Consul Client
// ============================================================================

/// Client for a Consul agent
///
/// The HTTP connection pool is built on first use and owned by this object.
pub struct ConsulClient {
    config: ClientConfig,
    base: Url,
    http_client: OnceCell<Client>,
}

impl ConsulClient {
    /// Create a new client; no connection is made yet
    pub fn new(config: ClientConfig) -> Result<Self, ConsulError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ConsulError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(ConsulError::InvalidUrl(config.base_url));
        }

        Ok(Self {
            config,
            base,
            http_client: OnceCell::new(),
        })
    }

    async fn http(&self) -> ConsulResult<&Client> {
        self.http_client
            .get_or_try_init(|| async {
                tracing::debug!(url = %self.config.base_url, "Connecting to Consul agent");
                Client::builder()
                    .timeout(self.config.timeout)
                    .build()
                    .map_err(ConsulError::Http)
            })
            .await
    }

    /// `/v1/<api>/<key>`, each segment of `key` percent-encoded
    fn url(&self, api: &str, key: &str, query: Option<&str>) -> ConsulResult<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| ConsulError::InvalidUrl(self.config.base_url.clone()))?;
            segments.pop_if_empty().push("v1").extend(api.split('/'));
            if !key.is_empty() {
                segments.extend(key.split('/'));
            }
        }
        url.set_query(query);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.header("X-Consul-Token", token),
            None => request,
        }
    }

    // Internal: GET with retry, `None` on 404
    async fn get_optional(&self, url: Url) -> ConsulResult<Option<Response>> {
        with_retry_if(
            &self.config.retry,
            || async {
                let http = self.http().await?;
                let response = self.authorize(http.get(url.clone())).send().await?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                check_status(response).await.map(Some)
            },
            ConsulError::is_recoverable,
        )
        .await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> ConsulResult<Option<T>> {
        match self.get_optional(url).await? {
            Some(response) => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| ConsulError::Decode(e.to_string())),
            None => Ok(None),
        }
    }
}

async fn check_status(response: Response) -> ConsulResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ConsulError::Status {
            status: response.status().as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ConsulBackend for ConsulClient {
    async fn find(&self, prefix: &str) -> ConsulResult<BTreeMap<String, String>> {
        let entries: Vec<KvEntry> = self
            .get_json(self.url("kv", prefix, Some("recurse"))?)
            .await?
            .unwrap_or_default();

        let mut found = BTreeMap::new();
        for entry in entries {
            let Some(encoded) = entry.value else {
                continue;
            };
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| ConsulError::Decode(format!("{}: {e}", entry.key)))?;
            let value = String::from_utf8(bytes)
                .map_err(|e| ConsulError::Decode(format!("{}: {e}", entry.key)))?;
            found.insert(entry.key, value);
        }

        tracing::debug!(prefix = %prefix, count = found.len(), "KV prefix search");
        Ok(found)
    }

    async fn get(&self, key: &str) -> ConsulResult<Option<String>> {
        match self.get_optional(self.url("kv", key, Some("raw"))?).await? {
            Some(response) => Ok(Some(response.text().await?)),
            None => Ok(None),
        }
    }

    async fn get_flag(&self, key: &str) -> ConsulResult<Option<bool>> {
        Ok(self.get(key).await?.map(|raw| parse_flag(&raw)))
    }

    async fn fire(&self, name: &str, payload: &serde_json::Value) -> ConsulResult<String> {
        let http = self.http().await?;
        let body = serde_json::to_vec(payload).map_err(|e| ConsulError::Decode(e.to_string()))?;
        let request = http.put(self.url("event/fire", name, None)?).body(body);

        let response = check_status(self.authorize(request).send().await?).await?;
        let fired: FireResponse = response
            .json()
            .await
            .map_err(|e| ConsulError::Decode(e.to_string()))?;

        tracing::info!(event = %name, event_id = %fired.id, "Event fired");
        Ok(fired.id)
    }

    async fn list_nodes(&self) -> ConsulResult<Vec<String>> {
        let nodes: Vec<CatalogNode> = self.get_json(self.url("catalog/nodes", "", None)?).await?.unwrap_or_default();
        Ok(nodes.into_iter().map(|n| n.node).collect())
    }

    async fn health_state(&self, state: &str) -> ConsulResult<Vec<HealthCheck>> {
        Ok(self
            .get_json(self.url("health/state", state, None)?)
            .await?
            .unwrap_or_default())
    }
}
