//! reqwest-backed implementation of [`UpstreamApi`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

use super::{ApiBody, ApiResponse, AuthManager, UpstreamApi};
use crate::config::GitHubConfig;
use crate::utils::{Result, SyncError};

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    api_base: String,
    auth: AuthManager,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig, auth: AuthManager) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            auth,
        })
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.api_base, path.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl UpstreamApi for GitHubClient {
    async fn invoke(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<ApiResponse> {
        let url = self.url_for(path);
        let identity = self.auth.active().await;

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(ACCEPT, GITHUB_ACCEPT);
        if let Some(identity) = &identity {
            request = request.header(AUTHORIZATION, format!("token {}", identity.token()));
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        debug!("GitHub API {} {}", method, url);
        let response = request.send().await?;
        let status = response.status().as_u16();

        if let Some(identity) = &identity {
            let headers = response.headers();
            identity.record_rate_limit(
                header_i64(headers, "x-ratelimit-remaining"),
                header_i64(headers, "x-ratelimit-reset"),
            );
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);

        let text = response.text().await?;

        if status >= 400 {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|value| value.get("message")?.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("GitHub API {}", status));

            error!("GitHub API error {} on {} {}: {}", status, method, url, message);
            return Err(SyncError::Upstream { status, message });
        }

        let body = if is_json {
            if text.trim().is_empty() {
                ApiBody::Json(Value::Null)
            } else {
                ApiBody::Json(serde_json::from_str(&text)?)
            }
        } else {
            ApiBody::Text(text)
        };

        Ok(ApiResponse { status, body })
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
