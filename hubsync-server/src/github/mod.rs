//! Upstream GitHub API gateway.
//!
//! Everything the sync engine needs from GitHub goes through
//! [`UpstreamApi::invoke`]: one authenticated request, a decoded body, and a
//! typed error for any status >= 400.

pub mod auth;
pub mod client;
#[cfg(test)]
pub(crate) mod fake;

pub use auth::{AuthKind, AuthManager, Identity, IdentitySummary};
pub use client::GitHubClient;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::utils::{Result, SyncError};

/// Decoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ApiBody,
}

impl ApiResponse {
    /// The JSON body; a text body is a decode error.
    pub fn into_json(self) -> Result<Value> {
        match self.body {
            ApiBody::Json(value) => Ok(value),
            ApiBody::Text(text) => Err(SyncError::Decode(format!(
                "expected JSON, got text: {}",
                text.chars().take(120).collect::<String>()
            ))),
        }
    }
}

/// The single operation the sync engine needs from GitHub.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Issue `method path` with optional query pairs and JSON body.
    async fn invoke(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<ApiResponse>;

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.invoke(Method::GET, path, query, None).await?.into_json()
    }

    async fn send_json(&self, method: Method, path: &str, body: Value) -> Result<Value> {
        self.invoke(method, path, &[], Some(body)).await?.into_json()
    }
}

/// Read a string field at a JSON pointer (e.g. `/object/sha`).
pub fn str_at(value: &Value, pointer: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SyncError::Decode(format!("missing field {} in GitHub response", pointer)))
}
