//! Credential identities and per-identity rate-limit counters.
//!
//! Identities come from `GITHUB_PAT`, an optional credentials file, or the
//! `/auth/*` endpoints. Exactly one identity (if any) is active and signs every
//! upstream request.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::utils::{Result, SyncError};

/// Identity id used for the `GITHUB_PAT` environment token
pub const ENV_IDENTITY_ID: &str = "env_pat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Pat,
    Oauth,
    App,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Pat => "pat",
            AuthKind::Oauth => "oauth",
            AuthKind::App => "app",
        }
    }
}

const UNKNOWN: i64 = -1;

/// Last rate-limit values GitHub reported for one identity.
#[derive(Debug)]
struct RateLimit {
    remaining: AtomicI64,
    reset: AtomicI64,
}

impl RateLimit {
    fn new() -> Self {
        Self {
            remaining: AtomicI64::new(UNKNOWN),
            reset: AtomicI64::new(UNKNOWN),
        }
    }

    fn load(value: &AtomicI64) -> Option<i64> {
        match value.load(Ordering::Relaxed) {
            UNKNOWN => None,
            v => Some(v),
        }
    }
}

#[derive(Debug)]
pub struct Identity {
    pub id: String,
    pub kind: AuthKind,
    token: String,
    pub metadata: Value,
    rate_limit: RateLimit,
}

impl Identity {
    pub fn new(id: impl Into<String>, kind: AuthKind, token: impl Into<String>, metadata: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            token: token.into(),
            metadata,
            rate_limit: RateLimit::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Record the `X-RateLimit-*` headers of a response.
    pub fn record_rate_limit(&self, remaining: Option<i64>, reset: Option<i64>) {
        if let Some(remaining) = remaining {
            self.rate_limit.remaining.store(remaining, Ordering::Relaxed);
        }
        if let Some(reset) = reset {
            self.rate_limit.reset.store(reset, Ordering::Relaxed);
        }
    }

    pub fn rate_limit_remaining(&self) -> Option<i64> {
        RateLimit::load(&self.rate_limit.remaining)
    }

    pub fn rate_limit_reset(&self) -> Option<i64> {
        RateLimit::load(&self.rate_limit.reset)
    }

    /// Public view, without the token
    pub fn summary(&self) -> IdentitySummary {
        IdentitySummary {
            id: self.id.clone(),
            kind: self.kind,
            metadata: self.metadata.clone(),
            rate_limit_remaining: self.rate_limit_remaining(),
            rate_limit_reset: self.rate_limit_reset(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AuthKind,
    pub metadata: Value,
    pub rate_limit_remaining: Option<i64>,
    pub rate_limit_reset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    identities: Vec<StoredIdentity>,
}

#[derive(Debug, Deserialize)]
struct StoredIdentity {
    id: String,
    #[serde(rename = "type")]
    kind: AuthKind,
    token: String,
    #[serde(default)]
    metadata: Option<Value>,
}

/// Holds every known identity and which one is active.
#[derive(Clone, Default)]
pub struct AuthManager {
    identities: Arc<DashMap<String, Arc<Identity>>>,
    active: Arc<RwLock<Option<String>>>,
}

impl AuthManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the environment token first, then the credentials file.
    /// The first identity loaded becomes active. A broken file is logged, not fatal.
    pub fn from_sources(env_token: Option<String>, credentials_file: Option<&Path>) -> Self {
        let identities = DashMap::new();
        let mut active = None;

        if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
            identities.insert(
                ENV_IDENTITY_ID.to_string(),
                Arc::new(Identity::new(
                    ENV_IDENTITY_ID,
                    AuthKind::Pat,
                    token,
                    serde_json::json!({ "source": "env" }),
                )),
            );
            active = Some(ENV_IDENTITY_ID.to_string());
            info!("Added identity: {} (pat)", ENV_IDENTITY_ID);
        }

        if let Some(path) = credentials_file.filter(|p| p.exists()) {
            match load_credentials(path) {
                Ok(stored) => {
                    for ident in stored {
                        info!("Added identity: {} ({})", ident.id, ident.kind.as_str());
                        if active.is_none() {
                            active = Some(ident.id.clone());
                        }
                        identities.insert(
                            ident.id.clone(),
                            Arc::new(Identity::new(
                                ident.id,
                                ident.kind,
                                ident.token,
                                ident.metadata.unwrap_or(Value::Null),
                            )),
                        );
                    }
                }
                Err(e) => error!("Failed to load credentials from {}: {}", path.display(), e),
            }
        }

        Self {
            identities: Arc::new(identities),
            active: Arc::new(RwLock::new(active)),
        }
    }

    /// Add (or replace) an identity; it becomes active when none is.
    pub async fn add(&self, id: &str, kind: AuthKind, token: &str, metadata: Value) -> Result<()> {
        if id.trim().is_empty() {
            return Err(SyncError::Validation("identity id is required".to_string()));
        }
        if token.trim().is_empty() {
            return Err(SyncError::Validation("token is required".to_string()));
        }

        self.identities
            .insert(id.to_string(), Arc::new(Identity::new(id, kind, token, metadata)));
        info!("Added identity: {} ({})", id, kind.as_str());

        let mut active = self.active.write().await;
        if active.is_none() {
            *active = Some(id.to_string());
            info!("Switched to identity: {}", id);
        }
        Ok(())
    }

    pub async fn switch(&self, id: &str) -> Result<()> {
        if !self.identities.contains_key(id) {
            return Err(SyncError::NotFound(format!("identity {}", id)));
        }
        *self.active.write().await = Some(id.to_string());
        info!("Switched to identity: {}", id);
        Ok(())
    }

    /// Remove an identity; when it was active, another one (if any) takes over.
    pub async fn remove(&self, id: &str) -> Result<()> {
        if self.identities.remove(id).is_none() {
            return Err(SyncError::NotFound(format!("identity {}", id)));
        }

        let mut active = self.active.write().await;
        if active.as_deref() == Some(id) {
            *active = self.identities.iter().map(|e| e.key().clone()).min();
        }
        info!("Removed identity: {}", id);
        Ok(())
    }

    pub async fn active(&self) -> Option<Arc<Identity>> {
        let active = self.active.read().await;
        let id = active.as_deref()?;
        self.identities.get(id).map(|e| Arc::clone(e.value()))
    }

    pub async fn list(&self) -> Vec<IdentitySummary> {
        let mut all: Vec<_> = self.identities.iter().map(|e| e.value().summary()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

fn load_credentials(path: &Path) -> anyhow::Result<Vec<StoredIdentity>> {
    let content = std::fs::read_to_string(path)?;
    let file: CredentialsFile = serde_json::from_str(&content)?;
    Ok(file.identities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_env_token_becomes_active() {
        let auth = AuthManager::from_sources(Some("ghp_env".to_string()), None);
        let active = auth.active().await.unwrap();
        assert_eq!(active.id, ENV_IDENTITY_ID);
        assert_eq!(active.token(), "ghp_env");
        assert_eq!(active.kind, AuthKind::Pat);
    }

    #[tokio::test]
    async fn test_credentials_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        std::fs::write(
            &path,
            json!({
                "identities": [
                    { "id": "bot", "type": "app", "token": "ghs_bot" },
                    { "id": "me", "type": "pat", "token": "ghp_me", "metadata": { "login": "me" } }
                ]
            })
            .to_string(),
        )
        .unwrap();

        let auth = AuthManager::from_sources(None, Some(&path));
        assert_eq!(auth.len(), 2);
        assert_eq!(auth.active().await.unwrap().id, "bot");
    }

    #[tokio::test]
    async fn test_broken_credentials_file_is_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        std::fs::write(&path, "{ not json").unwrap();

        let auth = AuthManager::from_sources(None, Some(&path));
        assert!(auth.is_empty());
        assert!(auth.active().await.is_none());
    }

    #[tokio::test]
    async fn test_add_switch_remove() {
        let auth = AuthManager::new();
        auth.add("first", AuthKind::Pat, "t1", Value::Null).await.unwrap();
        auth.add("second", AuthKind::App, "t2", Value::Null).await.unwrap();
        assert_eq!(auth.active().await.unwrap().id, "first");

        auth.switch("second").await.unwrap();
        assert_eq!(auth.active().await.unwrap().id, "second");

        auth.remove("second").await.unwrap();
        assert_eq!(auth.active().await.unwrap().id, "first");

        auth.remove("first").await.unwrap();
        assert!(auth.active().await.is_none());

        assert!(matches!(auth.switch("ghost").await, Err(SyncError::NotFound(_))));
        assert!(matches!(auth.remove("ghost").await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_add_requires_token() {
        let auth = AuthManager::new();
        let err = auth.add("x", AuthKind::Pat, "  ", Value::Null).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_rate_limit_summary_hides_token() {
        let identity = Identity::new("me", AuthKind::Pat, "secret", Value::Null);
        assert_eq!(identity.rate_limit_remaining(), None);

        identity.record_rate_limit(Some(4999), Some(1_700_000_000));
        let summary = serde_json::to_value(identity.summary()).unwrap();
        assert_eq!(summary["rate_limit_remaining"], 4999);
        assert_eq!(summary["rate_limit_reset"], 1_700_000_000i64);
        assert_eq!(summary["type"], "pat");
        assert!(!summary.to_string().contains("secret"));
    }
}
