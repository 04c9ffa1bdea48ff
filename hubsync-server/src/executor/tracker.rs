//! In-memory tracking of batch operations.
//!
//! Every upload or sync run gets an operation id that callers poll for status,
//! progress and errors, and can cancel. Entries expire after a TTL and the map
//! never holds more than `max_operations` of them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::sync::{CommitObserver, CommitPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    UploadDirectory,
    UploadMultiple,
    SyncDirectory,
    SyncMultiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Uploading,
    CreatingTree,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// Position in the lifecycle; running statuses only move forward.
    fn rank(&self) -> u8 {
        match self {
            OperationStatus::Pending => 0,
            OperationStatus::Uploading => 1,
            OperationStatus::CreatingTree => 2,
            _ => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// Percent, 0 to 100
    pub progress: f64,
    pub total: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    seq: u64,
}

/// Partial update; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct OperationUpdate {
    pub progress: Option<f64>,
    pub total: Option<usize>,
    pub completed_count: Option<usize>,
    pub status: Option<OperationStatus>,
    pub error: Option<String>,
}

impl OperationUpdate {
    pub fn status(status: OperationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Operation {0} not found")]
    NotFound(String),

    #[error("Operation {id} is already {status:?}")]
    Terminal { id: String, status: OperationStatus },

    #[error("{0:?} is not a terminal status")]
    NotTerminal(OperationStatus),

    #[error("Operation {id} cannot move back from {from:?} to {to:?}")]
    Backwards {
        id: String,
        from: OperationStatus,
        to: OperationStatus,
    },
}

#[derive(Default)]
struct Inner {
    operations: HashMap<String, Operation>,
    next_seq: u64,
}

#[derive(Clone)]
pub struct OperationTracker {
    inner: Arc<RwLock<Inner>>,
    ttl: Duration,
    max_operations: usize,
}

impl OperationTracker {
    pub fn new(ttl: Duration, max_operations: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            ttl,
            max_operations: max_operations.max(1),
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_operations)
    }

    /// Register a new pending operation and apply retention.
    pub async fn create(&self, kind: OperationKind, details: Value) -> String {
        let mut inner = self.inner.write().await;

        let id = loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
            if !inner.operations.contains_key(&candidate) {
                break candidate;
            }
        };

        let now = Utc::now();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.operations.insert(
            id.clone(),
            Operation {
                id: id.clone(),
                kind,
                status: OperationStatus::Pending,
                progress: 0.0,
                total: 0,
                completed_count: 0,
                failed_count: 0,
                errors: Vec::new(),
                details,
                created_at: now,
                updated_at: now,
                seq,
            },
        );

        self.evict(&mut inner, &id, now);
        debug!("Created operation {} ({:?})", id, kind);
        id
    }

    fn evict(&self, inner: &mut Inner, keep: &str, now: DateTime<Utc>) {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let before = inner.operations.len();
        inner
            .operations
            .retain(|id, op| id == keep || now.signed_duration_since(op.created_at) <= ttl);

        while inner.operations.len() > self.max_operations {
            let oldest = inner
                .operations
                .values()
                .filter(|op| op.id != keep)
                .min_by_key(|op| op.seq)
                .map(|op| op.id.clone());
            match oldest {
                Some(id) => {
                    inner.operations.remove(&id);
                }
                None => break,
            }
        }

        let evicted = before - inner.operations.len();
        if evicted > 0 {
            debug!("Evicted {} operations", evicted);
        }
    }

    /// Apply a partial update. An `error` is appended and counted; terminal
    /// operations reject every update, and so does a status earlier in the
    /// lifecycle than the current one.
    pub async fn update(&self, id: &str, update: OperationUpdate) -> Result<(), TrackerError> {
        let mut inner = self.inner.write().await;
        let op = inner
            .operations
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        if op.status.is_terminal() {
            return Err(TrackerError::Terminal {
                id: id.to_string(),
                status: op.status,
            });
        }
        if let Some(status) = update.status {
            if status.rank() < op.status.rank() {
                return Err(TrackerError::Backwards {
                    id: id.to_string(),
                    from: op.status,
                    to: status,
                });
            }
        }

        if let Some(error) = update.error {
            op.errors.push(error);
            op.failed_count += 1;
        }
        if let Some(progress) = update.progress {
            op.progress = progress.clamp(0.0, 100.0);
        }
        if let Some(total) = update.total {
            op.total = total;
        }
        if let Some(completed) = update.completed_count {
            op.completed_count = completed;
        }
        if let Some(status) = update.status {
            op.status = status;
        }
        op.updated_at = Utc::now();
        Ok(())
    }

    /// Move an operation to a terminal status.
    pub async fn complete(&self, id: &str, status: OperationStatus) -> Result<(), TrackerError> {
        if !status.is_terminal() {
            return Err(TrackerError::NotTerminal(status));
        }
        let mut inner = self.inner.write().await;
        let op = inner
            .operations
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        if op.status.is_terminal() {
            return Err(TrackerError::Terminal {
                id: id.to_string(),
                status: op.status,
            });
        }
        op.status = status;
        if status == OperationStatus::Completed {
            op.progress = 100.0;
        }
        op.updated_at = Utc::now();
        info!("Operation {} {:?}", id, status);
        Ok(())
    }

    /// Flag an operation as cancelled. Running work notices at its next check.
    /// Terminal operations are left as they are, so repeated calls are harmless.
    pub async fn cancel(&self, id: &str) -> Result<OperationStatus, TrackerError> {
        let mut inner = self.inner.write().await;
        let op = inner
            .operations
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        if !op.status.is_terminal() {
            op.status = OperationStatus::Cancelled;
            op.updated_at = Utc::now();
            info!("Operation {} cancelled", id);
        }
        Ok(op.status)
    }

    /// Note on an operation, terminal or not, that `commit_sha` reached the branch.
    pub async fn record_commit(&self, id: &str, commit_sha: &str) -> Result<(), TrackerError> {
        let mut inner = self.inner.write().await;
        let op = inner
            .operations
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        match op.details.as_object_mut() {
            Some(details) => {
                details.insert("commit_sha".to_string(), Value::String(commit_sha.to_string()));
            }
            None => {
                op.details = serde_json::json!({ "commit_sha": commit_sha });
            }
        }
        op.updated_at = Utc::now();
        Ok(())
    }

    pub async fn is_cancelled(&self, id: &str) -> bool {
        self.inner
            .read()
            .await
            .operations
            .get(id)
            .map(|op| op.status == OperationStatus::Cancelled)
            .unwrap_or(false)
    }

    pub async fn get(&self, id: &str) -> Option<Operation> {
        self.inner.read().await.operations.get(id).cloned()
    }

    /// All tracked operations, newest first.
    pub async fn list_all(&self) -> Vec<Operation> {
        let inner = self.inner.read().await;
        let mut all: Vec<_> = inner.operations.values().cloned().collect();
        all.sort_by(|a, b| b.seq.cmp(&a.seq));
        all
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.operations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Operations that have not reached a terminal status.
    pub async fn active_count(&self) -> usize {
        self.inner
            .read()
            .await
            .operations
            .values()
            .filter(|op| !op.status.is_terminal())
            .count()
    }

    pub fn handle(&self, id: &str) -> OperationHandle {
        OperationHandle {
            tracker: self.clone(),
            id: id.to_string(),
        }
    }
}

/// Reports commit progress for one operation.
#[derive(Clone)]
pub struct OperationHandle {
    tracker: OperationTracker,
    id: String,
}

impl OperationHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn update(&self, update: OperationUpdate) {
        if let Err(e) = self.tracker.update(&self.id, update).await {
            debug!("Skipped progress update: {}", e);
        }
    }

    pub async fn finish(&self, status: OperationStatus) {
        if let Err(e) = self.tracker.complete(&self.id, status).await {
            debug!("Skipped completion: {}", e);
        }
    }

    /// Mark a successful run completed. A cancel that arrived after the branch
    /// moved cannot undo the commit, so the operation stays cancelled but keeps
    /// the commit it produced.
    pub async fn succeed(&self, commit_sha: Option<&str>) {
        match self.tracker.complete(&self.id, OperationStatus::Completed).await {
            Ok(()) => {}
            Err(TrackerError::Terminal {
                status: OperationStatus::Cancelled,
                ..
            }) => {
                if let Some(sha) = commit_sha {
                    warn!(
                        "Operation {} was cancelled after commit {} landed",
                        self.id, sha
                    );
                    if let Err(e) = self.tracker.record_commit(&self.id, sha).await {
                        debug!("Skipped commit note: {}", e);
                    }
                }
            }
            Err(e) => debug!("Skipped completion: {}", e),
        }
    }

    /// Record the error and mark the operation failed.
    pub async fn fail(&self, error: &str) {
        self.update(OperationUpdate::error(error)).await;
        self.finish(OperationStatus::Failed).await;
    }
}

#[async_trait::async_trait]
impl CommitObserver for OperationHandle {
    async fn phase(&self, phase: CommitPhase) {
        let status = match phase {
            CommitPhase::UploadingBlobs => OperationStatus::Uploading,
            CommitPhase::CreatingTree => OperationStatus::CreatingTree,
            _ => return,
        };
        self.update(OperationUpdate::status(status)).await;
    }

    async fn blob_uploaded(&self, _path: &str, done: usize, total: usize) {
        let progress = if total == 0 {
            100.0
        } else {
            done as f64 * 100.0 / total as f64
        };
        self.update(OperationUpdate {
            progress: Some(progress),
            total: Some(total),
            completed_count: Some(done),
            ..OperationUpdate::default()
        })
        .await;
    }

    async fn is_cancelled(&self) -> bool {
        self.tracker.is_cancelled(&self.id).await
    }
}
