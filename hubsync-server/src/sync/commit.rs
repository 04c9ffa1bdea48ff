//! Publish a change set as one commit through the Git data API.
//!
//! Order is blobs, tree (on top of `base_tree`), commit, then a non-forced ref
//! update. Nothing before the ref update is visible on the branch, so a run
//! that fails or is cancelled earlier leaves the branch where it was.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::plan::ChangeSet;
use super::remote_tree::{resolve_head, BranchHead};
use super::RepoTarget;
use crate::github::{str_at, UpstreamApi};
use crate::utils::{Result, SyncError};

const FILE_MODE: &str = "100644";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPhase {
    UploadingBlobs,
    CreatingTree,
    CreatingCommit,
    UpdatingRef,
}

/// Hooks the builder calls while it works.
#[async_trait]
pub trait CommitObserver: Send + Sync {
    async fn phase(&self, _phase: CommitPhase) {}

    async fn blob_uploaded(&self, _path: &str, _done: usize, _total: usize) {}

    /// Polled before blobs, before the tree and before the ref update.
    async fn is_cancelled(&self) -> bool {
        false
    }
}

pub struct NoopObserver;

#[async_trait]
impl CommitObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// One entry of the tree request; `sha: None` removes the path from `base_tree`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommitPlan {
    pub base_tree_id: String,
    pub parent_commit_id: String,
    pub message: String,
    pub entries: Vec<TreeEntry>,
}

impl CommitPlan {
    /// Tree entries for a change set once its blobs exist.
    pub fn new(
        head: &BranchHead,
        changes: &ChangeSet,
        blob_ids: &HashMap<String, String>,
        message: String,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(
            changes.upload_count() + changes.to_keep.len() + changes.to_delete.len(),
        );

        for file in changes.uploads() {
            let sha = blob_ids.get(&file.path).ok_or_else(|| {
                SyncError::Internal(format!("no blob was created for {}", file.path))
            })?;
            entries.push(TreeEntry {
                path: file.path.clone(),
                mode: FILE_MODE.to_string(),
                kind: "blob".to_string(),
                sha: Some(sha.clone()),
            });
        }
        for kept in &changes.to_keep {
            entries.push(TreeEntry {
                path: kept.path.clone(),
                mode: kept.mode.clone(),
                kind: kept.kind.clone(),
                sha: Some(kept.sha.clone()),
            });
        }
        for deleted in &changes.to_delete {
            entries.push(TreeEntry {
                path: deleted.path.clone(),
                mode: deleted.mode.clone(),
                kind: deleted.kind.clone(),
                sha: None,
            });
        }

        Ok(Self {
            base_tree_id: head.tree_sha.clone(),
            parent_commit_id: head.commit_sha.clone(),
            message,
            entries,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub commit_sha: String,
    pub tree_sha: String,
    pub parent_sha: String,
    pub message: String,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
}

pub struct CommitBuilder {
    api: Arc<dyn UpstreamApi>,
    blob_concurrency: usize,
}

impl CommitBuilder {
    pub fn new(api: Arc<dyn UpstreamApi>, blob_concurrency: usize) -> Self {
        Self {
            api,
            blob_concurrency: blob_concurrency.max(1),
        }
    }

    /// Resolve the branch head, then commit `changes` on top of it.
    pub async fn commit(
        &self,
        target: &RepoTarget,
        changes: &ChangeSet,
        message: Option<String>,
        author: Option<CommitAuthor>,
        observer: &dyn CommitObserver,
    ) -> Result<CommitOutcome> {
        let head = resolve_head(self.api.as_ref(), target).await?;
        self.commit_on(target, &head, changes, message, author, observer)
            .await
    }

    /// Commit `changes` with `head` as parent and base tree. The ref update is
    /// not forced, so a branch that moved since `head` was read is rejected.
    pub async fn commit_on(
        &self,
        target: &RepoTarget,
        head: &BranchHead,
        changes: &ChangeSet,
        message: Option<String>,
        author: Option<CommitAuthor>,
        observer: &dyn CommitObserver,
    ) -> Result<CommitOutcome> {
        ensure_not_cancelled(observer, "before blob upload").await?;
        observer.phase(CommitPhase::UploadingBlobs).await;
        let blob_ids = self.upload_blobs(target, changes, observer).await?;

        ensure_not_cancelled(observer, "before tree creation").await?;
        observer.phase(CommitPhase::CreatingTree).await;
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| changes.default_message());
        let plan = CommitPlan::new(head, changes, &blob_ids, message)?;

        let tree = self
            .api
            .send_json(
                Method::POST,
                &target.api_path("git/trees"),
                json!({
                    "base_tree": plan.base_tree_id,
                    "tree": plan.entries,
                }),
            )
            .await?;
        let tree_sha = str_at(&tree, "/sha")?;
        debug!("Created tree {} with {} entries", tree_sha, plan.entries.len());

        observer.phase(CommitPhase::CreatingCommit).await;
        let mut body = json!({
            "message": plan.message,
            "tree": tree_sha,
            "parents": [plan.parent_commit_id],
        });
        if let Some(author) = author {
            body["author"] = serde_json::to_value(author)?;
        }
        let commit = self
            .api
            .send_json(Method::POST, &target.api_path("git/commits"), body)
            .await?;
        let commit_sha = str_at(&commit, "/sha")?;

        ensure_not_cancelled(observer, "before ref update").await?;
        observer.phase(CommitPhase::UpdatingRef).await;
        self.api
            .send_json(
                Method::PATCH,
                &target.api_path(&format!("git/refs/heads/{}", target.branch)),
                json!({ "sha": commit_sha, "force": false }),
            )
            .await?;

        info!(
            "Committed {} to {} ({} added, {} updated, {} deleted)",
            commit_sha,
            target,
            changes.to_add.len(),
            changes.to_update.len(),
            changes.to_delete.len()
        );

        Ok(CommitOutcome {
            commit_sha,
            tree_sha,
            parent_sha: plan.parent_commit_id,
            message: plan.message,
            files_added: changes.to_add.len(),
            files_updated: changes.to_update.len(),
            files_deleted: changes.to_delete.len(),
        })
    }

    /// Create one blob per uploaded file, `blob_concurrency` at a time.
    /// The first failure aborts the blobs still in flight.
    async fn upload_blobs(
        &self,
        target: &RepoTarget,
        changes: &ChangeSet,
        observer: &dyn CommitObserver,
    ) -> Result<HashMap<String, String>> {
        let total = changes.upload_count();
        let semaphore = Arc::new(Semaphore::new(self.blob_concurrency));
        let blob_path = target.api_path("git/blobs");
        let mut handles = Vec::with_capacity(total);

        for file in changes.uploads() {
            let content = file.entry.content.clone().ok_or_else(|| {
                SyncError::Internal(format!("content of {} was not loaded", file.path))
            })?;
            let api = Arc::clone(&self.api);
            let sem = Arc::clone(&semaphore);
            let blob_path = blob_path.clone();
            let path = file.path.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| SyncError::Internal(format!("semaphore closed: {}", e)))?;
                let response = api
                    .send_json(
                        Method::POST,
                        &blob_path,
                        json!({ "content": STANDARD.encode(&content), "encoding": "base64" }),
                    )
                    .await?;
                let sha = str_at(&response, "/sha")?;
                Ok::<_, SyncError>((path, sha))
            }));
        }

        let mut blob_ids = HashMap::with_capacity(total);
        let mut handles = handles.into_iter();
        while let Some(handle) = handles.next() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::Internal(format!("blob task failed: {}", e))),
            };
            match result {
                Ok((path, sha)) => {
                    observer.blob_uploaded(&path, blob_ids.len() + 1, total).await;
                    blob_ids.insert(path, sha);
                }
                Err(e) => {
                    warn!("Blob upload failed, aborting remaining uploads: {}", e);
                    for rest in handles {
                        rest.abort();
                    }
                    return Err(e);
                }
            }
        }

        Ok(blob_ids)
    }
}

async fn ensure_not_cancelled(observer: &dyn CommitObserver, stage: &str) -> Result<()> {
    if observer.is_cancelled().await {
        info!("Commit cancelled {}", stage);
        return Err(SyncError::Cancelled(format!("cancelled {}", stage)));
    }
    Ok(())
}
