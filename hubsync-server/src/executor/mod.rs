//! Batch executor - Orchestrates directory uploads and syncs.
//!
//! Each run goes through the same pipeline:
//! - Local scan (on the blocking pool)
//! - Remote tree read
//! - Change planning
//! - One atomic commit, reported to the operation tracker

pub mod tracker;

pub use tracker::{
    Operation, OperationHandle, OperationKind, OperationStatus, OperationTracker,
    OperationUpdate, TrackerError,
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::fs::{scan, Manifest, ScanIssue, ScanOptions};
use crate::github::UpstreamApi;
use crate::sync::{
    join_repo_path, normalize_repo_path, plan, read_branch_tree, BranchHead, CommitAuthor,
    CommitBuilder, PlanOptions, RepoTarget, UpdatePolicy,
};
use crate::utils::{Result, SyncError};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadDirectoryRequest {
    pub local_path: String,
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub repo_path: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryMapping {
    pub local_path: String,
    #[serde(default)]
    pub repo_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadMultipleRequest {
    pub directory_mappings: Vec<DirectoryMapping>,
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncDirectoryRequest {
    pub local_path: String,
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub repo_path: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub delete_remote_files: bool,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncMapping {
    pub local_path: String,
    #[serde(default)]
    pub repo_path: String,
    #[serde(default)]
    pub delete_remote_files: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncMultipleRequest {
    pub sync_mappings: Vec<SyncMapping>,
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    /// Local content already matches the branch; nothing was committed
    NoChanges,
    DryRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub operation_id: Option<String>,
    pub status: BatchStatus,
    pub repository: String,
    pub branch: String,
    pub files_uploaded: usize,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
    pub files_unchanged: usize,
    pub commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scan_errors: Vec<ScanIssue>,
    /// Planned paths, reported for dry runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MappingResult {
    pub local_path: String,
    pub repo_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BatchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiSyncOutcome {
    pub operation_id: Option<String>,
    pub status: OperationStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<MappingResult>,
}

/// A failed run and the operation it was recorded under, if any.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct BatchError {
    pub operation_id: Option<String>,
    #[source]
    pub error: SyncError,
}

impl BatchError {
    fn untracked(error: SyncError) -> Self {
        Self {
            operation_id: None,
            error,
        }
    }
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;

/// One local directory and where it lands in the repository.
struct Source {
    local_path: PathBuf,
    repo_path: String,
}

/// Everything one pipeline run needs.
struct Job {
    kind: OperationKind,
    target: RepoTarget,
    sources: Vec<Source>,
    /// Combine all sources under their own prefixes and plan at the repository root
    combine: bool,
    allow_delete: bool,
    message: Option<String>,
    author: Option<CommitAuthor>,
    exclude_patterns: Vec<String>,
    include_hidden: bool,
    dry_run: bool,
    continue_on_error: bool,
}

impl Job {
    fn details(&self) -> Value {
        json!({
            "owner": self.target.owner,
            "repo": self.target.repo,
            "branch": self.target.branch,
            "paths": self.sources.iter().map(|s| json!({
                "local_path": s.local_path.display().to_string(),
                "repo_path": s.repo_path,
            })).collect::<Vec<_>>(),
            "delete_remote_files": self.allow_delete,
        })
    }
}

/// Runs upload and sync jobs against one upstream.
#[derive(Clone)]
pub struct BatchExecutor {
    api: Arc<dyn UpstreamApi>,
    tracker: OperationTracker,
    settings: SyncConfig,
}

impl BatchExecutor {
    pub fn new(api: Arc<dyn UpstreamApi>, tracker: OperationTracker, settings: SyncConfig) -> Self {
        Self {
            api,
            tracker,
            settings,
        }
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    fn target(&self, owner: &str, repo: &str, branch: Option<&str>) -> Result<RepoTarget> {
        let branch = branch
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(self.settings.default_branch.as_str());
        let target = RepoTarget::new(owner.trim(), repo.trim(), branch.trim());
        target.validate()?;
        Ok(target)
    }

    fn source(local_path: &str, repo_path: &str) -> Result<Source> {
        if local_path.trim().is_empty() {
            return Err(SyncError::Validation("local_path is required".to_string()));
        }
        Ok(Source {
            local_path: PathBuf::from(local_path),
            repo_path: normalize_repo_path(repo_path)?,
        })
    }

    /// Upload one directory without deleting anything remote.
    pub async fn upload_directory(&self, req: UploadDirectoryRequest) -> BatchResult<BatchOutcome> {
        let job = Job {
            kind: OperationKind::UploadDirectory,
            target: self
                .target(&req.owner, &req.repo, req.branch.as_deref())
                .map_err(BatchError::untracked)?,
            sources: vec![Self::source(&req.local_path, &req.repo_path).map_err(BatchError::untracked)?],
            combine: false,
            allow_delete: false,
            message: req.commit_message,
            author: req.author,
            exclude_patterns: req.exclude_patterns,
            include_hidden: req.include_hidden,
            dry_run: req.dry_run,
            continue_on_error: req.continue_on_error,
        };
        self.run(job).await
    }

    /// Upload several directories as one commit.
    pub async fn upload_multiple(&self, req: UploadMultipleRequest) -> BatchResult<BatchOutcome> {
        if req.directory_mappings.is_empty() {
            return Err(BatchError::untracked(SyncError::Validation(
                "directory_mappings must not be empty".to_string(),
            )));
        }
        let sources = req
            .directory_mappings
            .iter()
            .map(|m| Self::source(&m.local_path, &m.repo_path))
            .collect::<Result<Vec<_>>>()
            .map_err(BatchError::untracked)?;

        let job = Job {
            kind: OperationKind::UploadMultiple,
            target: self
                .target(&req.owner, &req.repo, req.branch.as_deref())
                .map_err(BatchError::untracked)?,
            sources,
            combine: true,
            allow_delete: false,
            message: req.commit_message,
            author: req.author,
            exclude_patterns: req.exclude_patterns,
            include_hidden: req.include_hidden,
            dry_run: req.dry_run,
            continue_on_error: req.continue_on_error,
        };
        self.run(job).await
    }

    /// Make the `repo_path` subtree match the local directory.
    pub async fn sync_directory(&self, req: SyncDirectoryRequest) -> BatchResult<BatchOutcome> {
        let job = Job {
            kind: OperationKind::SyncDirectory,
            target: self
                .target(&req.owner, &req.repo, req.branch.as_deref())
                .map_err(BatchError::untracked)?,
            sources: vec![Self::source(&req.local_path, &req.repo_path).map_err(BatchError::untracked)?],
            combine: false,
            allow_delete: req.delete_remote_files,
            message: req.commit_message,
            author: req.author,
            exclude_patterns: req.exclude_patterns,
            include_hidden: req.include_hidden,
            dry_run: req.dry_run,
            continue_on_error: req.continue_on_error,
        };
        self.run(job).await
    }

    /// Sync each mapping in turn, each as its own commit. A failed mapping is
    /// reported and the remaining mappings still run.
    pub async fn sync_multiple(&self, req: SyncMultipleRequest) -> BatchResult<MultiSyncOutcome> {
        if req.sync_mappings.is_empty() {
            return Err(BatchError::untracked(SyncError::Validation(
                "sync_mappings must not be empty".to_string(),
            )));
        }
        let target = self
            .target(&req.owner, &req.repo, req.branch.as_deref())
            .map_err(BatchError::untracked)?;

        let parent = if req.dry_run {
            None
        } else {
            let id = self
                .tracker
                .create(
                    OperationKind::SyncMultiple,
                    json!({
                        "owner": target.owner,
                        "repo": target.repo,
                        "branch": target.branch,
                        "mappings": req.sync_mappings.iter().map(|m| json!({
                            "local_path": m.local_path,
                            "repo_path": m.repo_path,
                            "delete_remote_files": m.delete_remote_files,
                        })).collect::<Vec<_>>(),
                    }),
                )
                .await;
            let handle = self.tracker.handle(&id);
            handle
                .update(OperationUpdate {
                    status: Some(OperationStatus::Uploading),
                    total: Some(req.sync_mappings.len()),
                    ..OperationUpdate::default()
                })
                .await;
            Some(handle)
        };

        let total = req.sync_mappings.len();
        let mut results = Vec::with_capacity(total);

        for (index, mapping) in req.sync_mappings.iter().enumerate() {
            if let Some(parent) = &parent {
                if self.tracker.is_cancelled(parent.id()).await {
                    info!("Multi-directory sync {} cancelled after {} mappings", parent.id(), index);
                    break;
                }
            }

            let sub = SyncDirectoryRequest {
                local_path: mapping.local_path.clone(),
                owner: target.owner.clone(),
                repo: target.repo.clone(),
                repo_path: mapping.repo_path.clone(),
                branch: Some(target.branch.clone()),
                commit_message: req.commit_message.clone(),
                delete_remote_files: mapping.delete_remote_files,
                exclude_patterns: req.exclude_patterns.clone(),
                include_hidden: req.include_hidden,
                dry_run: req.dry_run,
                continue_on_error: req.continue_on_error,
                author: req.author.clone(),
            };

            let result = match self.sync_directory(sub).await {
                Ok(outcome) => MappingResult {
                    local_path: mapping.local_path.clone(),
                    repo_path: mapping.repo_path.clone(),
                    success: true,
                    operation_id: outcome.operation_id.clone(),
                    result: Some(outcome),
                    error: None,
                },
                Err(e) => {
                    warn!("Sync of {} failed: {}", mapping.local_path, e);
                    if let Some(parent) = &parent {
                        parent
                            .update(OperationUpdate::error(format!("{}: {}", mapping.local_path, e)))
                            .await;
                    }
                    MappingResult {
                        local_path: mapping.local_path.clone(),
                        repo_path: mapping.repo_path.clone(),
                        success: false,
                        result: None,
                        error: Some(e.to_string()),
                        operation_id: e.operation_id,
                    }
                }
            };
            results.push(result);

            if let Some(parent) = &parent {
                parent
                    .update(OperationUpdate {
                        completed_count: Some(index + 1),
                        progress: Some((index + 1) as f64 * 100.0 / total as f64),
                        ..OperationUpdate::default()
                    })
                    .await;
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;

        let cancelled = match &parent {
            Some(parent) => self.tracker.is_cancelled(parent.id()).await,
            None => false,
        };
        let status = if cancelled {
            OperationStatus::Cancelled
        } else if failed > 0 {
            OperationStatus::Failed
        } else {
            OperationStatus::Completed
        };
        if let Some(parent) = &parent {
            parent.finish(status).await;
        }

        info!(
            "Multi-directory sync to {}: {} succeeded, {} failed",
            target, succeeded, failed
        );

        Ok(MultiSyncOutcome {
            operation_id: parent.map(|p| p.id().to_string()),
            status,
            succeeded,
            failed,
            results,
        })
    }

    async fn run(&self, job: Job) -> BatchResult<BatchOutcome> {
        if job.dry_run {
            return self.execute(&job, None).await.map_err(BatchError::untracked);
        }

        let id = self.tracker.create(job.kind, job.details()).await;
        let handle = self.tracker.handle(&id);
        info!("Starting {:?} {} to {}", job.kind, id, job.target);

        match self.execute(&job, Some(&handle)).await {
            Ok(outcome) => {
                handle.succeed(outcome.commit_sha.as_deref()).await;
                Ok(outcome)
            }
            Err(SyncError::Cancelled(reason)) => {
                info!("Operation {} stopped: {}", id, reason);
                Err(BatchError {
                    operation_id: Some(id),
                    error: SyncError::Cancelled(reason),
                })
            }
            Err(e) => {
                error!("Operation {} failed: {}", id, e);
                handle.fail(&e.to_string()).await;
                Err(BatchError {
                    operation_id: Some(id),
                    error: e,
                })
            }
        }
    }

    async fn execute(&self, job: &Job, handle: Option<&OperationHandle>) -> Result<BatchOutcome> {
        let start = Instant::now();

        let (manifest, scan_errors, unreadable) = self.collect(job, handle).await?;

        let tree = read_branch_tree(self.api.as_ref(), &job.target).await?;
        let options = PlanOptions {
            allow_delete: job.allow_delete,
            update_policy: if self.settings.skip_unchanged {
                UpdatePolicy::SkipUnchanged
            } else {
                UpdatePolicy::Always
            },
            repo_path: if job.combine {
                String::new()
            } else {
                job.sources[0].repo_path.clone()
            },
            unreadable,
        };
        let changes = plan(&manifest, &tree.entries, &options);

        let upload_bytes = changes.upload_bytes();
        if upload_bytes > self.settings.max_upload_bytes {
            return Err(SyncError::SizeLimit(format!(
                "{} bytes to upload exceeds the limit of {} bytes",
                upload_bytes, self.settings.max_upload_bytes
            )));
        }
        info!(
            "Planned {}: {} to add, {} to update, {} to delete, {} kept",
            job.target,
            changes.to_add.len(),
            changes.to_update.len(),
            changes.to_delete.len(),
            changes.to_keep.len()
        );

        let mut outcome = BatchOutcome {
            operation_id: handle.map(|h| h.id().to_string()),
            status: BatchStatus::Completed,
            repository: format!("{}/{}", job.target.owner, job.target.repo),
            branch: job.target.branch.clone(),
            files_uploaded: changes.upload_count(),
            files_added: changes.to_add.len(),
            files_updated: changes.to_update.len(),
            files_deleted: changes.to_delete.len(),
            files_unchanged: changes.unchanged,
            commit_sha: None,
            commit_message: None,
            scan_errors,
            plan: None,
        };

        let handle = match handle {
            None => {
                outcome.status = BatchStatus::DryRun;
                outcome.commit_message = Some(
                    job.message
                        .clone()
                        .unwrap_or_else(|| changes.default_message()),
                );
                outcome.plan = Some(changes.preview());
                return Ok(outcome);
            }
            Some(handle) => handle,
        };

        if changes.is_empty() {
            info!("{} already matches local content, nothing to commit", job.target);
            outcome.status = BatchStatus::NoChanges;
            return Ok(outcome);
        }

        handle
            .update(OperationUpdate {
                total: Some(changes.upload_count()),
                ..OperationUpdate::default()
            })
            .await;

        let head = BranchHead {
            commit_sha: tree.commit_sha,
            tree_sha: tree.tree_sha,
        };
        let commit = CommitBuilder::new(Arc::clone(&self.api), self.settings.blob_concurrency)
            .commit_on(
                &job.target,
                &head,
                &changes,
                job.message.clone(),
                job.author.clone(),
                handle,
            )
            .await?;

        info!(
            "{:?} {} committed {} in {:.2}s",
            job.kind,
            handle.id(),
            commit.commit_sha,
            start.elapsed().as_secs_f64()
        );

        outcome.commit_sha = Some(commit.commit_sha);
        outcome.commit_message = Some(commit.message);
        Ok(outcome)
    }

    /// Scan every source and assemble the manifest to plan with, along with
    /// the skipped paths in the same coordinates as the manifest.
    async fn collect(
        &self,
        job: &Job,
        handle: Option<&OperationHandle>,
    ) -> Result<(Manifest, Vec<ScanIssue>, Vec<String>)> {
        let options = ScanOptions {
            recursive: true,
            include_hidden: job.include_hidden,
            exclude_patterns: job.exclude_patterns.clone(),
            max_files: self.settings.max_files,
            max_file_size: Some(self.settings.max_file_size),
            read_content: true,
        };

        let mut combined = Manifest::new();
        let mut issues = Vec::new();
        let mut unreadable = Vec::new();

        for source in &job.sources {
            let root = source.local_path.clone();
            let scan_options = options.clone();
            let result = tokio::task::spawn_blocking(move || scan(&root, &scan_options))
                .await
                .map_err(|e| SyncError::Internal(format!("scan task failed: {}", e)))??;

            if result.truncated {
                return Err(SyncError::SizeLimit(format!(
                    "{} holds more than {} files",
                    source.local_path.display(),
                    self.settings.max_files
                )));
            }

            if let Some(issue) = result.issues.first() {
                if !job.continue_on_error {
                    return Err(SyncError::local_io(
                        issue.path.clone(),
                        std::io::Error::other(issue.error.clone()),
                    ));
                }
            }
            for issue in &result.issues {
                warn!("Skipping {}: {}", issue.path, issue.error);
                if let Some(handle) = handle {
                    handle
                        .update(OperationUpdate::error(format!("{}: {}", issue.path, issue.error)))
                        .await;
                }
            }
            unreadable.extend(result.issues.iter().map(|issue| {
                if job.combine {
                    join_repo_path(&source.repo_path, &issue.path)
                } else {
                    issue.path.clone()
                }
            }));
            issues.extend(result.issues);

            info!(
                "Scanned {} ({} files, {} bytes)",
                source.local_path.display(),
                result.manifest.len(),
                result.manifest.total_size()
            );

            if job.combine {
                combined.merge(result.manifest.rebased(&source.repo_path))?;
            } else {
                combined.merge(result.manifest)?;
            }
        }

        Ok((combined, issues, unreadable))
    }
}
