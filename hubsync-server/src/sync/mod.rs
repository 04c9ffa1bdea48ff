//! Directory synchronization against a GitHub branch.
//!
//! The pipeline is: read the branch tree ([`remote_tree`]), classify every
//! path ([`plan`]), then publish one commit through the Git data API
//! ([`commit`]). Only the final ref update is visible to other clients.

pub mod commit;
pub mod plan;
pub mod remote_tree;

pub use commit::{
    CommitAuthor, CommitBuilder, CommitObserver, CommitOutcome, CommitPhase, CommitPlan,
    NoopObserver, TreeEntry,
};
pub use plan::{plan, ChangeSet, PlanOptions, PlannedFile, UpdatePolicy};
pub use remote_tree::{read_branch_tree, resolve_head, BranchHead, BranchTree, RemoteEntry};

use serde::{Deserialize, Serialize};

use crate::utils::{Result, SyncError};

/// Repository and branch a sync targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl RepoTarget {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("branch", &self.branch),
        ] {
            if value.trim().is_empty() {
                return Err(SyncError::Validation(format!("{} is required", field)));
            }
            if field != "branch" && value.contains('/') {
                return Err(SyncError::Validation(format!(
                    "{} must not contain '/': {}",
                    field, value
                )));
            }
        }
        Ok(())
    }

    /// `repos/{owner}/{repo}/{suffix}`
    pub fn api_path(&self, suffix: &str) -> String {
        format!(
            "repos/{}/{}/{}",
            self.owner,
            self.repo,
            suffix.trim_start_matches('/')
        )
    }
}

impl std::fmt::Display for RepoTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

/// Normalize a caller-supplied repository path: forward slashes, no leading or
/// trailing slash, no `.` or `..` segments. The repository root is `""`.
pub fn normalize_repo_path(path: &str) -> Result<String> {
    let path = path.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(SyncError::Validation(format!(
                    "repo_path must not contain '..': {}",
                    path
                )))
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Join a repository prefix and a scan-relative path.
pub fn join_repo_path(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let relative = relative.trim_start_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}

/// True when `path` lies at or under `prefix` (`""` contains everything).
pub fn is_under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    prefix.is_empty()
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}
