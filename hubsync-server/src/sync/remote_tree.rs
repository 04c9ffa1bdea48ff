//! Read the current head and flattened tree of a branch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::RepoTarget;
use crate::github::{str_at, UpstreamApi};
use crate::utils::{Result, SyncError};

/// One blob (or submodule) in the remote tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchHead {
    pub commit_sha: String,
    pub tree_sha: String,
}

#[derive(Debug, Clone)]
pub struct BranchTree {
    pub commit_sha: String,
    pub tree_sha: String,
    pub entries: Vec<RemoteEntry>,
    /// GitHub cut the recursive listing short
    pub truncated: bool,
}

/// Resolve the branch ref to its commit and that commit's root tree.
pub async fn resolve_head(api: &dyn UpstreamApi, target: &RepoTarget) -> Result<BranchHead> {
    let ref_path = target.api_path(&format!("git/ref/heads/{}", target.branch));
    let reference = match api.get_json(&ref_path, &[]).await {
        Ok(value) => value,
        Err(e) if e.status() == Some(404) => {
            return Err(SyncError::NotFound(format!("branch {}", target)));
        }
        Err(e) => return Err(e),
    };
    let commit_sha = str_at(&reference, "/object/sha")?;

    let commit = api
        .get_json(&target.api_path(&format!("git/commits/{}", commit_sha)), &[])
        .await?;
    let tree_sha = str_at(&commit, "/tree/sha")?;

    Ok(BranchHead {
        commit_sha,
        tree_sha,
    })
}

/// Head plus every blob and submodule entry of the branch, in one recursive listing.
pub async fn read_branch_tree(api: &dyn UpstreamApi, target: &RepoTarget) -> Result<BranchTree> {
    let head = resolve_head(api, target).await?;

    let tree = api
        .get_json(
            &target.api_path(&format!("git/trees/{}", head.tree_sha)),
            &[("recursive", "1")],
        )
        .await?;

    let truncated = tree.get("truncated").and_then(Value::as_bool).unwrap_or(false);
    if truncated {
        warn!(
            "Remote tree of {} is truncated; entries beyond the listing are kept untouched",
            target
        );
    }

    let raw = tree
        .get("tree")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::Decode("missing field /tree in GitHub response".to_string()))?;

    let mut entries = Vec::with_capacity(raw.len());
    for item in raw {
        let entry: RemoteEntry = serde_json::from_value(item.clone())?;
        if entry.kind == "tree" {
            continue;
        }
        entries.push(entry);
    }

    info!(
        "Read {} remote entries from {} (commit {})",
        entries.len(),
        target,
        head.commit_sha
    );

    Ok(BranchTree {
        commit_sha: head.commit_sha,
        tree_sha: head.tree_sha,
        entries,
        truncated,
    })
}
