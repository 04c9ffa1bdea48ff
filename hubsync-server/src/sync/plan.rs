//! Diff a local manifest against a remote tree.
//!
//! Pure and synchronous: every path in the union of local (prefixed) and
//! remote blob paths lands in exactly one of `to_add`, `to_update`, `to_keep`
//! or `to_delete`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::collections::HashSet;

use super::{is_under_prefix, join_repo_path, RemoteEntry};
use crate::fs::{FileEntry, Manifest};

/// How to treat a local file whose path already exists remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Always send a new blob
    #[default]
    Always,
    /// Keep the remote entry when its blob id matches the local content
    SkipUnchanged,
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub allow_delete: bool,
    pub update_policy: UpdatePolicy,
    /// Normalized repository prefix the manifest is placed under
    pub repo_path: String,
    /// Manifest-relative paths (files or directories) that exist locally but
    /// could not be scanned. Remote entries at or under them are never deleted.
    pub unreadable: Vec<String>,
}

/// A local file scheduled for upload, under its repository path.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedFile {
    pub path: String,
    pub size: u64,
    #[serde(skip)]
    pub entry: FileEntry,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub to_add: Vec<PlannedFile>,
    pub to_update: Vec<PlannedFile>,
    pub to_keep: Vec<RemoteEntry>,
    pub to_delete: Vec<RemoteEntry>,
    /// Local files moved to `to_keep` because their content already matches
    pub unchanged: usize,
}

impl ChangeSet {
    /// True when committing would not change the branch.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Files that need a new blob
    pub fn uploads(&self) -> impl Iterator<Item = &PlannedFile> {
        self.to_add.iter().chain(self.to_update.iter())
    }

    pub fn upload_count(&self) -> usize {
        self.to_add.len() + self.to_update.len()
    }

    pub fn upload_bytes(&self) -> u64 {
        self.uploads().map(|f| f.size).sum()
    }

    /// Commit message summarizing the change set.
    pub fn default_message(&self) -> String {
        let mut parts = Vec::new();
        if !self.to_add.is_empty() {
            parts.push(format!("Add {} new {}", self.to_add.len(), plural(self.to_add.len())));
        }
        if !self.to_update.is_empty() {
            parts.push(format!("Update {} {}", self.to_update.len(), plural(self.to_update.len())));
        }
        if !self.to_delete.is_empty() {
            parts.push(format!("Delete {} {}", self.to_delete.len(), plural(self.to_delete.len())));
        }
        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join("; ")
        }
    }

    /// Path lists for dry-run reports.
    pub fn preview(&self) -> Value {
        json!({
            "to_add": self.to_add.iter().map(|f| &f.path).collect::<Vec<_>>(),
            "to_update": self.to_update.iter().map(|f| &f.path).collect::<Vec<_>>(),
            "to_delete": self.to_delete.iter().map(|e| &e.path).collect::<Vec<_>>(),
            "kept": self.to_keep.len(),
            "unchanged": self.unchanged,
            "upload_bytes": self.upload_bytes(),
        })
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        "file"
    } else {
        "files"
    }
}

/// Git blob id of `content`: SHA-1 over `blob {len}\0{content}`.
pub fn git_blob_id(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Classify every local and remote path.
pub fn plan(local: &Manifest, remote: &[RemoteEntry], options: &PlanOptions) -> ChangeSet {
    let local = local.rebased(&options.repo_path);
    let unreadable: Vec<String> = options
        .unreadable
        .iter()
        .map(|p| join_repo_path(&options.repo_path, p))
        .collect();
    let mut changes = ChangeSet::default();
    let mut remote_paths = HashSet::with_capacity(remote.len());

    for entry in remote {
        remote_paths.insert(entry.path.as_str());

        match local.get(&entry.path) {
            Some(file) => {
                let unchanged = options.update_policy == UpdatePolicy::SkipUnchanged
                    && entry.kind == "blob"
                    && file
                        .content
                        .as_ref()
                        .map(|c| git_blob_id(c) == entry.sha)
                        .unwrap_or(false);
                if unchanged {
                    changes.unchanged += 1;
                    changes.to_keep.push(entry.clone());
                } else {
                    changes.to_update.push(planned(file));
                }
            }
            None if options.allow_delete
                && is_under_prefix(&entry.path, &options.repo_path)
                && !unreadable.iter().any(|p| is_under_prefix(&entry.path, p)) =>
            {
                changes.to_delete.push(entry.clone());
            }
            None => changes.to_keep.push(entry.clone()),
        }
    }

    for file in local.iter() {
        if !remote_paths.contains(file.relative_path.as_str()) {
            changes.to_add.push(planned(file));
        }
    }

    changes
}

fn planned(file: &FileEntry) -> PlannedFile {
    PlannedFile {
        path: file.relative_path.clone(),
        size: file.size,
        entry: file.clone(),
    }
}
