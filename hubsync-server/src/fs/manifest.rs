//! Manifest types produced by a local scan.
//!
//! A manifest maps every scanned file's forward-slash relative path to its
//! content, size and SHA-256 digest. It is built once per scan, diffed against
//! the remote tree, then dropped.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::btree_map::{self, BTreeMap};

use crate::utils::{Result, SyncError};

/// One file discovered locally.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    /// POSIX-style path, unique within one manifest
    pub relative_path: String,

    /// Raw bytes; `None` for metadata-only scans
    #[serde(skip)]
    pub content: Option<Bytes>,

    pub size: u64,

    /// SHA-256 hex digest of `content`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl FileEntry {
    pub fn with_content(
        relative_path: String,
        content: impl Into<Bytes>,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        let content = content.into();
        let content_hash = format!("{:x}", Sha256::digest(&content));
        Self {
            relative_path,
            size: content.len() as u64,
            content: Some(content),
            content_hash: Some(content_hash),
            modified,
        }
    }

    pub fn metadata_only(relative_path: String, size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            relative_path,
            content: None,
            size,
            content_hash: None,
            modified,
        }
    }

    /// Same entry under a different path.
    pub fn relocated(&self, relative_path: String) -> Self {
        Self {
            relative_path,
            ..self.clone()
        }
    }

    /// File extension, lowercased, without the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.relative_path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// A per-path problem recorded during a scan; the scan itself continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanIssue {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: BTreeMap<String, FileEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, rejecting duplicate paths.
    pub fn insert(&mut self, entry: FileEntry) -> Result<()> {
        match self.entries.entry(entry.relative_path.clone()) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
            btree_map::Entry::Occupied(slot) => Err(SyncError::Validation(format!(
                "duplicate path in manifest: {}",
                slot.key()
            ))),
        }
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileEntry> {
        self.entries.get(relative_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.entries.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.values()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// Copy of this manifest with every path placed under `prefix`.
    pub fn rebased(&self, prefix: &str) -> Manifest {
        let entries = self
            .entries
            .values()
            .map(|entry| {
                let path = crate::sync::join_repo_path(prefix, &entry.relative_path);
                (path.clone(), entry.relocated(path))
            })
            .collect();
        Manifest { entries }
    }

    /// Move all entries of `other` into `self`; fails on the first shared path.
    pub fn merge(&mut self, other: Manifest) -> Result<()> {
        for (_, entry) in other.entries {
            self.insert(entry)?;
        }
        Ok(())
    }
}

impl IntoIterator for Manifest {
    type Item = FileEntry;
    type IntoIter = btree_map::IntoValues<String, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}
