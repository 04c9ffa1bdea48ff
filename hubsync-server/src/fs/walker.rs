//! Local directory scanning.
//!
//! Walks a directory tree, applies hidden-file and glob exclusion rules to
//! bare names, and builds a [`Manifest`] of the files it accepts. Problems
//! with individual files are collected as [`ScanIssue`]s instead of
//! aborting the scan.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::manifest::{FileEntry, Manifest, ScanIssue};
use crate::utils::{Result, SyncError};

/// Options for directory scanning
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Descend into subdirectories
    pub recursive: bool,

    /// Accept names starting with `.`
    pub include_hidden: bool,

    /// Shell-glob patterns matched against bare file and directory names
    pub exclude_patterns: Vec<String>,

    /// Stop accepting files once this many were collected
    pub max_files: usize,

    /// Files above this size are reported as issues
    pub max_file_size: Option<u64>,

    /// Load file bytes (and hash them); metadata only when false
    pub read_content: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            include_hidden: false,
            exclude_patterns: Vec::new(),
            max_files: 1000,
            max_file_size: None,
            read_content: true,
        }
    }
}

/// Compiled exclusion patterns.
#[derive(Debug, Clone)]
pub struct ExcludeMatcher {
    set: GlobSet,
}

impl ExcludeMatcher {
    /// Compile patterns; a malformed pattern is a validation error.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    pub fn is_excluded(&self, name: &OsStr) -> bool {
        self.set.is_match(Path::new(name))
    }
}

/// Outcome of one scan pass
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub root: PathBuf,
    pub manifest: Manifest,
    pub issues: Vec<ScanIssue>,
    /// More eligible files existed than `max_files`
    pub truncated: bool,
}

/// Scan `root` and build a manifest.
///
/// # Returns
/// * `Ok(ScanResult)` - Manifest plus per-file issues
/// * `Err(SyncError)` - If the root is missing, not a directory, or a pattern is invalid
///
/// # Example
/// ```no_run
/// use hubsync_server::fs::walker::{scan, ScanOptions};
/// use std::path::Path;
///
/// let result = scan(Path::new("/data/site"), &ScanOptions::default()).unwrap();
/// println!("Found {} files", result.manifest.len());
/// ```
pub fn scan(root: &Path, options: &ScanOptions) -> Result<ScanResult> {
    let matcher = ExcludeMatcher::new(&options.exclude_patterns)?;

    let root_meta = std::fs::metadata(root)
        .map_err(|e| SyncError::local_io(root.display().to_string(), e))?;
    if !root_meta.is_dir() {
        return Err(SyncError::local_io(
            root.display().to_string(),
            std::io::Error::other("not a directory"),
        ));
    }

    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut manifest = Manifest::new();
    let mut issues = Vec::new();
    let mut truncated = false;

    let entries = walker
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || is_eligible(entry, options, &matcher));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(|p| relative_path(root, p))
                    .unwrap_or_default();
                warn!("Skipping unreadable entry {}: {}", path, err);
                issues.push(ScanIssue {
                    path,
                    error: err.to_string(),
                });
                continue;
            }
        };

        if entry.depth() == 0 || entry.file_type().is_dir() {
            continue;
        }

        let metadata = if entry.file_type().is_symlink() {
            // Follow links to regular files only
            match std::fs::metadata(entry.path()) {
                Ok(resolved) if resolved.is_file() => resolved,
                _ => {
                    debug!("Skipping symlink {}", entry.path().display());
                    continue;
                }
            }
        } else {
            match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    issues.push(ScanIssue {
                        path: relative_path(root, entry.path()),
                        error: err.to_string(),
                    });
                    continue;
                }
            }
        };

        if !metadata.is_file() {
            continue;
        }

        if manifest.len() >= options.max_files {
            truncated = true;
            break;
        }

        let rel = relative_path(root, entry.path());
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        if let Some(limit) = options.max_file_size {
            if metadata.len() > limit {
                issues.push(ScanIssue {
                    path: rel,
                    error: format!("file is {} bytes, limit is {} bytes", metadata.len(), limit),
                });
                continue;
            }
        }

        let file_entry = if options.read_content {
            match std::fs::read(entry.path()) {
                Ok(bytes) => FileEntry::with_content(rel, bytes, modified),
                Err(err) => {
                    issues.push(ScanIssue {
                        path: rel,
                        error: err.to_string(),
                    });
                    continue;
                }
            }
        } else {
            FileEntry::metadata_only(rel, metadata.len(), modified)
        };

        manifest.insert(file_entry)?;
    }

    if truncated {
        warn!(
            "Scan of {} stopped at {} files",
            root.display(),
            options.max_files
        );
    }

    Ok(ScanResult {
        root: root.to_path_buf(),
        manifest,
        issues,
        truncated,
    })
}

/// Hidden and excluded names are pruned together with their subtrees.
fn is_eligible(entry: &DirEntry, options: &ScanOptions, matcher: &ExcludeMatcher) -> bool {
    let name = entry.file_name();
    if !options.include_hidden && name.to_string_lossy().starts_with('.') {
        return false;
    }
    !matcher.is_excluded(name)
}

/// Forward-slash path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
