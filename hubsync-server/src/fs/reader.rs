//! Batch file reading under a cumulative size budget.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use tracing::{info, warn};

use crate::utils::{Result, SyncError};

/// Default cumulative budget for one batch read
pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 50_000_000;

/// Result for a single requested path
#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    pub path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Base64-encoded bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadReport {
    pub files: Vec<ReadResult>,
    pub total_size: u64,
    pub succeeded: usize,
    pub failed: usize,
}

impl ReadResult {
    fn failure(path: &str, error: String) -> Self {
        Self {
            path: path.to_string(),
            success: false,
            size: None,
            content: None,
            encoding: None,
            error: Some(error),
        }
    }
}

/// Read several files, stopping each one that would push the total past `max_total_size`.
///
/// With `continue_on_error` every failure is recorded in the report; without it
/// the first failure aborts the batch.
pub async fn read_multiple_files(
    paths: &[String],
    max_total_size: u64,
    continue_on_error: bool,
) -> Result<ReadReport> {
    if paths.is_empty() {
        return Err(SyncError::Validation("paths must not be empty".to_string()));
    }

    let mut files = Vec::with_capacity(paths.len());
    let mut total_size = 0u64;

    for path in paths {
        match read_one(path, total_size, max_total_size).await {
            Ok((bytes, size)) => {
                total_size += size;
                files.push(ReadResult {
                    path: path.clone(),
                    success: true,
                    size: Some(size),
                    content: Some(STANDARD.encode(&bytes)),
                    encoding: Some("base64"),
                    error: None,
                });
            }
            Err(err) if continue_on_error => {
                warn!("Failed to read {}: {}", path, err);
                files.push(ReadResult::failure(path, err.to_string()));
            }
            Err(err) => return Err(err),
        }
    }

    let succeeded = files.iter().filter(|f| f.success).count();
    let failed = files.len() - succeeded;
    info!(
        "Read {} files ({} failed), {} bytes",
        succeeded, failed, total_size
    );

    Ok(ReadReport {
        files,
        total_size,
        succeeded,
        failed,
    })
}

async fn read_one(path: &str, used: u64, budget: u64) -> Result<(Vec<u8>, u64)> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| SyncError::local_io(path, e))?;
    if !metadata.is_file() {
        return Err(SyncError::local_io(
            path,
            std::io::Error::other("not a regular file"),
        ));
    }
    if used + metadata.len() > budget {
        return Err(SyncError::SizeLimit(format!(
            "{} ({} bytes) exceeds remaining budget of {} bytes",
            path,
            metadata.len(),
            budget.saturating_sub(used)
        )));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SyncError::local_io(path, e))?;
    let size = bytes.len() as u64;
    Ok((bytes, size))
}
