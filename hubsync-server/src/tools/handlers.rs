//! Tool implementations. Each handler decodes its arguments, runs against the
//! shared services and returns a JSON result.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use super::{ToolContext, ToolError, ToolName};
use crate::executor::{
    SyncDirectoryRequest, SyncMultipleRequest, TrackerError, UploadDirectoryRequest,
    UploadMultipleRequest,
};
use crate::fs::reader::{self, DEFAULT_MAX_TOTAL_SIZE};
use crate::fs::{scan, FileEntry, ScanOptions};
use crate::utils::SyncError;

pub(super) async fn dispatch(ctx: &ToolContext, tool: ToolName, args: Value) -> Result<Value, ToolError> {
    match tool {
        ToolName::ScanLocalDirectory => scan_local_directory(ctx, decode(args)?).await,
        ToolName::ReadMultipleFiles => read_multiple_files(decode(args)?).await,
        ToolName::UploadDirectory => {
            let req: UploadDirectoryRequest = decode(args)?;
            to_value(ctx.executor.upload_directory(req).await?)
        }
        ToolName::UploadMultipleDirectories => {
            let req: UploadMultipleRequest = decode(args)?;
            to_value(ctx.executor.upload_multiple(req).await?)
        }
        ToolName::SyncDirectory => {
            let req: SyncDirectoryRequest = decode(args)?;
            to_value(ctx.executor.sync_directory(req).await?)
        }
        ToolName::SyncMultipleDirectories => {
            let req: SyncMultipleRequest = decode(args)?;
            to_value(ctx.executor.sync_multiple(req).await?)
        }
        ToolName::GetBatchOperationStatus => operation_status(ctx, decode(args)?).await,
        ToolName::CancelBatchOperation => cancel_operation(ctx, decode(args)?).await,
    }
}

fn decode<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::from(SyncError::Internal(e.to_string())))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileInfoLevel {
    /// Path and size
    #[default]
    Basic,
    /// Adds modification time and extension
    Detailed,
    /// Adds the SHA-256 digest of the content
    Full,
}

fn default_true() -> bool {
    true
}

fn default_max_files() -> usize {
    1000
}

fn default_max_total_size() -> u64 {
    DEFAULT_MAX_TOTAL_SIZE
}

#[derive(Debug, Deserialize)]
struct ScanArgs {
    path: String,
    #[serde(default = "default_true")]
    recursive: bool,
    #[serde(default)]
    include_hidden: bool,
    #[serde(default)]
    exclude_patterns: Vec<String>,
    #[serde(default = "default_max_files")]
    max_files: usize,
    #[serde(default)]
    file_info_level: FileInfoLevel,
}

fn describe(entry: &FileEntry, level: FileInfoLevel) -> Value {
    let mut info = json!({
        "path": entry.relative_path,
        "size": entry.size,
    });
    if level != FileInfoLevel::Basic {
        info["modified"] = json!(entry.modified);
        info["extension"] = json!(entry.extension());
    }
    if level == FileInfoLevel::Full {
        info["sha256"] = json!(entry.content_hash);
    }
    info
}

async fn scan_local_directory(ctx: &ToolContext, args: ScanArgs) -> Result<Value, ToolError> {
    if args.path.trim().is_empty() {
        return Err(ToolError::InvalidArguments("path is required".to_string()));
    }
    if args.max_files == 0 {
        return Err(ToolError::InvalidArguments(
            "max_files must be at least 1".to_string(),
        ));
    }

    let level = args.file_info_level;
    let options = ScanOptions {
        recursive: args.recursive,
        include_hidden: args.include_hidden,
        exclude_patterns: args.exclude_patterns,
        max_files: args.max_files,
        max_file_size: (level == FileInfoLevel::Full).then_some(ctx.sync.max_file_size),
        read_content: level == FileInfoLevel::Full,
    };
    let root = PathBuf::from(&args.path);

    let result = tokio::task::spawn_blocking(move || scan(&root, &options))
        .await
        .map_err(|e| SyncError::Internal(format!("scan task failed: {}", e)))??;

    let files: Vec<Value> = result
        .manifest
        .iter()
        .map(|entry| describe(entry, level))
        .collect();

    info!(
        "Scanned {}: {} files, {} issues",
        args.path,
        files.len(),
        result.issues.len()
    );

    Ok(json!({
        "path": args.path,
        "total_files": files.len(),
        "total_size": result.manifest.total_size(),
        "truncated": result.truncated,
        "files": files,
        "errors": result.issues,
    }))
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    paths: Vec<String>,
    #[serde(default = "default_max_total_size")]
    max_total_size: u64,
    #[serde(default = "default_true")]
    continue_on_error: bool,
}

async fn read_multiple_files(args: ReadArgs) -> Result<Value, ToolError> {
    let report =
        reader::read_multiple_files(&args.paths, args.max_total_size, args.continue_on_error).await?;
    to_value(report)
}

#[derive(Debug, Deserialize)]
struct StatusArgs {
    #[serde(default)]
    operation_id: Option<String>,
}

async fn operation_status(ctx: &ToolContext, args: StatusArgs) -> Result<Value, ToolError> {
    match args.operation_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => match ctx.tracker().get(&id).await {
            Some(op) => to_value(op),
            None => Err(ToolError::OperationNotFound(id)),
        },
        None => {
            let operations = ctx.tracker().list_all().await;
            Ok(json!({
                "count": operations.len(),
                "operations": operations,
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CancelArgs {
    operation_id: String,
}

async fn cancel_operation(ctx: &ToolContext, args: CancelArgs) -> Result<Value, ToolError> {
    match ctx.tracker().cancel(&args.operation_id).await {
        Ok(status) => Ok(json!({
            "operation_id": args.operation_id,
            "status": status,
            "cancelled": status == crate::executor::OperationStatus::Cancelled,
        })),
        Err(TrackerError::NotFound(id)) => Err(ToolError::OperationNotFound(id)),
        Err(err) => Err(ToolError::from(SyncError::Internal(err.to_string()))),
    }
}
