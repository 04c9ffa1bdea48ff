//! Descriptions and JSON input schemas advertised by `tools/list`.

use serde_json::{json, Value};

use super::ToolName;
use crate::fs::reader::DEFAULT_MAX_TOTAL_SIZE;

pub fn description(tool: ToolName) -> &'static str {
    match tool {
        ToolName::ScanLocalDirectory => {
            "Scan a local directory and list its files, honoring hidden-file and glob exclusion rules."
        }
        ToolName::ReadMultipleFiles => {
            "Read several local files at once (base64 content) under a total size budget."
        }
        ToolName::UploadDirectory => {
            "Upload a local directory to a GitHub repository as one atomic commit. Never deletes remote files."
        }
        ToolName::UploadMultipleDirectories => {
            "Upload several local directories to one repository in a single atomic commit."
        }
        ToolName::SyncDirectory => {
            "Make a repository path match a local directory in one atomic commit, optionally deleting remote files missing locally."
        }
        ToolName::SyncMultipleDirectories => {
            "Sync several local directories to one repository, each mapping as its own commit."
        }
        ToolName::GetBatchOperationStatus => {
            "Get the status of one batch operation, or list all tracked operations."
        }
        ToolName::CancelBatchOperation => "Request cancellation of a running batch operation.",
    }
}

fn target_properties() -> Value {
    json!({
        "owner": { "type": "string", "description": "Repository owner" },
        "repo": { "type": "string", "description": "Repository name" },
        "branch": { "type": "string", "default": "main" },
        "commit_message": { "type": "string", "description": "Defaults to a summary of the changes" },
        "exclude_patterns": { "type": "array", "items": { "type": "string" }, "default": [] },
        "include_hidden": { "type": "boolean", "default": false },
        "dry_run": { "type": "boolean", "default": false },
        "continue_on_error": { "type": "boolean", "default": true },
        "author": {
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "email": { "type": "string" }
            },
            "required": ["name", "email"]
        }
    })
}

fn with_target(mut properties: Value, required: &[&str]) -> Value {
    if let (Some(props), Value::Object(target)) = (properties.as_object_mut(), target_properties()) {
        props.extend(target);
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub fn input_schema(tool: ToolName) -> Value {
    match tool {
        ToolName::ScanLocalDirectory => json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to scan" },
                "recursive": { "type": "boolean", "default": true },
                "include_hidden": { "type": "boolean", "default": false },
                "exclude_patterns": { "type": "array", "items": { "type": "string" }, "default": [] },
                "max_files": { "type": "integer", "default": 1000 },
                "file_info_level": {
                    "type": "string",
                    "enum": ["basic", "detailed", "full"],
                    "default": "basic"
                }
            },
            "required": ["path"]
        }),
        ToolName::ReadMultipleFiles => json!({
            "type": "object",
            "properties": {
                "paths": { "type": "array", "items": { "type": "string" } },
                "max_total_size": { "type": "integer", "default": DEFAULT_MAX_TOTAL_SIZE },
                "continue_on_error": { "type": "boolean", "default": true }
            },
            "required": ["paths"]
        }),
        ToolName::UploadDirectory => with_target(
            json!({
                "local_path": { "type": "string" },
                "repo_path": { "type": "string", "default": "" }
            }),
            &["local_path", "owner", "repo"],
        ),
        ToolName::UploadMultipleDirectories => with_target(
            json!({
                "directory_mappings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "local_path": { "type": "string" },
                            "repo_path": { "type": "string", "default": "" }
                        },
                        "required": ["local_path"]
                    }
                }
            }),
            &["directory_mappings", "owner", "repo"],
        ),
        ToolName::SyncDirectory => with_target(
            json!({
                "local_path": { "type": "string" },
                "repo_path": { "type": "string", "default": "" },
                "delete_remote_files": { "type": "boolean", "default": false }
            }),
            &["local_path", "owner", "repo"],
        ),
        ToolName::SyncMultipleDirectories => with_target(
            json!({
                "sync_mappings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "local_path": { "type": "string" },
                            "repo_path": { "type": "string", "default": "" },
                            "delete_remote_files": { "type": "boolean", "default": false }
                        },
                        "required": ["local_path"]
                    }
                }
            }),
            &["sync_mappings", "owner", "repo"],
        ),
        ToolName::GetBatchOperationStatus => json!({
            "type": "object",
            "properties": {
                "operation_id": { "type": "string", "description": "Omit to list all operations" }
            }
        }),
        ToolName::CancelBatchOperation => json!({
            "type": "object",
            "properties": {
                "operation_id": { "type": "string" }
            },
            "required": ["operation_id"]
        }),
    }
}
