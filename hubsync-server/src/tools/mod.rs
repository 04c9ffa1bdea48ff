//! Tool registry: the closed set of tools exposed through `tools/list` and
//! `tools/call`.

mod handlers;
pub mod schema;

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::executor::{BatchError, BatchExecutor, OperationTracker};
use crate::utils::SyncError;

/// JSON-RPC error codes used for tool failures
pub mod codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const TOOL_FAILED: i64 = -32000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ScanLocalDirectory,
    ReadMultipleFiles,
    UploadDirectory,
    UploadMultipleDirectories,
    SyncDirectory,
    SyncMultipleDirectories,
    GetBatchOperationStatus,
    CancelBatchOperation,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::ScanLocalDirectory,
        ToolName::ReadMultipleFiles,
        ToolName::UploadDirectory,
        ToolName::UploadMultipleDirectories,
        ToolName::SyncDirectory,
        ToolName::SyncMultipleDirectories,
        ToolName::GetBatchOperationStatus,
        ToolName::CancelBatchOperation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ScanLocalDirectory => "scan_local_directory",
            ToolName::ReadMultipleFiles => "read_multiple_files",
            ToolName::UploadDirectory => "upload_directory_to_github",
            ToolName::UploadMultipleDirectories => "upload_multiple_directories_to_github",
            ToolName::SyncDirectory => "sync_local_directory_with_github",
            ToolName::SyncMultipleDirectories => "sync_multiple_directories_with_github",
            ToolName::GetBatchOperationStatus => "get_batch_operation_status",
            ToolName::CancelBatchOperation => "cancel_batch_operation",
        }
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| ToolError::UnknownTool(s.to_string()))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{source}")]
    Failed {
        operation_id: Option<String>,
        #[source]
        source: SyncError,
    },

    #[error("Operation {0} not found")]
    OperationNotFound(String),

    /// Carries the limit in seconds.
    #[error("Execution timed out")]
    Timeout(u64),

    #[error("Invalid tool registry: {0}")]
    Registry(String),
}

impl ToolError {
    pub fn rpc_code(&self) -> i64 {
        match self {
            ToolError::UnknownTool(_) => codes::METHOD_NOT_FOUND,
            ToolError::InvalidArguments(_) => codes::INVALID_PARAMS,
            ToolError::Failed { source, .. } if source.is_validation() => codes::INVALID_PARAMS,
            ToolError::Failed { .. } | ToolError::OperationNotFound(_) | ToolError::Timeout(_) => {
                codes::TOOL_FAILED
            }
            ToolError::Registry(_) => codes::INTERNAL_ERROR,
        }
    }

    pub fn operation_id(&self) -> Option<&str> {
        match self {
            ToolError::Failed { operation_id, .. } => operation_id.as_deref(),
            ToolError::OperationNotFound(id) => Some(id),
            _ => None,
        }
    }

    /// Structured payload for the JSON-RPC `error.data` field.
    pub fn data(&self) -> Value {
        let mut data = json!({
            "error": self.to_string(),
            "operation_id": self.operation_id(),
        });
        if let ToolError::Timeout(secs) = self {
            data["timeout_secs"] = json!(secs);
        }
        data
    }
}

impl From<SyncError> for ToolError {
    fn from(source: SyncError) -> Self {
        ToolError::Failed {
            operation_id: None,
            source,
        }
    }
}

impl From<BatchError> for ToolError {
    fn from(err: BatchError) -> Self {
        ToolError::Failed {
            operation_id: err.operation_id,
            source: err.error,
        }
    }
}

/// Services the tool handlers work with.
#[derive(Clone)]
pub struct ToolContext {
    pub executor: BatchExecutor,
    pub sync: SyncConfig,
}

impl ToolContext {
    pub fn new(executor: BatchExecutor, sync: SyncConfig) -> Self {
        Self { executor, sync }
    }

    pub fn tracker(&self) -> &OperationTracker {
        self.executor.tracker()
    }
}

/// Advertised definition of one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: &'static str,
    pub input_schema: Value,
}

pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// Build the registry and check every schema.
    pub fn new() -> Result<Self, ToolError> {
        let tools: Vec<ToolSpec> = ToolName::ALL
            .into_iter()
            .map(|name| ToolSpec {
                name,
                description: schema::description(name),
                input_schema: schema::input_schema(name),
            })
            .collect();

        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ToolError::Registry(format!("duplicate tool {}", tool.name)));
            }
            validate_schema(tool)?;
        }

        info!("Registered {} tools", tools.len());
        Ok(Self { tools })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// `tools/list` entries
    pub fn list(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name.as_str(),
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        name.parse::<ToolName>().is_ok()
    }

    /// Run a tool by name with JSON arguments.
    pub async fn call(&self, ctx: &ToolContext, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool: ToolName = name.parse()?;
        let args = match args {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => args,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "arguments must be an object, got {}",
                    other
                )))
            }
        };

        debug!("Calling tool {}", tool);
        handlers::dispatch(ctx, tool, args).await
    }
}

fn validate_schema(tool: &ToolSpec) -> Result<(), ToolError> {
    let invalid = |msg: &str| ToolError::Registry(format!("{}: {}", tool.name, msg));

    if tool.input_schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("schema type must be object"));
    }
    let properties = tool
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("schema has no properties"))?;

    if let Some(required) = tool.input_schema.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| invalid("required must be an array"))?;
        for field in required {
            let field = field
                .as_str()
                .ok_or_else(|| invalid("required entries must be strings"))?;
            if !properties.contains_key(field) {
                return Err(invalid(&format!("required field {} is not a property", field)));
            }
        }
    }
    Ok(())
}
