//! Hubsync Server Library
//!
//! GitHub tool proxy that mirrors local directories into repositories as
//! single atomic commits, served over JSON-RPC and SSE.

pub mod api;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod github;
pub mod sync;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{Result, SyncError};
