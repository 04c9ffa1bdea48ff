//! Utility modules for the hubsync server.

pub mod errors;
pub mod logger;

pub use errors::{Result, SyncError};
