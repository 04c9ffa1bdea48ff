//! Local filesystem access: scanning directories into manifests and batch reads.

pub mod manifest;
pub mod reader;
pub mod walker;

pub use manifest::{FileEntry, Manifest, ScanIssue};
pub use walker::{scan, ScanOptions, ScanResult};
