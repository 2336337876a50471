//! Errors returned by this crate's own operations

use std::io;

/// Structurally invalid tree operations
///
/// Only `add_child` links records, and it refuses anything that would break
/// the single-parent, acyclic shape of a transfer tree.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The record has neither a remote nor a local path
    #[error("record has no remote or local path")]
    MissingPath,

    /// A record cannot be its own child
    #[error("record cannot be attached to itself")]
    SelfAttachment,

    /// Records are only ever appended, never re-parented
    #[error("record {remote_path} already has a parent")]
    AlreadyAttached { remote_path: String },

    /// The record is an ancestor of the intended parent
    #[error("attaching {remote_path} would create a cycle")]
    Cycle { remote_path: String },
}

/// Errors loading a [`RecordConfig`](crate::RecordConfig)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
