//! Value types shared by transfer records
//!
//! These are plain data: direction and error kinds reported by the transport,
//! the progress display state, and the leaf problem summary.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Transfer Direction
// =============================================================================

/// Direction of the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Downloading from server to local
    Download,
    /// Uploading from local to server
    Upload,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

// =============================================================================
// Transfer Error
// =============================================================================

/// Error reported by the transport for a single record
///
/// This is the value stored on a record by `set_error`. It is data about the
/// transfer, not a failure of this crate's own operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum TransferError {
    /// Path doesn't exist on the other side
    #[error("path not found")]
    NotFound,
    /// Permission denied
    #[error("permission denied")]
    Permission,
    /// Invalid path (malformed)
    #[error("invalid path")]
    Invalid,
    /// Local or remote file I/O failed
    #[error("file I/O error")]
    IoError,
    /// Protocol error (invalid/unexpected data)
    #[error("protocol error")]
    ProtocolError,
    /// Connection error (network failure)
    #[error("connection error")]
    ConnectionError,
    /// Destination already exists
    #[error("destination already exists")]
    Exists,
    /// Transfer was cancelled
    #[error("transfer cancelled")]
    Cancelled,
    /// Anything else, with the transport's description
    #[error("{0}")]
    Other(String),
}

impl TransferError {
    /// Parse an error kind string as sent by the transport
    ///
    /// Unrecognised kinds are kept verbatim in `Other`.
    pub fn from_error_kind(kind: &str) -> Self {
        match kind {
            "not_found" => TransferError::NotFound,
            "permission" => TransferError::Permission,
            "invalid" => TransferError::Invalid,
            "io_error" => TransferError::IoError,
            "protocol_error" => TransferError::ProtocolError,
            "connection_error" => TransferError::ConnectionError,
            "exists" => TransferError::Exists,
            "cancelled" => TransferError::Cancelled,
            other => TransferError::Other(other.to_string()),
        }
    }

    /// Returns true if the error came from a cancel request
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Display state of a record's completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "percent")]
pub enum Progress {
    /// Percentage not yet meaningful (size unknown or still discovering)
    Indeterminate,
    /// Whole percent complete, 0 to 100
    Percent(u8),
}

impl Progress {
    /// Ratio of `done` over `total` as a floored percentage, clamped to 100
    ///
    /// `total` must be non-zero.
    pub(crate) fn ratio(done: u64, total: u64) -> Self {
        debug_assert!(total > 0);
        let percent = (u128::from(done) * 100 / u128::from(total)).min(100);
        Progress::Percent(percent as u8)
    }

    /// The percentage, or None while indeterminate
    pub fn percent(&self) -> Option<u8> {
        match self {
            Progress::Indeterminate => None,
            Progress::Percent(p) => Some(*p),
        }
    }

    /// Returns true while the percentage is not meaningful
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Progress::Indeterminate)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Indeterminate => write!(f, "--"),
            Progress::Percent(p) => write!(f, "{p}%"),
        }
    }
}

// =============================================================================
// Problem Counts
// =============================================================================

/// Error/success tally over the file leaves of a subtree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemCounts {
    /// Files that have an error
    pub errors: usize,
    /// Files without an error
    pub successes: usize,
}

impl ProblemCounts {
    /// Returns true if any file in the subtree failed
    pub fn has_problems(&self) -> bool {
        self.errors > 0
    }
}

// =============================================================================
// Tests
// =============================================================================
