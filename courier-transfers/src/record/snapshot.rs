//! Value copies of a record subtree for display

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TransferRecord;
use crate::types::{Progress, TransferDirection, TransferError};

/// Independent copy of a record and its descendants
///
/// Taken under the tree lock, so every total in the snapshot agrees with the
/// children it contains. Mutating the live record does not affect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub id: Uuid,
    pub name: String,
    pub direction: TransferDirection,
    pub is_directory: bool,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub size: u64,
    pub size_with_children: u64,
    pub bytes_transferred: u64,
    pub transferred: u64,
    pub progress: Progress,
    pub speed: f64,
    pub elapsed: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TransferError>,
    pub is_discovering: bool,
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RecordSnapshot>,
}

impl RecordSnapshot {
    /// Iterate this snapshot and all descendants, depth first
    pub fn iter(&self) -> impl Iterator<Item = &RecordSnapshot> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }
}

impl TransferRecord {
    /// Copy this record and its subtree
    pub fn snapshot(self: &Arc<Self>) -> RecordSnapshot {
        self.with_tree_lock(|_, _| self.snapshot_locked())
    }

    fn snapshot_locked(&self) -> RecordSnapshot {
        let (local_path, remote_path) = {
            let paths = self.read_paths();
            (paths.local.clone(), paths.remote.clone())
        };
        let children = self
            .children()
            .iter()
            .map(|child| child.snapshot_locked())
            .collect();
        let state = self.lock_state();

        RecordSnapshot {
            id: self.id,
            name: self.name(),
            direction: self.direction,
            is_directory: self.is_directory,
            local_path,
            remote_path,
            size: state.size,
            size_with_children: state.size_with_children,
            bytes_transferred: state.bytes_transferred,
            transferred: state.transferred_with_children,
            progress: state.progress(),
            speed: state.speed.bytes_per_second(),
            elapsed: state.elapsed(),
            started_at: state.started_at,
            error: state.error.clone(),
            is_discovering: state.discovering,
            cancel_requested: state.cancel_requested,
            children,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
