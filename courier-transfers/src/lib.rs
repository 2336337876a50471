//! Courier Transfers
//!
//! Progress tracking for recursive uploads and downloads. A transfer of a
//! directory tree is modeled as a tree of `TransferRecord`s, one per file or
//! directory. The transport feeds byte counts, errors, and discovery state
//! into the records; every node keeps exact subtree totals so observers can
//! read progress, speed, and errors at any level without walking the tree.
//!
//! Key types:
//! - `TransferRecord` - A file or directory node, always held as `Arc`
//! - `RecordContext` - Factory carrying settings and the notification center
//! - `NotificationCenter` - Began/progress/finished publish-subscribe hub
//! - `SpeedEstimator` - Windowed, smoothed bytes-per-second estimate
//! - `PropertyBag` - Caller-attached metadata on each record

pub mod config;
pub mod connection;
mod error;
pub mod notifications;
pub mod properties;
pub mod record;
pub mod speed;
pub mod types;

pub use config::RecordConfig;
pub use connection::{CancelRequest, Connection};
pub use error::{ConfigError, TreeError};
pub use notifications::{
    NotificationCenter, NotificationKind, SubscriptionId, TransferNotification,
};
pub use properties::{PropertyBag, PropertyValue};
pub use record::{RecordContext, RecordSnapshot, TransferRecord};
pub use speed::SpeedEstimator;
pub use types::{ProblemCounts, Progress, TransferDirection, TransferError};
