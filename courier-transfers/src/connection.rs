//! The transport capability a record can ask to cancel work

use crate::types::TransferDirection;

/// What the transport needs to identify one in-flight path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub direction: TransferDirection,
    pub remote_path: String,
    pub local_path: std::path::PathBuf,
}

/// A live transport session owned outside the record tree
///
/// Records hold connections weakly. Cancellation is advisory: the transport
/// may still finish or fail the transfer later through the normal feed.
pub trait Connection: Send + Sync {
    /// Abort the transfer of one path, if it is still in flight
    fn cancel_transfer(&self, request: &CancelRequest);
}
