//! Transfer records
//!
//! A `TransferRecord` is one file or directory in a transfer tree. Records are
//! always handled through `Arc<TransferRecord>`: a parent owns its children,
//! while the parent and connection links are weak. Cloning the `Arc` aliases
//! the same node; `snapshot()` is the way to take an independent copy.
//!
//! Every mutation runs under the tree lock of the record's current root and
//! propagates its delta to every ancestor before the lock is released, so the
//! subtree totals of each node are always exact. Queries only take the
//! node's own state lock and never wait on the transport.
//!
//! ## Module Structure
//!
//! - `tree` - Tree locking, attachment, lookup, and delta propagation
//! - `snapshot` - Serializable value copies of a subtree

mod snapshot;
mod tree;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::RecordConfig;
use crate::connection::{CancelRequest, Connection};
use crate::notifications::{NotificationCenter, NotificationKind};
use crate::properties::{PropertyBag, PropertyValue};
use crate::speed::SpeedEstimator;
use crate::types::{ProblemCounts, Progress, TransferDirection, TransferError};

pub use snapshot::RecordSnapshot;
use tree::{Delta, Outbox};

// =============================================================================
// Record Context
// =============================================================================

/// Settings and notification center shared by the records of a client
#[derive(Debug, Clone)]
pub struct RecordContext {
    config: Arc<RecordConfig>,
    notifications: Arc<NotificationCenter>,
}

impl Default for RecordContext {
    /// Default settings, posting to the process-wide center
    fn default() -> Self {
        Self::new(RecordConfig::default(), NotificationCenter::global())
    }
}

impl RecordContext {
    pub fn new(config: RecordConfig, notifications: Arc<NotificationCenter>) -> Self {
        Self {
            config: Arc::new(config),
            notifications,
        }
    }

    pub fn config(&self) -> &RecordConfig {
        &self.config
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    /// Create a record for sending `local_path` to `remote_path`
    pub fn upload_record(
        &self,
        connection: Option<&Arc<dyn Connection>>,
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        size: u64,
        is_directory: bool,
    ) -> Arc<TransferRecord> {
        TransferRecord::new(
            self.clone(),
            connection,
            TransferDirection::Upload,
            local_path.into(),
            remote_path.into(),
            size,
            is_directory,
        )
    }

    /// Create a record for fetching `remote_path` into `local_path`
    ///
    /// `size` may be 0 for a directory whose contents are not yet known.
    pub fn download_record(
        &self,
        connection: Option<&Arc<dyn Connection>>,
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
        size: u64,
        is_directory: bool,
    ) -> Arc<TransferRecord> {
        TransferRecord::new(
            self.clone(),
            connection,
            TransferDirection::Download,
            local_path.into(),
            remote_path.into(),
            size,
            is_directory,
        )
    }
}

// =============================================================================
// Record State
// =============================================================================

#[derive(Debug)]
struct RecordPaths {
    local: PathBuf,
    remote: String,
}

/// Counters and flags of one node, guarded by the node's state lock
#[derive(Debug)]
struct RecordState {
    size: u64,
    size_with_children: u64,
    bytes_transferred: u64,
    transferred_with_children: u64,
    discovering: bool,
    /// Discovering directories in the subtree, this node included
    discovering_in_subtree: u64,
    /// Own work done (leaves only; directories use `discovering`)
    complete: bool,
    /// Unfinished leaves plus discovering directories in the subtree
    open_work: u64,
    error: Option<TransferError>,
    cancel_requested: bool,
    speed: SpeedEstimator,
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    finished: Option<Instant>,
    began_posted: bool,
    finished_posted: bool,
}

impl RecordState {
    fn new(size: u64, is_directory: bool, config: &RecordConfig) -> Self {
        Self {
            size,
            size_with_children: size,
            bytes_transferred: 0,
            transferred_with_children: 0,
            discovering: false,
            discovering_in_subtree: 0,
            complete: false,
            open_work: u64::from(!is_directory),
            error: None,
            cancel_requested: false,
            speed: SpeedEstimator::from_config(config),
            started: None,
            started_at: None,
            finished: None,
            began_posted: false,
            finished_posted: false,
        }
    }

    /// This node's own contribution to `open_work`
    fn own_open_work(&self, is_directory: bool) -> u64 {
        let open = if is_directory {
            self.discovering
        } else {
            !self.complete && self.error.is_none()
        };
        u64::from(open)
    }

    fn progress(&self) -> Progress {
        if self.discovering_in_subtree > 0 {
            return Progress::Indeterminate;
        }
        if self.size_with_children == 0 {
            return if self.open_work == 0 && self.error.is_none() {
                Progress::Percent(100)
            } else {
                Progress::Indeterminate
            };
        }
        Progress::ratio(self.transferred_with_children, self.size_with_children)
    }

    fn elapsed(&self) -> Duration {
        match self.started {
            Some(start) => self
                .finished
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(start),
            None => Duration::ZERO,
        }
    }

    fn mark_started(&mut self, now: Instant) {
        if self.started.is_none() {
            self.started = Some(now);
            self.started_at = Some(Utc::now());
        }
    }
}

// =============================================================================
// Transfer Record
// =============================================================================

/// One file or directory being uploaded or downloaded
pub struct TransferRecord {
    id: Uuid,
    direction: TransferDirection,
    is_directory: bool,
    paths: RwLock<RecordPaths>,
    parent: RwLock<Weak<TransferRecord>>,
    children: RwLock<Vec<Arc<TransferRecord>>>,
    connection: RwLock<Option<Weak<dyn Connection>>>,
    state: Mutex<RecordState>,
    /// Serializes mutations of the tree while this record is its root
    tree_lock: Mutex<()>,
    properties: PropertyBag,
    context: RecordContext,
}

impl fmt::Debug for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths = self.read_paths();
        f.debug_struct("TransferRecord")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("is_directory", &self.is_directory)
            .field("remote_path", &paths.remote)
            .field("local_path", &paths.local)
            .finish()
    }
}

impl TransferRecord {
    /// Create an upload record posting to the process-wide notification center
    pub fn upload_record(
        connection: Option<&Arc<dyn Connection>>,
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        size: u64,
        is_directory: bool,
    ) -> Arc<Self> {
        RecordContext::default().upload_record(
            connection,
            local_path,
            remote_path,
            size,
            is_directory,
        )
    }

    /// Create a download record posting to the process-wide notification center
    pub fn download_record(
        connection: Option<&Arc<dyn Connection>>,
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
        size: u64,
        is_directory: bool,
    ) -> Arc<Self> {
        RecordContext::default().download_record(
            connection,
            remote_path,
            local_path,
            size,
            is_directory,
        )
    }

    fn new(
        context: RecordContext,
        connection: Option<&Arc<dyn Connection>>,
        direction: TransferDirection,
        local: PathBuf,
        remote: String,
        size: u64,
        is_directory: bool,
    ) -> Arc<Self> {
        trace!(%direction, remote_path = %remote, size, is_directory, "created transfer record");
        Arc::new(Self {
            id: Uuid::new_v4(),
            direction,
            is_directory,
            paths: RwLock::new(RecordPaths { local, remote }),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            connection: RwLock::new(connection.map(Arc::downgrade)),
            state: Mutex::new(RecordState::new(size, is_directory, context.config())),
            tree_lock: Mutex::new(()),
            properties: PropertyBag::new(),
            context,
        })
    }

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn is_upload(&self) -> bool {
        self.direction == TransferDirection::Upload
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn context(&self) -> &RecordContext {
        &self.context
    }

    pub fn local_path(&self) -> PathBuf {
        self.read_paths().local.clone()
    }

    pub fn set_local_path(&self, path: impl Into<PathBuf>) {
        self.paths
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .local = path.into();
    }

    /// The remote path, also the lookup key within a tree
    pub fn remote_path(&self) -> String {
        self.read_paths().remote.clone()
    }

    pub fn set_remote_path(&self, path: impl Into<String>) {
        self.paths
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remote = path.into();
    }

    /// Last path component: the remote name for downloads, the local one for uploads
    pub fn name(&self) -> String {
        let paths = self.read_paths();
        let remote = remote_file_name(&paths.remote);
        let local = local_file_name(&paths.local);
        let name = match self.direction {
            TransferDirection::Download => remote.or(local),
            TransferDirection::Upload => local.or(remote),
        };
        name.unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    /// Point this record at a transport session (held weakly)
    pub fn set_connection(&self, connection: Option<&Arc<dyn Connection>>) {
        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = connection.map(Arc::downgrade);
    }

    /// The record's connection, or the nearest ancestor's if it has none
    ///
    /// Returns None once the owning session has been dropped.
    pub fn connection(self: &Arc<Self>) -> Option<Arc<dyn Connection>> {
        let mut node = Some(Arc::clone(self));
        while let Some(current) = node {
            let own = current
                .connection
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(weak) = own {
                return weak.upgrade();
            }
            node = current.parent();
        }
        None
    }

    /// Ask the transport to abort this one path
    ///
    /// Children are not cancelled; only the transport knows which of them are
    /// in flight. Completion or failure still arrives through the normal feed.
    pub fn cancel(self: &Arc<Self>) {
        self.lock_state().cancel_requested = true;

        let request = {
            let paths = self.read_paths();
            CancelRequest {
                direction: self.direction,
                remote_path: paths.remote.clone(),
                local_path: paths.local.clone(),
            }
        };

        match self.connection() {
            Some(connection) => {
                debug!(remote_path = %request.remote_path, "requesting cancel");
                connection.cancel_transfer(&request);
            }
            None => {
                debug!(
                    remote_path = %request.remote_path,
                    "cancel requested without a live connection"
                );
            }
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.lock_state().cancel_requested
    }

    // -------------------------------------------------------------------------
    // Transport feed
    // -------------------------------------------------------------------------

    /// Record `bytes` more bytes moved for this record
    ///
    /// Updates own bytes, speed, and progress, adds the delta to every
    /// ancestor, and posts a progress notification for this record. Reports on
    /// a record with an error are ignored.
    pub fn report_bytes_transferred(self: &Arc<Self>, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.with_tree_lock(|root, outbox| {
            let now = Instant::now();
            let delta = {
                let mut state = self.lock_state();
                if let Some(error) = &state.error {
                    warn!(
                        remote_path = %self.read_paths().remote,
                        %error,
                        bytes,
                        "ignoring bytes for failed transfer"
                    );
                    return;
                }
                let before = state.own_open_work(self.is_directory);
                state.bytes_transferred = state.bytes_transferred.saturating_add(bytes);
                if !self.is_directory && state.size > 0 && state.bytes_transferred >= state.size {
                    state.complete = true;
                }
                let after = state.own_open_work(self.is_directory);
                trace!(
                    remote_path = %self.read_paths().remote,
                    bytes,
                    total = state.bytes_transferred,
                    "bytes transferred"
                );
                Delta {
                    transferred: i128::from(bytes),
                    open_work: i128::from(after) - i128::from(before),
                    ..Delta::default()
                }
            };

            self.propagate(delta, now, true);
            root.post_began_once(now, outbox);
            self.post(NotificationKind::ProgressChanged, outbox);
            root.post_finished_once(now, outbox);
        });
    }

    /// Record a terminal error for this record
    ///
    /// The record stays in the tree and keeps its byte counts. A directory
    /// that was still discovering stops discovering.
    pub fn set_error(self: &Arc<Self>, error: TransferError) {
        self.with_tree_lock(|root, outbox| {
            let now = Instant::now();
            let delta = {
                let mut state = self.lock_state();
                let before = state.own_open_work(self.is_directory);
                let mut delta = Delta::default();
                if state.discovering {
                    state.discovering = false;
                    delta.discovering = -1;
                }
                debug!(remote_path = %self.read_paths().remote, %error, "transfer failed");
                state.error = Some(error);
                let after = state.own_open_work(self.is_directory);
                delta.open_work = i128::from(after) - i128::from(before);
                delta
            };

            self.propagate(delta, now, false);
            self.post(NotificationKind::ProgressChanged, outbox);
            root.post_finished_once(now, outbox);
        });
    }

    /// Mark whether this directory is still enumerating its contents
    ///
    /// While set on this record or any directory below it, progress is
    /// indeterminate and the tree does not finish. Upload directories use the
    /// same flag to stay open while their files are still being queued.
    pub fn set_discovering_files_to_download(self: &Arc<Self>, discovering: bool) {
        self.with_tree_lock(|root, outbox| {
            let now = Instant::now();
            let delta = {
                let mut state = self.lock_state();
                if state.discovering == discovering {
                    None
                } else {
                    if discovering && !self.is_directory {
                        warn!(
                            remote_path = %self.read_paths().remote,
                            "discovery flag set on a file record"
                        );
                    }
                    let before = state.own_open_work(self.is_directory);
                    state.discovering = discovering;
                    let after = state.own_open_work(self.is_directory);
                    Some(Delta {
                        discovering: if discovering { 1 } else { -1 },
                        open_work: i128::from(after) - i128::from(before),
                        ..Delta::default()
                    })
                }
            };
            let Some(delta) = delta else {
                // An idle directory finishing without ever discovering
                root.post_finished_once(now, outbox);
                return;
            };
            debug!(remote_path = %self.read_paths().remote, discovering, "discovery state changed");

            self.propagate(delta, now, false);
            self.post(NotificationKind::ProgressChanged, outbox);
            root.post_finished_once(now, outbox);
        });
    }

    /// Enumeration of this directory finished
    pub fn report_discovery_complete(self: &Arc<Self>) {
        self.set_discovering_files_to_download(false);
    }

    pub fn is_discovering_files_to_download(&self) -> bool {
        self.lock_state().discovering
    }

    /// Mark this record's own work as done
    ///
    /// Files complete on their own once their bytes reach a non-zero size;
    /// this covers zero-byte files. For a directory it ends discovery, and a
    /// root with nothing left open posts `Finished`.
    pub fn finish(self: &Arc<Self>) {
        if self.is_directory {
            self.set_discovering_files_to_download(false);
            return;
        }
        self.with_tree_lock(|root, outbox| {
            let now = Instant::now();
            let delta = {
                let mut state = self.lock_state();
                let before = state.own_open_work(false);
                state.complete = true;
                let after = state.own_open_work(false);
                Delta {
                    open_work: i128::from(after) - i128::from(before),
                    ..Delta::default()
                }
            };

            self.propagate(delta, now, false);
            self.post(NotificationKind::ProgressChanged, outbox);
            root.post_finished_once(now, outbox);
        });
    }

    /// Set the start time (if unset) here and up the tree, posting began once per root
    pub fn mark_started(self: &Arc<Self>) {
        self.with_tree_lock(|root, outbox| {
            let now = Instant::now();
            let mut node = Some(Arc::clone(self));
            while let Some(current) = node {
                current.lock_state().mark_started(now);
                node = current.parent();
            }
            root.post_began_once(now, outbox);
        });
    }

    /// Change this record's own size, keeping ancestor totals exact
    pub fn set_size(self: &Arc<Self>, size: u64) {
        self.with_tree_lock(|root, outbox| {
            let now = Instant::now();
            let delta = {
                let mut state = self.lock_state();
                if state.size == size {
                    return;
                }
                let before = state.own_open_work(self.is_directory);
                let change = i128::from(size) - i128::from(state.size);
                state.size = size;
                if !self.is_directory && size > 0 && state.bytes_transferred >= size {
                    state.complete = true;
                }
                let after = state.own_open_work(self.is_directory);
                Delta {
                    size: change,
                    open_work: i128::from(after) - i128::from(before),
                    ..Delta::default()
                }
            };

            self.propagate(delta, now, false);
            self.post(NotificationKind::ProgressChanged, outbox);
            root.post_finished_once(now, outbox);
        });
    }

    /// Publish a fresh speed estimate without new bytes
    ///
    /// Re-samples this record and every ancestor, so a stalled transfer's
    /// meters decay toward zero all the way up the tree.
    pub fn force_animation_update(self: &Arc<Self>) {
        self.with_tree_lock(|_, outbox| {
            let now = Instant::now();
            let mut node = Some(Arc::clone(self));
            while let Some(current) = node {
                {
                    let mut state = current.lock_state();
                    let total = state.transferred_with_children;
                    state.speed.sample(total, now);
                }
                current.post(NotificationKind::ProgressChanged, outbox);
                node = current.parent();
            }
        });
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Own size in bytes
    pub fn size(&self) -> u64 {
        self.lock_state().size
    }

    /// Own size plus the sizes of every descendant
    pub fn size_with_children(&self) -> u64 {
        self.lock_state().size_with_children
    }

    /// Own bytes moved
    pub fn bytes_transferred(&self) -> u64 {
        self.lock_state().bytes_transferred
    }

    /// Bytes moved in the whole subtree
    pub fn transferred(&self) -> u64 {
        self.lock_state().transferred_with_children
    }

    pub fn progress(&self) -> Progress {
        self.lock_state().progress()
    }

    /// Smoothed bytes per second over the subtree
    pub fn speed(&self) -> f64 {
        self.lock_state().speed.bytes_per_second()
    }

    /// Time since the first byte moved, frozen once the subtree finished
    pub fn elapsed(&self) -> Duration {
        self.lock_state().elapsed()
    }

    /// Wall-clock time the record started moving bytes
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock_state().started_at
    }

    pub fn error(&self) -> Option<TransferError> {
        self.lock_state().error.clone()
    }

    /// Whether this record itself has an error (descendants are not consulted)
    pub fn has_error(&self) -> bool {
        self.lock_state().error.is_some()
    }

    /// True when nothing in the subtree is pending or discovering
    pub fn is_finished(&self) -> bool {
        self.lock_state().open_work == 0
    }

    /// Count file records with and without an error in this subtree
    ///
    /// Directories are not counted themselves, only the files below them.
    pub fn problems_transferring(self: &Arc<Self>) -> ProblemCounts {
        let mut counts = ProblemCounts::default();
        let mut stack = vec![Arc::clone(self)];
        while let Some(node) = stack.pop() {
            if !node.is_directory {
                if node.has_error() {
                    counts.errors += 1;
                } else {
                    counts.successes += 1;
                }
            }
            stack.extend(node.children());
        }
        counts
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.set(key, value);
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.get(key)
    }

    pub fn remove_property(&self, key: &str) {
        self.properties.remove(key);
    }

    /// Alias of `set_property`; both share one key space
    pub fn set_object(&self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.set_property(key, value);
    }

    /// Alias of `property`
    pub fn object(&self, key: &str) -> Option<PropertyValue> {
        self.property(key)
    }

    /// Alias of `remove_property`
    pub fn remove_object(&self, key: &str) {
        self.remove_property(key);
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_paths(&self) -> std::sync::RwLockReadGuard<'_, RecordPaths> {
        self.paths.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a notification for this record with its committed state
    fn post(self: &Arc<Self>, kind: NotificationKind, outbox: &mut Outbox) {
        let (transferred, progress) = {
            let state = self.lock_state();
            (state.transferred_with_children, state.progress())
        };
        outbox.post(&self.context.notifications, kind, self, transferred, progress);
    }

    /// Post `Began` the first time bytes move (or start is marked) in this tree
    fn post_began_once(self: &Arc<Self>, now: Instant, outbox: &mut Outbox) {
        {
            let mut state = self.lock_state();
            if state.began_posted {
                return;
            }
            state.began_posted = true;
            state.mark_started(now);
        }
        debug!(remote_path = %self.read_paths().remote, "transfer began");
        self.post(NotificationKind::Began, outbox);
    }

    /// Post `Finished` once the subtree has no open work left
    ///
    /// Called after every mutation. Re-armed when the tree gains open work
    /// again, so a root posts once per transition to idle.
    fn post_finished_once(self: &Arc<Self>, now: Instant, outbox: &mut Outbox) {
        {
            let mut state = self.lock_state();
            if state.finished_posted || state.open_work > 0 {
                return;
            }
            state.finished_posted = true;
            state.finished.get_or_insert(now);
        }
        debug!(remote_path = %self.read_paths().remote, "transfer finished");
        self.post(NotificationKind::Finished, outbox);
    }
}

fn remote_file_name(path: &str) -> Option<String> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn local_file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

// =============================================================================
// Tests
// =============================================================================
