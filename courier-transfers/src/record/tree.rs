//! Tree structure: locking, attachment, lookup, and delta propagation

use std::sync::{Arc, PoisonError, TryLockError};
use std::time::Instant;

use tracing::{debug, warn};

use super::{RecordState, TransferRecord};
use crate::error::TreeError;
use crate::notifications::{NotificationCenter, NotificationKind, TransferNotification};
use crate::types::Progress;

/// Signed change applied to a node and each of its ancestors
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Delta {
    pub size: i128,
    pub transferred: i128,
    pub discovering: i128,
    pub open_work: i128,
}

impl Delta {
    fn is_empty(&self) -> bool {
        self.size == 0 && self.transferred == 0 && self.discovering == 0 && self.open_work == 0
    }
}

fn shift(value: &mut u64, delta: i128) {
    *value = (i128::from(*value) + delta).clamp(0, i128::from(u64::MAX)) as u64;
}

impl RecordState {
    fn apply(&mut self, delta: Delta, now: Instant, moved_bytes: bool) {
        let was_open = self.open_work > 0;
        shift(&mut self.size_with_children, delta.size);
        shift(&mut self.transferred_with_children, delta.transferred);
        shift(&mut self.discovering_in_subtree, delta.discovering);
        shift(&mut self.open_work, delta.open_work);

        if moved_bytes {
            self.mark_started(now);
            self.speed.sample(self.transferred_with_children, now);
        }

        match (was_open, self.open_work > 0) {
            (true, false) if self.started.is_some() => self.finished = Some(now),
            (false, true) => {
                self.finished = None;
                self.finished_posted = false;
            }
            _ => {}
        }
    }
}

/// Notifications posted under a tree lock, flushed once it is released
#[derive(Default)]
pub(super) struct Outbox {
    centers: Vec<Arc<NotificationCenter>>,
}

impl Outbox {
    pub fn post(
        &mut self,
        center: &Arc<NotificationCenter>,
        kind: NotificationKind,
        record: &Arc<TransferRecord>,
        transferred: u64,
        progress: Progress,
    ) {
        center.post(TransferNotification {
            kind,
            record: Arc::clone(record),
            transferred,
            progress,
        });
        if !self.centers.iter().any(|c| Arc::ptr_eq(c, center)) {
            self.centers.push(Arc::clone(center));
        }
    }

    fn flush(self) {
        for center in self.centers {
            center.flush();
        }
    }
}

impl TransferRecord {
    /// Run `f` holding the tree lock of this record's current root
    ///
    /// The root is re-checked after locking: if it was attached under another
    /// record in the meantime, the lock is released and the walk retried.
    pub(super) fn with_tree_lock<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&Arc<TransferRecord>, &mut Outbox) -> R,
    ) -> R {
        let mut outbox = Outbox::default();
        let result = loop {
            let root = self.root();
            let guard = root.tree_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if root.parent().is_some() {
                drop(guard);
                continue;
            }
            let result = f(&root, &mut outbox);
            drop(guard);
            break result;
        };
        outbox.flush();
        result
    }

    /// Apply `delta` to this record and every ancestor; tree lock must be held
    pub(super) fn propagate(self: &Arc<Self>, delta: Delta, now: Instant, moved_bytes: bool) {
        if delta.is_empty() && !moved_bytes {
            return;
        }
        let mut node = Some(Arc::clone(self));
        while let Some(current) = node {
            current.lock_state().apply(delta, now, moved_bytes);
            node = current.parent();
        }
    }

    /// The top of this record's tree
    pub fn root(self: &Arc<Self>) -> Arc<TransferRecord> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// The owning record, if attached and still alive
    pub fn parent(&self) -> Option<Arc<TransferRecord>> {
        self.parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Children in attachment order
    pub fn children(&self) -> Vec<Arc<TransferRecord>> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Append `child` and add its subtree totals to every ancestor
    ///
    /// `child` must be the root of its own tree. Records are never
    /// re-parented, so attaching an already attached record, the record
    /// itself, or one of its ancestors is rejected.
    pub fn add_child(self: &Arc<Self>, child: Arc<TransferRecord>) -> Result<(), TreeError> {
        if Arc::ptr_eq(self, &child) {
            return Err(TreeError::SelfAttachment);
        }
        {
            let paths = child.read_paths();
            if paths.remote.is_empty() && paths.local.as_os_str().is_empty() {
                warn!("refusing to attach a record without paths");
                return Err(TreeError::MissingPath);
            }
        }

        loop {
            let attempt = self.with_tree_lock(|root, _| {
                // Our own root is already locked by this thread
                if Arc::ptr_eq(root, &child) {
                    return Some(Err(TreeError::Cycle {
                        remote_path: child.remote_path(),
                    }));
                }

                // Try-lock so two attaches in opposite directions cannot deadlock
                let _child_guard = match child.tree_lock.try_lock() {
                    Ok(guard) => guard,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => return None,
                };

                if child.parent().is_some() {
                    return Some(Err(TreeError::AlreadyAttached {
                        remote_path: child.remote_path(),
                    }));
                }

                let delta = {
                    let state = child.lock_state();
                    Delta {
                        size: i128::from(state.size_with_children),
                        transferred: i128::from(state.transferred_with_children),
                        discovering: i128::from(state.discovering_in_subtree),
                        open_work: i128::from(state.open_work),
                    }
                };

                *child
                    .parent
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(self);
                self.children
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Arc::clone(&child));
                self.propagate(delta, Instant::now(), false);

                debug!(
                    parent = %self.read_paths().remote,
                    child = %child.read_paths().remote,
                    size = delta.size as u64,
                    "attached child record"
                );
                Some(Ok(()))
            });

            match attempt {
                Some(result) => return result,
                None => std::thread::yield_now(),
            }
        }
    }

    /// Find the record in this subtree whose remote path is `remote_path`
    ///
    /// The receiver itself is included. A trailing `/` is ignored on both
    /// sides. Paths not (yet) in the tree give None.
    pub fn child_for_remote_path(
        self: &Arc<Self>,
        remote_path: &str,
    ) -> Option<Arc<TransferRecord>> {
        let target = normalize_remote(remote_path);
        let mut stack = vec![Arc::clone(self)];
        while let Some(node) = stack.pop() {
            if normalize_remote(&node.read_paths().remote) == target {
                return Some(node);
            }
            // Reverse so siblings are visited in attachment order
            stack.extend(node.children().into_iter().rev());
        }
        None
    }
}

fn normalize_remote(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && !path.is_empty() {
        "/"
    } else {
        trimmed
    }
}

// =============================================================================
// Tests
// =============================================================================
