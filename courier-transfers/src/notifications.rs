//! Transfer notifications
//!
//! Records post began/progress/finished notifications to a
//! `NotificationCenter`. Observers either register a handler for one kind or
//! take an unbounded channel receiving every notification, for consumption
//! from an async task.
//!
//! Records post while holding their tree lock, so the queue order is the
//! commit order. Delivery happens after the lock is released, on whichever
//! thread is currently draining the queue; a handler that mutates records
//! only enqueues more notifications and never deadlocks.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tokio::sync::mpsc;

use crate::record::TransferRecord;
use crate::types::Progress;

/// Process-wide center used by records created with the default context
static GLOBAL_CENTER: Lazy<Arc<NotificationCenter>> =
    Lazy::new(|| Arc::new(NotificationCenter::new()));

// =============================================================================
// Notification Types
// =============================================================================

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// A root record started moving bytes
    Began,
    /// A record's byte count, speed, or progress changed
    ProgressChanged,
    /// A root record has no outstanding work left
    Finished,
}

/// A notification with the state committed when it was posted
///
/// `transferred` and `progress` are captured under the tree lock, so for one
/// record the sequence of `ProgressChanged` values never goes backwards even
/// if the record has moved on by the time a handler runs.
#[derive(Clone)]
pub struct TransferNotification {
    pub kind: NotificationKind,
    pub record: Arc<TransferRecord>,
    /// Bytes moved in the record's subtree
    pub transferred: u64,
    pub progress: Progress,
}

impl fmt::Debug for TransferNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferNotification")
            .field("kind", &self.kind)
            .field("record", &self.record.remote_path())
            .field("transferred", &self.transferred)
            .field("progress", &self.progress)
            .finish()
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&TransferNotification) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: NotificationKind,
    handler: Handler,
}

// =============================================================================
// Notification Center
// =============================================================================

/// Publish/subscribe hub for transfer notifications
pub struct NotificationCenter {
    subscriptions: RwLock<Vec<Subscription>>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<TransferNotification>>>,
    queue: Mutex<VecDeque<TransferNotification>>,
    draining: AtomicBool,
    next_id: AtomicU64,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("subscriptions", &self.read_subscriptions().len())
            .field("listeners", &self.lock_listeners().len())
            .finish()
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide center
    pub fn global() -> Arc<NotificationCenter> {
        Arc::clone(&GLOBAL_CENTER)
    }

    /// Call `handler` for every notification of `kind`
    pub fn subscribe<F>(&self, kind: NotificationKind, handler: F) -> SubscriptionId
    where
        F: Fn(&TransferNotification) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                kind,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a handler; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Receive every notification on a channel
    ///
    /// Dropping the receiver unsubscribes it on the next delivery.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<TransferNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_listeners().push(tx);
        rx
    }

    /// Enqueue a notification; callers hold the posting record's tree lock
    pub(crate) fn post(&self, notification: TransferNotification) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(notification);
    }

    /// Deliver queued notifications unless another thread is already doing so
    ///
    /// Must be called without any tree lock held.
    pub fn flush(&self) {
        loop {
            if self.draining.swap(true, Ordering::Acquire) {
                return;
            }
            {
                let _draining = DrainGuard(&self.draining);
                while let Some(notification) = self.pop() {
                    self.deliver(&notification);
                }
            }
            // A post may have landed between the last pop and the release
            if self.queue.lock().unwrap_or_else(PoisonError::into_inner).is_empty() {
                return;
            }
        }
    }

    fn pop(&self) -> Option<TransferNotification> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn deliver(&self, notification: &TransferNotification) {
        // Clone handlers out so a handler may subscribe or unsubscribe
        let handlers: Vec<Handler> = self
            .read_subscriptions()
            .iter()
            .filter(|s| s.kind == notification.kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in handlers {
            handler(notification);
        }

        self.lock_listeners()
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    fn read_subscriptions(&self) -> std::sync::RwLockReadGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<TransferNotification>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the draining flag even if a handler panics
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordContext;
    use crate::RecordConfig;

    fn context(center: &Arc<NotificationCenter>) -> RecordContext {
        RecordContext::new(RecordConfig::default(), Arc::clone(center))
    }

    #[test]
    fn test_subscribe_by_kind() {
        let center = Arc::new(NotificationCenter::new());
        let progress = Arc::new(AtomicU64::new(0));
        let began = Arc::new(AtomicU64::new(0));

        let p = Arc::clone(&progress);
        center.subscribe(NotificationKind::ProgressChanged, move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&began);
        center.subscribe(NotificationKind::Began, move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        let record = context(&center).upload_record(None, "/tmp/a.bin", "/up/a.bin", 100, false);
        record.report_bytes_transferred(10);
        record.report_bytes_transferred(10);

        assert_eq!(progress.load(Ordering::SeqCst), 2);
        assert_eq!(began.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let center = Arc::new(NotificationCenter::new());
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = center.subscribe(NotificationKind::ProgressChanged, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let record = context(&center).upload_record(None, "/tmp/a.bin", "/up/a.bin", 100, false);
        record.report_bytes_transferred(1);
        assert!(center.unsubscribe(id));
        assert!(!center.unsubscribe(id));
        record.report_bytes_transferred(1);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_mutate_records() {
        let center = Arc::new(NotificationCenter::new());
        let record = context(&center).upload_record(None, "/tmp/a.bin", "/up/a.bin", 100, false);

        // Re-entrant update from inside a handler is queued, not deadlocked
        let inner = Arc::clone(&record);
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        center.subscribe(NotificationKind::Began, move |_| {
            if !f.swap(true, Ordering::SeqCst) {
                inner.report_bytes_transferred(5);
            }
        });

        record.report_bytes_transferred(5);
        assert_eq!(record.bytes_transferred(), 10);
    }

    #[tokio::test]
    async fn test_listen_receives_in_order() {
        let center = Arc::new(NotificationCenter::new());
        let mut rx = center.listen();

        let record = context(&center).upload_record(None, "/tmp/a.bin", "/up/a.bin", 30, false);
        for _ in 0..3 {
            record.report_bytes_transferred(10);
        }

        let mut kinds = Vec::new();
        let mut transferred = Vec::new();
        while let Ok(n) = rx.try_recv() {
            kinds.push(n.kind);
            if n.kind == NotificationKind::ProgressChanged {
                transferred.push(n.transferred);
            }
        }

        assert_eq!(kinds.first(), Some(&NotificationKind::Began));
        assert_eq!(kinds.last(), Some(&NotificationKind::Finished));
        assert_eq!(transferred, vec![10, 20, 30]);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let center = NotificationCenter::new();
        let rx = center.listen();
        drop(rx);
        assert_eq!(center.lock_listeners().len(), 1);

        let other = Arc::new(NotificationCenter::new());
        let record = context(&other).upload_record(None, "/tmp/a.bin", "/up/a.bin", 1, false);
        center.deliver(&TransferNotification {
            kind: NotificationKind::ProgressChanged,
            record,
            transferred: 0,
            progress: Progress::Percent(0),
        });
        assert!(center.lock_listeners().is_empty());
    }
}
