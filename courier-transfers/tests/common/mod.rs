//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use courier_transfers::{
    NotificationCenter, NotificationKind, RecordConfig, RecordContext, TransferNotification,
};
use tracing_subscriber::EnvFilter;

/// Route record logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A context with its own notification center and no speed debounce
pub fn test_context() -> RecordContext {
    init_tracing();
    let config = RecordConfig {
        min_sample_interval_ms: 0,
        speed_smoothing: 1.0,
    };
    RecordContext::new(config, Arc::new(NotificationCenter::new()))
}

/// Collects every notification of one kind delivered to a center
pub fn record_notifications(
    center: &NotificationCenter,
    kind: NotificationKind,
) -> Arc<Mutex<Vec<TransferNotification>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    center.subscribe(kind, move |n| {
        sink.lock().expect("sink poisoned").push(n.clone());
    });
    seen
}
