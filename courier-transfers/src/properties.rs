//! Caller-attached metadata for records
//!
//! UI and automation code hang their own state off a record (row identifiers,
//! icons, retry counters) without the record having to know about it. Values
//! are a tagged union so common cases get typed access; anything else can be
//! stored as an opaque shared value and downcast by its owner.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A single metadata value
#[derive(Clone)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    /// Caller-defined type, shared rather than cloned
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl PropertyValue {
    /// Wrap any shareable value as an opaque property
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        PropertyValue::Opaque(Arc::new(value))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value; unsigned values that fit are converted
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Unsigned value; non-negative signed values are converted
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::UInt(u) => Some(*u),
            PropertyValue::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            PropertyValue::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow an opaque value as its concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            PropertyValue::Opaque(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Self::UInt(u) => f.debug_tuple("UInt").field(u).finish(),
            Self::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::UInt(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        PropertyValue::Bytes(value)
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        PropertyValue::Json(value)
    }
}

/// String-keyed metadata map, safe to share between threads
///
/// Each call takes the bag's own lock only; it never touches the tree lock.
#[derive(Debug, Default)]
pub struct PropertyBag {
    values: Mutex<HashMap<String, PropertyValue>>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the one it replaced
    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.lock().insert(key.into(), value.into())
    }

    /// Clone out the value for `key`
    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<PropertyValue> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All keys currently set, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PropertyValue>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Tests
// =============================================================================
