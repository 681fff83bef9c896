//! Dynamic values passed through host entry points.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::deferred::Deferred;
use super::env::HostEnv;

/// Identity of a host object (request instance, response, DOM node).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectId(pub u64);

/// Closed set of value shapes host primitives exchange.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
    Json(serde_json::Value),
    Func(Callback),
    Deferred(Deferred),
    Obj(ObjectId),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&Callback> {
        match self {
            Value::Func(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<ObjectId> {
        match self {
            Value::Obj(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }
}

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// A host-side callable (timer callback, event listener, continuation).
///
/// Identity matters: listener deduplication and removal compare callback ids,
/// so a wrapped listener must be cached and reused rather than re-created.
#[derive(Clone)]
pub struct Callback {
    id: u64,
    f: Arc<dyn Fn(&HostEnv, &[Value]) + Send + Sync>,
}

impl Callback {
    pub fn new(f: impl Fn(&HostEnv, &[Value]) + Send + Sync + 'static) -> Self {
        Self {
            id: NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed),
            f: Arc::new(f),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn invoke(&self, env: &HostEnv, args: &[Value]) {
        (self.f)(env, args);
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback(#{})", self.id)
    }
}
