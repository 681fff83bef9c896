//! Deferred values: the host's promise-like settle-once cell.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::env::HostEnv;
use super::value::{Callback, Value};

static NEXT_DEFERRED_ID: AtomicU64 = AtomicU64::new(1);

/// A value that settles exactly once, fanning out to queued continuations as
/// microtasks. Continuations receive `[value, Bool(ok)]`.
#[derive(Clone)]
pub struct Deferred {
    id: u64,
    state: Arc<Mutex<DeferredState>>,
}

enum DeferredState {
    Pending { callbacks: Vec<Callback> },
    Settled { value: Value, ok: bool },
}

impl Deferred {
    pub fn new() -> Self {
        Self {
            id: NEXT_DEFERRED_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(DeferredState::Pending {
                callbacks: Vec::new(),
            })),
        }
    }

    /// A deferred born settled, as `Promise.resolve`-style statics produce.
    pub fn settled(value: Value, ok: bool) -> Self {
        Self {
            id: NEXT_DEFERRED_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(DeferredState::Settled { value, ok })),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_settled(&self) -> bool {
        matches!(&*self.state.lock(), DeferredState::Settled { .. })
    }

    /// The settled value and success flag, if settled.
    pub fn value(&self) -> Option<(Value, bool)> {
        match &*self.state.lock() {
            DeferredState::Settled { value, ok } => Some((value.clone(), *ok)),
            DeferredState::Pending { .. } => None,
        }
    }

    /// Settles the deferred. A second settle is ignored.
    pub fn settle(&self, env: &HostEnv, value: Value, ok: bool) {
        let callbacks = {
            let mut state = self.state.lock();
            match &mut *state {
                DeferredState::Settled { .. } => return,
                DeferredState::Pending { callbacks } => {
                    let drained = std::mem::take(callbacks);
                    *state = DeferredState::Settled {
                        value: value.clone(),
                        ok,
                    };
                    drained
                }
            }
        };
        for cb in callbacks {
            env.enqueue_microtask(cb, vec![value.clone(), Value::Bool(ok)]);
        }
    }

    /// Queues `cb` to run after settlement; runs as a microtask immediately
    /// if the deferred is already settled.
    pub fn on_settle(&self, env: &HostEnv, cb: Callback) {
        let settled = {
            let mut state = self.state.lock();
            match &mut *state {
                DeferredState::Pending { callbacks } => {
                    callbacks.push(cb.clone());
                    None
                }
                DeferredState::Settled { value, ok } => Some((value.clone(), *ok)),
            }
        };
        if let Some((value, ok)) = settled {
            env.enqueue_microtask(cb, vec![value, Value::Bool(ok)]);
        }
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deferred(#{})", self.id)
    }
}
