//! Per-invocation context and the active-context propagation slot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::aggregate::records::{RequestMetrics, RequestParams, TracePayload};
use crate::host::Callback;

/// Which wrapping path constructed a context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdapterKind {
    #[default]
    Generic,
    LegacyRequest,
    ModernRequest,
    Timer,
    Deferred,
    History,
    Mutation,
    ScriptInsert,
    EventRegistration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimerMethod {
    Once,
    Repeating,
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimerInfo {
    /// Requested delay, coerced to a non-negative number.
    pub delay_ms: f64,
    pub method: TimerMethod,
}

/// Mutable state shared by every event describing one logical invocation.
#[derive(Clone, Debug, Default)]
pub struct ContextData {
    pub kind: AdapterKind,
    pub params: Option<RequestParams>,
    pub metrics: RequestMetrics,
    pub start_ms: Option<f64>,
    /// Terminal event already emitted; guards the exactly-once guarantee.
    pub done: bool,
    pub expected_callbacks: u32,
    pub fired_callbacks: u32,
    /// Wrapped listeners keyed by (callback id, capture), so a duplicate
    /// registration reuses the same wrapper and the native side can
    /// deduplicate by identity.
    pub listeners: HashMap<(u64, bool), Callback>,
    pub timer: Option<TimerInfo>,
    /// Host-side key (task id) this context is registered under on its
    /// channel, so one-shot callbacks can drop the association after firing.
    pub registration_key: Option<u64>,
    pub trace: Option<TracePayload>,
    pub entity: Option<String>,
    pub interaction: Option<u64>,
    /// Context of the invocation that scheduled this one, when the
    /// registration happened synchronously inside a wrapped callback.
    pub parent: Option<InvocationContext>,
    pub attrs: BTreeMap<String, String>,
}

/// Handle to the shared per-invocation bag. Cheap to clone; all events about
/// one invocation observe the same data.
#[derive(Clone, Default)]
pub struct InvocationContext {
    inner: Arc<Mutex<ContextData>>,
}

impl InvocationContext {
    pub fn with<R>(&self, f: impl FnOnce(&mut ContextData) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Flips the terminal flag, returning true only for the first caller.
    pub fn mark_done(&self) -> bool {
        let mut data = self.inner.lock();
        if data.done {
            false
        } else {
            data.done = true;
            true
        }
    }

    pub fn same_context(&self, other: &InvocationContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.lock();
        write!(f, "InvocationContext({:?}, done={})", data.kind, data.done)
    }
}

thread_local! {
    // Execution is single-threaded cooperative; a stack rather than a cell
    // because wrapped callbacks nest.
    static ACTIVE: std::cell::RefCell<Vec<InvocationContext>> =
        const { std::cell::RefCell::new(Vec::new()) };
}

/// The context of the wrapped callback currently executing, if any. New
/// asynchronous registrations read this as their parent.
pub fn current_context() -> Option<InvocationContext> {
    ACTIVE.with(|stack| stack.borrow().last().cloned())
}

/// RAII guard marking `ctx` as the active context for its lifetime.
pub struct ContextScope;

impl ContextScope {
    pub fn enter(ctx: &InvocationContext) -> ContextScope {
        ACTIVE.with(|stack| stack.borrow_mut().push(ctx.clone()));
        ContextScope
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
