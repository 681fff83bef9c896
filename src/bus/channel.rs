//! Channel tree: registration, dispatch, buffering and drain.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use scopeguard::guard;
use tracing::{trace, warn};

use crate::error::AgentError;

use super::context::InvocationContext;
use super::payload::Payload;

type HandlerFn =
    dyn FnMut(&str, &mut Payload, Option<&InvocationContext>) -> Result<(), AgentError> + Send;

type Handler = Arc<Mutex<Box<HandlerFn>>>;

struct BufferedEvent {
    channel: Weak<ChannelInner>,
    event: String,
    payload: Payload,
    ctx: Option<InvocationContext>,
}

/// State shared by every channel of one bus.
struct BusShared {
    /// Buses marked "always" skip the re-entrancy suppression.
    always: bool,
    emitting: AtomicBool,
    /// event type -> bucket name, while the bucket is still capturing.
    buffered: Mutex<HashMap<String, String>>,
    backlog: Mutex<HashMap<String, Vec<BufferedEvent>>>,
    /// Buckets that have drained; buffering for them is permanently over.
    drained: Mutex<HashSet<String>>,
    root: OnceLock<Weak<ChannelInner>>,
}

struct ChannelInner {
    name: String,
    shared: Arc<BusShared>,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
    children: Mutex<HashMap<String, Channel>>,
    contexts: Mutex<HashMap<u64, InvocationContext>>,
}

/// A named publish/subscribe scope. Channels form a tree rooted at one per
/// agent instance; `get` memoizes children by name.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Creates the root channel of a new bus. `always` disables the
    /// re-entrancy suppression for every channel of this bus.
    pub fn root(always: bool) -> Channel {
        let shared = Arc::new(BusShared {
            always,
            emitting: AtomicBool::new(false),
            buffered: Mutex::new(HashMap::new()),
            backlog: Mutex::new(HashMap::new()),
            drained: Mutex::new(HashSet::new()),
            root: OnceLock::new(),
        });
        let channel = Channel {
            inner: Arc::new(ChannelInner {
                name: String::new(),
                shared: shared.clone(),
                handlers: Mutex::new(HashMap::new()),
                children: Mutex::new(HashMap::new()),
                contexts: Mutex::new(HashMap::new()),
            }),
        };
        let _ = shared.root.set(Arc::downgrade(&channel.inner));
        channel
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns (creating if absent) the named child channel. Two calls with
    /// the same name on the same parent return the same channel.
    pub fn get(&self, name: &str) -> Channel {
        self.inner
            .children
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Channel {
                inner: Arc::new(ChannelInner {
                    name: name.to_string(),
                    shared: self.inner.shared.clone(),
                    handlers: Mutex::new(HashMap::new()),
                    children: Mutex::new(HashMap::new()),
                    contexts: Mutex::new(HashMap::new()),
                }),
            })
            .clone()
    }

    /// The root channel of this bus.
    pub fn root_channel(&self) -> Channel {
        self.inner
            .shared
            .root
            .get()
            .and_then(Weak::upgrade)
            .map(|inner| Channel { inner })
            .unwrap_or_else(|| self.clone())
    }

    pub fn on(
        &self,
        event: &str,
        handler: impl FnMut(&str, &mut Payload, Option<&InvocationContext>) -> Result<(), AgentError>
            + Send
            + 'static,
    ) {
        self.inner
            .handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(Mutex::new(Box::new(handler))));
    }

    /// Dispatches `event`, honoring buffering and re-entrancy suppression.
    pub fn emit(&self, event: &str, payload: &mut Payload, ctx: Option<&InvocationContext>) {
        self.emit_with(event, payload, ctx, false);
    }

    /// Dispatches even while another emit is in flight and past buffering;
    /// the path outbound-contract events take from inside handlers.
    pub fn emit_force(&self, event: &str, payload: &mut Payload, ctx: Option<&InvocationContext>) {
        self.emit_with(event, payload, ctx, true);
    }

    fn emit_with(
        &self,
        event: &str,
        payload: &mut Payload,
        ctx: Option<&InvocationContext>,
        force: bool,
    ) {
        let shared = &self.inner.shared;
        if !force {
            let bucket = shared.buffered.lock().get(event).cloned();
            if let Some(bucket) = bucket {
                if !shared.drained.lock().contains(&bucket) {
                    trace!(event, bucket, channel = %self.inner.name, "buffering event");
                    shared
                        .backlog
                        .lock()
                        .entry(bucket)
                        .or_default()
                        .push(BufferedEvent {
                            channel: Arc::downgrade(&self.inner),
                            event: event.to_string(),
                            payload: payload.clone(),
                            ctx: ctx.cloned(),
                        });
                    return;
                }
            }
            if shared.emitting.load(Ordering::Relaxed) && !shared.always {
                trace!(event, "suppressing re-entrant emit");
                return;
            }
        }

        let was = shared.emitting.swap(true, Ordering::Relaxed);
        let shared_reset = shared.clone();
        let _reset = guard(was, move |w| {
            shared_reset.emitting.store(w, Ordering::Relaxed);
        });
        self.dispatch(event, payload, ctx);
    }

    fn dispatch(&self, event: &str, payload: &mut Payload, ctx: Option<&InvocationContext>) {
        let handlers: Vec<Handler> = {
            let map = self.inner.handlers.lock();
            match map.get(event) {
                Some(list) => list.clone(),
                None => return,
            }
        };
        trace!(event, channel = %self.inner.name, n = handlers.len(), "dispatching");
        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut h = handler.lock();
                (*h)(event, payload, ctx)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.report_internal(event, err.to_string()),
                Err(panic) => self.report_internal(event, panic_message(&panic)),
            }
        }
    }

    // A failing subscriber becomes an internal-error event on the root bus;
    // siblings and the wrapped call proceed untouched.
    fn report_internal(&self, event: &str, message: String) {
        warn!(event, %message, "event handler failed");
        if event == "internal-error" {
            return;
        }
        let mut payload = Payload::InternalError { message };
        self.root_channel()
            .emit_force("internal-error", &mut payload, None);
    }

    /// Marks `events` for capture under `bucket` until [`Channel::drain`].
    /// No-op for a bucket that has already drained.
    pub fn buffer(&self, events: &[&str], bucket: &str) {
        let shared = &self.inner.shared;
        if shared.drained.lock().contains(bucket) {
            return;
        }
        let mut buffered = shared.buffered.lock();
        for event in events {
            buffered.insert((*event).to_string(), bucket.to_string());
        }
    }

    /// Replays the bucket's backlog in emission order, then switches those
    /// event types to live dispatch for good. Drains at most once.
    pub fn drain(&self, bucket: &str) {
        let shared = &self.inner.shared;
        if !shared.drained.lock().insert(bucket.to_string()) {
            return;
        }
        shared
            .buffered
            .lock()
            .retain(|_, b| b.as_str() != bucket);
        let backlog = shared.backlog.lock().remove(bucket).unwrap_or_default();
        trace!(bucket, n = backlog.len(), "draining bucket");
        for entry in backlog {
            let Some(inner) = entry.channel.upgrade() else {
                continue;
            };
            let channel = Channel { inner };
            let mut payload = entry.payload;
            channel.emit_with(&entry.event, &mut payload, entry.ctx.as_ref(), true);
        }
    }

    /// The context associated with `key` on this channel, created empty on
    /// first access.
    pub fn context(&self, key: u64) -> InvocationContext {
        self.inner
            .contexts
            .lock()
            .entry(key)
            .or_default()
            .clone()
    }

    /// Associates an existing context with `key` (e.g. once a constructor
    /// has produced the object the context describes).
    pub fn adopt_context(&self, key: u64, ctx: &InvocationContext) {
        self.inner.contexts.lock().insert(key, ctx.clone());
    }

    /// Drops the association so the context cannot outlive its invocation.
    pub fn take_context(&self, key: u64) -> Option<InvocationContext> {
        self.inner.contexts.lock().remove(&key)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
