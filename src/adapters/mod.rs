//! One adapter per intercepted native capability.
//!
//! Every adapter is reference-counted through the wrap registry, idempotent,
//! and a no-op when the environment does not provide its slots. Shared here:
//! context-carrying callback wrapping and listener bookkeeping.

pub mod deferred;
pub mod fetch;
pub mod page;
pub mod timers;
pub mod xhr;

use std::sync::Arc;

use crate::bus::{ContextScope, InvocationContext};
use crate::host::{Callback, Value};
use crate::intercept::ContextResolver;

/// Resolver keying the context by the call's receiver, so every method call
/// on one object shares one context.
pub(crate) fn receiver_context() -> ContextResolver {
    Arc::new(|_env, frame, channel| channel.context(frame.this.map(|obj| obj.0).unwrap_or(0)))
}

/// Wraps a host callback so that while it runs, `ctx` is the active context
/// (new registrations inside it become children), and its firing and run
/// time are tallied on `ctx`.
pub(crate) fn carry_context(cb: &Callback, ctx: &InvocationContext) -> Callback {
    let inner = cb.clone();
    let ctx = ctx.clone();
    Callback::new(move |env, args| {
        let started = env.now();
        let _scope = ContextScope::enter(&ctx);
        ctx.with(|d| d.fired_callbacks += 1);
        inner.invoke(env, args);
        ctx.with(|d| d.metrics.callback_ms += env.now() - started);
    })
}

/// Replaces the listener argument (`args[1]`, with `args[2]` as the capture
/// flag) with its wrapped form, reusing the cached wrapper for a duplicate
/// (callback, capture) pair so the native side can deduplicate by identity.
///
/// Newly registered completion listeners bump the expected-callback counter
/// when `count_completion` is set. Returns whether this was a new
/// registration.
pub(crate) fn bind_listener(
    ctx: &InvocationContext,
    args: &mut [Value],
    count_completion: bool,
    make: impl FnOnce(&Callback) -> Callback,
) -> bool {
    let Some(cb) = args.get(1).and_then(Value::as_func).cloned() else {
        return false;
    };
    let capture = args.get(2).and_then(Value::as_bool).unwrap_or(false);
    let key = (cb.id(), capture);

    let existing = ctx.with(|d| d.listeners.get(&key).cloned());
    let (wrapped, newly) = match existing {
        Some(wrapped) => (wrapped, false),
        None => {
            let wrapped = make(&cb);
            ctx.with(|d| {
                d.listeners.insert(key, wrapped.clone());
            });
            (wrapped, true)
        }
    };
    if newly && count_completion {
        ctx.with(|d| d.expected_callbacks += 1);
    }
    args[1] = Value::Func(wrapped);
    newly
}

/// Undoes [`bind_listener`] for a removal call: swaps in the cached wrapper
/// (so native removal matches by identity) and reconciles the
/// expected-callback counter.
pub(crate) fn unbind_listener(ctx: &InvocationContext, args: &mut [Value], count_completion: bool) {
    let Some(cb) = args.get(1).and_then(Value::as_func).cloned() else {
        return;
    };
    let capture = args.get(2).and_then(Value::as_bool).unwrap_or(false);
    let key = (cb.id(), capture);
    let removed = ctx.with(|d| d.listeners.remove(&key));
    if let Some(wrapped) = removed {
        args[1] = Value::Func(wrapped);
        if count_completion {
            ctx.with(|d| d.expected_callbacks = d.expected_callbacks.saturating_sub(1));
        }
    }
}
