//! Generic function wrapping: every invocation of a wrapped target emits
//! `start` / `err` / `end` on a channel, and the target's behavior is
//! otherwise untouched.

use std::sync::Arc;

use tracing::debug;

use crate::bus::{Channel, ContextScope, InvocationContext, Payload};
use crate::host::{CallFrame, CallTarget, HostEnv, NativeFn};

/// Resolves the invocation context a wrapped call should emit under. The
/// default resolver creates a fresh context per invocation; adapters supply
/// receiver-keyed resolvers so every event about one object shares a context.
pub type ContextResolver =
    Arc<dyn Fn(&HostEnv, &CallFrame, &Channel) -> InvocationContext + Send + Sync>;

#[derive(Clone)]
pub struct Interceptor {
    channel: Channel,
}

impl Interceptor {
    pub fn new(channel: &Channel) -> Self {
        Self {
            channel: channel.clone(),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Wraps `target` so each call emits `prefix+"start"` before the native
    /// call, `prefix+"err"` on failure, and `prefix+"end"` on every exit
    /// path. Wrapping an existing wrapper returns it unchanged.
    ///
    /// Start handlers may mutate the argument vector; the mutated arguments
    /// are what the native call receives. Errors pass through unmodified.
    pub fn wrap(
        &self,
        target: &CallTarget,
        prefix: &str,
        resolver: Option<ContextResolver>,
    ) -> CallTarget {
        if target.is_wrapper() {
            debug!(name = target.name(), "already wrapped; returning as-is");
            return target.clone();
        }
        let channel = self.channel.clone();
        let original = target.clone();
        let prefix = prefix.to_string();

        let func: NativeFn = Arc::new(move |env, frame| {
            let ctx = match &resolver {
                Some(resolve) => resolve(env, frame, &channel),
                None => InvocationContext::default(),
            };

            let mut payload = Payload::CallStart {
                args: std::mem::take(&mut frame.args),
                this: frame.this,
                name: original.name().to_string(),
            };
            channel.emit(&format!("{prefix}start"), &mut payload, Some(&ctx));
            if let Payload::CallStart { args, .. } = payload {
                frame.args = args;
            }

            // The end event must fire even if the native call panics.
            let this = frame.this;
            let guard_channel = channel.clone();
            let guard_ctx = ctx.clone();
            let guard_prefix = prefix.clone();
            let end_guard = scopeguard::guard((), move |()| {
                let mut payload = Payload::CallEnd {
                    args: Vec::new(),
                    this,
                    result: None,
                };
                guard_channel.emit(&format!("{guard_prefix}end"), &mut payload, Some(&guard_ctx));
            });

            let result = {
                let _scope = ContextScope::enter(&ctx);
                original.call(env, frame)
            };
            scopeguard::ScopeGuard::into_inner(end_guard);

            if let Err(error) = &result {
                let mut payload = Payload::CallErr {
                    args: frame.args.clone(),
                    this: frame.this,
                    error: error.to_string(),
                };
                channel.emit(&format!("{prefix}err"), &mut payload, Some(&ctx));
            }
            let mut payload = Payload::CallEnd {
                args: frame.args.clone(),
                this: frame.this,
                result: result.as_ref().ok().cloned(),
            };
            channel.emit(&format!("{prefix}end"), &mut payload, Some(&ctx));
            result
        });

        CallTarget::wrapper_of(target, func)
    }

    /// Wraps each named slot of the environment in place, skipping slots
    /// that are absent or already wrapped. A prefix starting with `-`
    /// interleaves the slot's method name into the event prefix, so `open`
    /// wrapped under `-xhr-` emits `open-xhr-start`.
    ///
    /// Returns the original targets for later restoration.
    pub fn in_place(
        &self,
        env: &HostEnv,
        slots: &[&str],
        prefix: &str,
        resolver: Option<ContextResolver>,
    ) -> Vec<(String, CallTarget)> {
        let mut originals = Vec::new();
        for slot in slots {
            let Some(target) = env.slot(slot) else {
                continue;
            };
            if target.is_wrapper() {
                continue;
            }
            let event_prefix = if prefix.starts_with('-') {
                let method = slot.rsplit('.').next().unwrap_or(slot);
                format!("{method}{prefix}")
            } else {
                prefix.to_string()
            };
            let wrapped = self.wrap(&target, &event_prefix, resolver.clone());
            env.set_slot(slot, wrapped);
            originals.push(((*slot).to_string(), target));
        }
        originals
    }
}
