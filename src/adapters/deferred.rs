//! Deferred-value adapter: constructor and static combine/settle wrapping
//! with `propagate` re-emission for chain correlation.

use tracing::debug;

use crate::agent::Agent;
use crate::bus::{current_context, AdapterKind, Channel, Payload};
use crate::host::Value;
use crate::intercept::{Capability, Interceptor};

use super::carry_context;

/// Wraps the deferred-value capability. Instances stay host deferreds, so
/// identity checks against the original type keep succeeding.
pub fn wrap_deferred(agent: &Agent) -> Channel {
    let env = agent.env().clone();
    agent
        .registry()
        .acquire(Capability::Deferred, agent.bus(), |channel| {
            if !env.has_slot("Promise") {
                debug!("no deferred slot; deferred adapter is a no-op");
                return Vec::new();
            }
            let interceptor = Interceptor::new(channel);
            let mut originals = Vec::new();

            if let Some(ctor) = env.slot("Promise") {
                if !ctor.is_wrapper() {
                    let wrapped = interceptor.wrap(&ctor, "promise-", None);
                    env.set_slot("Promise", wrapped);
                    originals.push(("Promise".to_string(), ctor));
                }
            }
            originals.extend(interceptor.in_place(
                &env,
                &[
                    "Promise.resolve",
                    "Promise.reject",
                    "Promise.all",
                    "Promise.race",
                ],
                "-cast-",
                None,
            ));
            originals.extend(interceptor.in_place(&env, &["Promise.then"], "then-", None));

            channel.on("promise-start", |_, _, ctx| {
                if let Some(ctx) = ctx {
                    ctx.with(|d| {
                        d.kind = AdapterKind::Deferred;
                        d.parent = current_context();
                    });
                }
                Ok(())
            });

            // The combine/settle statics re-emit the resolved value so a
            // chain that escaped wrapping (e.g. returned from a native body
            // read) can still be correlated to the deferred that fed it.
            for event in [
                "resolve-cast-end",
                "reject-cast-end",
                "all-cast-end",
                "race-cast-end",
            ] {
                let cast_env = env.clone();
                let cast_chan = channel.clone();
                channel.on(event, move |_, payload, _| {
                    let Payload::CallEnd {
                        result: Some(Value::Deferred(deferred)),
                        ..
                    } = payload
                    else {
                        return Ok(());
                    };
                    let finalized = deferred.is_settled();
                    let chan = cast_chan.clone();
                    deferred.on_settle(
                        &cast_env,
                        crate::host::Callback::new(move |_, settle_args| {
                            let value = settle_args.first().cloned().unwrap_or_default();
                            let mut payload = Payload::Propagate { value, finalized };
                            chan.emit("propagate", &mut payload, None);
                        }),
                    );
                    Ok(())
                });
            }

            channel.on("then-start", |_, payload, ctx| {
                let Payload::CallStart { args, .. } = payload else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                ctx.with(|d| {
                    d.kind = AdapterKind::Deferred;
                    d.parent = current_context();
                });
                // Continuations run under this registration's context.
                for idx in [1, 2] {
                    if let Some(cb) = args.get(idx).and_then(Value::as_func).cloned() {
                        ctx.with(|d| d.expected_callbacks += 1);
                        args[idx] = Value::Func(carry_context(&cb, ctx));
                    }
                }
                Ok(())
            });

            originals
        })
}

/// Releases one reference; slots restore at zero.
pub fn unwrap_deferred(agent: &Agent) {
    agent.registry().release(Capability::Deferred, agent.env());
}
