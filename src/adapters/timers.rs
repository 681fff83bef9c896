//! Timer adapter: schedule/cancel wrapping with context propagation into
//! the scheduled callback.

use tracing::debug;

use crate::agent::Agent;
use crate::bus::{current_context, AdapterKind, Channel, ContextScope, Payload, TimerInfo, TimerMethod};
use crate::host::{Callback, Value};
use crate::intercept::{Capability, Interceptor};

/// Wraps `setTimeout`/`setInterval`/`clearTimeout`. Reference-counted; the
/// first caller patches, later callers get the same channel.
pub fn wrap_timers(agent: &Agent) -> Channel {
    let env = agent.env().clone();
    agent
        .registry()
        .acquire(Capability::Timers, agent.bus(), |channel| {
            if !env.has_slot("setTimeout") {
                debug!("no timer slots; timer adapter is a no-op");
                return Vec::new();
            }
            let interceptor = Interceptor::new(channel);
            let originals = interceptor.in_place(
                &env,
                &["setTimeout", "setInterval", "clearTimeout"],
                "-timer-",
                None,
            );

            for (event, method) in [
                ("setTimeout-timer-start", TimerMethod::Once),
                ("setInterval-timer-start", TimerMethod::Repeating),
            ] {
                let chan = channel.clone();
                channel.on(event, move |_, payload, ctx| {
                    let Payload::CallStart { args, .. } = payload else {
                        return Ok(());
                    };
                    let Some(ctx) = ctx else { return Ok(()) };
                    let delay = args
                        .get(1)
                        .and_then(Value::as_number)
                        .unwrap_or(0.0)
                        .max(0.0);
                    let parent = current_context();
                    ctx.with(|d| {
                        d.kind = AdapterKind::Timer;
                        d.timer = Some(TimerInfo {
                            delay_ms: delay,
                            method,
                        });
                        d.parent = parent.clone();
                    });
                    if let Some(cb) = args.first().and_then(Value::as_func).cloned() {
                        ctx.with(|d| d.expected_callbacks += 1);
                        let once = method == TimerMethod::Once;
                        let tctx = ctx.clone();
                        let chan = chan.clone();
                        args[0] = Value::Func(Callback::new(move |env, cb_args| {
                            let started = env.now();
                            let _scope = ContextScope::enter(&tctx);
                            tctx.with(|d| d.fired_callbacks += 1);
                            cb.invoke(env, cb_args);
                            tctx.with(|d| d.metrics.callback_ms += env.now() - started);
                            if once {
                                // One-shot fired; drop the task association.
                                if let Some(key) = tctx.with(|d| d.registration_key) {
                                    chan.take_context(key);
                                }
                            }
                        }));
                    }
                    Ok(())
                });
            }

            for event in ["setTimeout-timer-end", "setInterval-timer-end"] {
                let chan = channel.clone();
                channel.on(event, move |_, payload, ctx| {
                    let Payload::CallEnd {
                        result: Some(Value::Number(id)),
                        ..
                    } = payload
                    else {
                        return Ok(());
                    };
                    let Some(ctx) = ctx else { return Ok(()) };
                    let key = *id as u64;
                    ctx.with(|d| d.registration_key = Some(key));
                    chan.adopt_context(key, ctx);
                    Ok(())
                });
            }

            let chan = channel.clone();
            channel.on("clearTimeout-timer-start", move |_, payload, ctx| {
                let Payload::CallStart { args, .. } = payload else {
                    return Ok(());
                };
                if let Some(ctx) = ctx {
                    ctx.with(|d| {
                        d.kind = AdapterKind::Timer;
                        d.timer = Some(TimerInfo {
                            delay_ms: 0.0,
                            method: TimerMethod::Cancel,
                        });
                        d.parent = current_context();
                    });
                }
                // Reconcile the cancelled timer's expected-callback count so
                // nobody waits on a callback that will never fire.
                if let Some(id) = args.first().and_then(Value::as_number) {
                    if let Some(timer_ctx) = chan.take_context(id as u64) {
                        timer_ctx.with(|d| {
                            if d.fired_callbacks < d.expected_callbacks {
                                d.expected_callbacks -= 1;
                            }
                        });
                    }
                }
                Ok(())
            });

            originals
        })
}

/// Releases one reference; the native timer slots come back at zero.
pub fn unwrap_timers(agent: &Agent) {
    agent.registry().release(Capability::Timers, agent.env());
}
