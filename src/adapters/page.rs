//! Page-surface adapters: history mutation, DOM mutation observation,
//! script insertion, and global event registration. Each wraps only its
//! small slot set and no-ops outside a page-hosted environment.

use tracing::debug;

use crate::agent::Agent;
use crate::aggregate::records::parse_url;
use crate::bus::{current_context, AdapterKind, Channel, InvocationContext, Payload};
use crate::host::Value;
use crate::intercept::{Capability, Interceptor};

use super::{bind_listener, carry_context, receiver_context, unbind_listener};

pub fn wrap_history(agent: &Agent) -> Channel {
    let env = agent.env().clone();
    agent
        .registry()
        .acquire(Capability::History, agent.bus(), |channel| {
            if !env.has_slot("history.pushState") {
                debug!("no history slots; history adapter is a no-op");
                return Vec::new();
            }
            let interceptor = Interceptor::new(channel);
            let originals = interceptor.in_place(
                &env,
                &["history.pushState", "history.replaceState"],
                "-history-",
                None,
            );
            for event in ["pushState-history-start", "replaceState-history-start"] {
                channel.on(event, |_, _, ctx| {
                    if let Some(ctx) = ctx {
                        ctx.with(|d| {
                            d.kind = AdapterKind::History;
                            d.parent = current_context();
                        });
                    }
                    Ok(())
                });
            }
            originals
        })
}

pub fn unwrap_history(agent: &Agent) {
    agent.registry().release(Capability::History, agent.env());
}

pub fn wrap_mutation(agent: &Agent) -> Channel {
    let env = agent.env().clone();
    agent
        .registry()
        .acquire(Capability::DomMutation, agent.bus(), |channel| {
            if !env.has_slot("MutationObserver") {
                debug!("no mutation-observer slot; mutation adapter is a no-op");
                return Vec::new();
            }
            let interceptor = Interceptor::new(channel);
            let originals = {
                let ctor = env.slot("MutationObserver");
                match ctor {
                    Some(ctor) if !ctor.is_wrapper() => {
                        let wrapped = interceptor.wrap(&ctor, "mutation-", None);
                        env.set_slot("MutationObserver", wrapped);
                        vec![("MutationObserver".to_string(), ctor)]
                    }
                    _ => Vec::new(),
                }
            };
            channel.on("mutation-start", |_, payload, ctx| {
                let Payload::CallStart { args, .. } = payload else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                ctx.with(|d| {
                    d.kind = AdapterKind::Mutation;
                    d.parent = current_context();
                });
                if let Some(cb) = args.first().and_then(Value::as_func).cloned() {
                    args[0] = Value::Func(carry_context(&cb, ctx));
                }
                Ok(())
            });
            originals
        })
}

pub fn unwrap_mutation(agent: &Agent) {
    agent.registry().release(Capability::DomMutation, agent.env());
}

pub fn wrap_jsonp(agent: &Agent) -> Channel {
    let env = agent.env().clone();
    agent
        .registry()
        .acquire(Capability::ScriptInsert, agent.bus(), |channel| {
            if !env.has_slot("Node.appendChild") {
                debug!("no node-insertion slots; script adapter is a no-op");
                return Vec::new();
            }
            let interceptor = Interceptor::new(channel);
            let originals = interceptor.in_place(
                &env,
                &["Node.appendChild", "Node.insertBefore"],
                "-dom-",
                None,
            );
            for event in ["appendChild-dom-start", "insertBefore-dom-start"] {
                let probe_env = env.clone();
                channel.on(event, move |_, payload, ctx| {
                    let Payload::CallStart { args, .. } = payload else {
                        return Ok(());
                    };
                    let Some(ctx) = ctx else { return Ok(()) };
                    // Only script-bearing inserts are interesting.
                    let Some(node) = args.first().and_then(Value::as_obj) else {
                        return Ok(());
                    };
                    let src = probe_env.get_prop(node, "src");
                    if let Some(src) = src.as_text() {
                        let params = parse_url(src, probe_env.origin());
                        ctx.with(|d| {
                            d.kind = AdapterKind::ScriptInsert;
                            d.params = Some(params);
                            d.parent = current_context();
                        });
                    }
                    Ok(())
                });
            }
            originals
        })
}

pub fn unwrap_jsonp(agent: &Agent) {
    agent.registry().release(Capability::ScriptInsert, agent.env());
}

pub fn wrap_events(agent: &Agent) -> Channel {
    let env = agent.env().clone();
    agent
        .registry()
        .acquire(Capability::EventRegistration, agent.bus(), |channel| {
            if !env.has_slot("addEventListener") {
                debug!("no event-registration slots; events adapter is a no-op");
                return Vec::new();
            }
            let interceptor = Interceptor::new(channel);
            let originals = interceptor.in_place(
                &env,
                &["addEventListener", "removeEventListener"],
                "-events-",
                Some(receiver_context()),
            );

            channel.on("addEventListener-events-start", |_, payload, ctx| {
                let Payload::CallStart { args, .. } = payload else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                bind_listener(ctx, args, false, |cb| {
                    let listener_ctx = InvocationContext::default();
                    listener_ctx.with(|d| {
                        d.kind = AdapterKind::EventRegistration;
                        d.parent = current_context();
                    });
                    carry_context(cb, &listener_ctx)
                });
                Ok(())
            });

            channel.on("removeEventListener-events-start", |_, payload, ctx| {
                let Payload::CallStart { args, .. } = payload else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                unbind_listener(ctx, args, false);
                Ok(())
            });

            originals
        })
}

pub fn unwrap_events(agent: &Agent) {
    agent.registry().release(Capability::EventRegistration, agent.env());
}
