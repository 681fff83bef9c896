//! Legacy request adapter: constructor, `open`/`send`, listener bookkeeping
//! and the exactly-once completion signal.

use tracing::debug;

use crate::agent::Agent;
use crate::aggregate::records::{parse_url, RequestKind};
use crate::bus::{current_context, AdapterKind, Channel, InvocationContext, Payload};
use crate::host::{Callback, HostEnv, ObjectId, Value};
use crate::intercept::{Capability, Interceptor};

use super::{bind_listener, carry_context, receiver_context, unbind_listener};

const COMPLETION_EVENTS: &[&str] = &[
    "load",
    "error",
    "abort",
    "timeout",
    "loadend",
    "readystatechange",
];

/// Wraps the legacy request capability. Every instance is observable at
/// creation; one `xhr-done` fires per request no matter how many completion
/// listeners the page registered.
pub fn wrap_xhr(agent: &Agent) -> Channel {
    let env = agent.env().clone();
    agent
        .registry()
        .acquire(Capability::LegacyRequest, agent.bus(), |channel| {
            if !env.has_slot("XMLHttpRequest") {
                debug!("no legacy request slot; xhr adapter is a no-op");
                return Vec::new();
            }
            let interceptor = Interceptor::new(channel);
            let mut originals = Vec::new();

            if let Some(ctor) = env.slot("XMLHttpRequest") {
                if !ctor.is_wrapper() {
                    let wrapped = interceptor.wrap(&ctor, "new-xhr-", None);
                    env.set_slot("XMLHttpRequest", wrapped);
                    originals.push(("XMLHttpRequest".to_string(), ctor));
                }
            }
            originals.extend(interceptor.in_place(
                &env,
                &[
                    "XMLHttpRequest.open",
                    "XMLHttpRequest.send",
                    "XMLHttpRequest.addEventListener",
                    "XMLHttpRequest.removeEventListener",
                ],
                "-xhr-",
                Some(receiver_context()),
            ));

            // Constructed instance: key its context by object identity.
            let chan = channel.clone();
            channel.on("new-xhr-end", move |_, payload, _| {
                let Payload::CallEnd {
                    result: Some(Value::Obj(obj)),
                    ..
                } = payload
                else {
                    return Ok(());
                };
                let ctx = chan.context(obj.0);
                ctx.with(|d| {
                    d.kind = AdapterKind::LegacyRequest;
                    d.parent = current_context();
                });
                Ok(())
            });

            let open_env = env.clone();
            channel.on("open-xhr-start", move |_, payload, ctx| {
                let Payload::CallStart { args, .. } = payload else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                let method = args
                    .first()
                    .and_then(Value::as_text)
                    .unwrap_or("GET")
                    .to_uppercase();
                let url = args.get(1).and_then(Value::as_text).unwrap_or("");
                let mut params = parse_url(url, open_env.origin());
                params.method = method;
                ctx.with(|d| {
                    d.kind = AdapterKind::LegacyRequest;
                    d.params = Some(params);
                });
                Ok(())
            });

            let send_env = env.clone();
            let send_chan = channel.clone();
            channel.on("send-xhr-start", move |_, payload, ctx| {
                let Payload::CallStart { args, this, .. } = payload else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                let now = send_env.now();
                ctx.with(|d| {
                    d.start_ms = Some(now);
                    if let Some(body) = args.first().and_then(Value::as_text) {
                        d.metrics.request_size = Some(body.len() as u64);
                        if let Some(params) = &mut d.params {
                            params.body = Some(body.to_string());
                        }
                    }
                });
                // Completion is observed through this listener alone, never
                // through the page's own: `loadend` fires exactly once per
                // request, after every terminal event, whether the request
                // loaded, errored, aborted or timed out. Registered while
                // this emit is in flight, so the nested start event is
                // suppressed and the listener stays out of the expected
                // count.
                let Some(obj) = *this else { return Ok(()) };
                let probe_chan = send_chan.clone();
                let probe_ctx = ctx.clone();
                let probe = Callback::new(move |env, _| {
                    finalize(&probe_chan, env, &probe_ctx, obj);
                });
                let _ = send_env.call_method(
                    obj,
                    "XMLHttpRequest.addEventListener",
                    vec![
                        Value::Text("loadend".to_string()),
                        Value::Func(probe),
                        Value::Bool(false),
                    ],
                );
                Ok(())
            });

            channel.on("addEventListener-xhr-start", move |_, payload, ctx| {
                let Payload::CallStart { args, .. } = payload else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                let completion = args
                    .first()
                    .and_then(Value::as_text)
                    .map(|name| COMPLETION_EVENTS.contains(&name))
                    .unwrap_or(false);
                bind_listener(ctx, args, completion, |cb| carry_context(cb, ctx));
                Ok(())
            });

            channel.on("removeEventListener-xhr-start", move |_, payload, ctx| {
                let Payload::CallStart { args, .. } = payload else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                let completion = args
                    .first()
                    .and_then(Value::as_text)
                    .map(|name| COMPLETION_EVENTS.contains(&name))
                    .unwrap_or(false);
                unbind_listener(ctx, args, completion);
                Ok(())
            });

            originals
        })
}

/// Releases one reference; slots restore at zero.
pub fn unwrap_xhr(agent: &Agent) {
    agent.registry().release(Capability::LegacyRequest, agent.env());
}

// Synthesizes the single resolved signal once the request reached its final
// readiness state. Runs from the adapter's own `loadend` listener, so the
// page's completion listeners (any subset of `load`/`error`/`abort`/... is
// valid; at most one terminal event fires) have all run by now. The
// expected/fired counters are bookkeeping for callback timing, never a
// completion gate.
fn finalize(channel: &Channel, env: &HostEnv, ctx: &InvocationContext, obj: ObjectId) {
    let ready = env.get_prop(obj, "readyState").as_number().unwrap_or(0.0) as u32;
    if ready < 4 {
        return;
    }
    if !ctx.mark_done() {
        return;
    }

    let status = env.get_prop(obj, "status").as_number().unwrap_or(0.0) as u16;
    let response_size = env
        .get_prop(obj, "responseText")
        .as_text()
        .map(|text| text.len() as u64);
    let (params, metrics, start_ms) = ctx.with(|d| {
        if d.metrics.response_size.is_none() {
            d.metrics.response_size = response_size;
        }
        let mut params = d.params.clone().unwrap_or_default();
        params.status = status;
        (params, d.metrics.clone(), d.start_ms.unwrap_or(0.0))
    });

    let mut payload = Payload::RequestDone {
        params,
        metrics,
        start_ms,
        end_ms: env.now(),
        kind: RequestKind::Xhr,
    };
    channel.emit("xhr-done", &mut payload, Some(ctx));
    channel.take_context(obj.0);
}
