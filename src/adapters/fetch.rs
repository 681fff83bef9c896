//! Modern request adapter: the global fetch entry point and the deferred
//! body-read methods.

use tracing::debug;

use crate::agent::Agent;
use crate::aggregate::records::{parse_url, RequestKind};
use crate::bus::{current_context, AdapterKind, Channel, Payload};
use crate::host::{Callback, Value};
use crate::intercept::{Capability, Interceptor};

use super::receiver_context;

/// Wraps the modern request capability: `fetch` plus the body-read methods
/// of the response object.
pub fn wrap_fetch(agent: &Agent) -> Channel {
    let env = agent.env().clone();
    agent
        .registry()
        .acquire(Capability::ModernRequest, agent.bus(), |channel| {
            if !env.has_slot("fetch") {
                debug!("no fetch slot; fetch adapter is a no-op");
                return Vec::new();
            }
            let interceptor = Interceptor::new(channel);
            let mut originals = Vec::new();

            if let Some(target) = env.slot("fetch") {
                if !target.is_wrapper() {
                    let wrapped = interceptor.wrap(&target, "fetch-", None);
                    env.set_slot("fetch", wrapped);
                    originals.push(("fetch".to_string(), target));
                }
            }
            originals.extend(interceptor.in_place(
                &env,
                &["Response.text", "Response.json", "Response.arrayBuffer"],
                "-body-",
                Some(receiver_context()),
            ));

            let start_env = env.clone();
            channel.on("fetch-start", move |_, payload, ctx| {
                let Payload::CallStart { args, .. } = payload else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                let url = args.first().and_then(Value::as_text).unwrap_or("");
                let mut params = parse_url(url, start_env.origin());
                params.method = "GET".to_string();
                let mut request_size = None;
                if let Some(options) = args.get(1).and_then(Value::as_json) {
                    if let Some(method) = options.get("method").and_then(|v| v.as_str()) {
                        params.method = method.to_uppercase();
                    }
                    if let Some(body) = options.get("body").and_then(|v| v.as_str()) {
                        request_size = Some(body.len() as u64);
                        params.body = Some(body.to_string());
                    }
                }
                let now = start_env.now();
                ctx.with(|d| {
                    d.kind = AdapterKind::ModernRequest;
                    d.params = Some(params);
                    d.start_ms = Some(now);
                    d.metrics.request_size = request_size;
                    d.parent = current_context();
                });
                Ok(())
            });

            let end_env = env.clone();
            let end_chan = channel.clone();
            channel.on("fetch-end", move |_, payload, ctx| {
                let Payload::CallEnd {
                    result: Some(Value::Deferred(deferred)),
                    ..
                } = payload
                else {
                    return Ok(());
                };
                let Some(ctx) = ctx else { return Ok(()) };
                let chan = end_chan.clone();
                let done_ctx = ctx.clone();
                deferred.on_settle(
                    &end_env,
                    Callback::new(move |env, settle_args| {
                        if !done_ctx.mark_done() {
                            return;
                        }
                        let mut status = 0u16;
                        let mut response_size = None;
                        if let Some(Value::Obj(resp)) = settle_args.first() {
                            status =
                                env.get_prop(*resp, "status").as_number().unwrap_or(0.0) as u16;
                            response_size = env
                                .get_prop(*resp, "headers")
                                .as_json()
                                .and_then(|headers| content_length(headers));
                            // Body reads on this response share the request's
                            // context.
                            chan.adopt_context(resp.0, &done_ctx);
                        }
                        let (params, metrics, start_ms) = done_ctx.with(|d| {
                            d.metrics.response_size = response_size;
                            let mut params = d.params.clone().unwrap_or_default();
                            params.status = status;
                            (params, d.metrics.clone(), d.start_ms.unwrap_or(0.0))
                        });
                        let mut payload = Payload::RequestDone {
                            params,
                            metrics,
                            start_ms,
                            end_ms: env.now(),
                            kind: RequestKind::Fetch,
                        };
                        chan.emit("fetch-done", &mut payload, Some(&done_ctx));
                    }),
                );
                Ok(())
            });

            originals
        })
}

/// Releases one reference; slots restore at zero.
pub fn unwrap_fetch(agent: &Agent) {
    agent.registry().release(Capability::ModernRequest, agent.env());
}

// The final response size comes from the content-length header when present.
fn content_length(headers: &serde_json::Value) -> Option<u64> {
    let value = headers.get("content-length")?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
