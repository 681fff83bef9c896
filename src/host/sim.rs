//! A canned-route page environment: installs native capability slots on a
//! [`HostEnv`] so the adapters have something real to wrap in demos and
//! integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::HostError;

use super::deferred::Deferred;
use super::env::{CallTarget, HostEnv, TaskId};
use super::value::{Callback, ObjectId, Value};

/// Fixed network latency for canned responses, in simulated milliseconds.
const LATENCY_MS: f64 = 10.0;

#[derive(Clone, Debug)]
struct CannedResponse {
    status: u16,
    body: String,
}

/// A simulated page. Routes are keyed by `(METHOD, url)` exactly as the
/// page code passes them; unrouted requests fail the way a connection
/// refusal does (status 0, error event / rejected deferred).
pub struct SimPage {
    env: HostEnv,
    routes: Arc<Mutex<HashMap<(String, String), CannedResponse>>>,
    window: ObjectId,
    location: ObjectId,
}

impl SimPage {
    pub fn new(origin: &str) -> Self {
        let env = HostEnv::new(origin);
        let routes: Arc<Mutex<HashMap<(String, String), CannedResponse>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let window = env.new_object();
        let location = env.new_object();
        env.set_prop(location, "path", Value::Text("/".to_string()));

        install_timers(&env);
        install_xhr(&env, &routes);
        install_fetch(&env, &routes);
        install_promise(&env);
        install_history(&env, location);
        install_dom(&env);
        install_global_events(&env, window);

        Self {
            env,
            routes,
            window,
            location,
        }
    }

    pub fn env(&self) -> &HostEnv {
        &self.env
    }

    /// Registers a canned response. `method` is case-insensitive.
    pub fn route(&self, method: &str, url: &str, status: u16, body: &str) {
        self.routes.lock().insert(
            (method.to_uppercase(), url.to_string()),
            CannedResponse {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Fires a page-level event at every registered global listener.
    pub fn dispatch_event(&self, event: &str) {
        fire_listeners(&self.env, self.window, event);
    }

    /// Invokes a mutation observer's callback, as the platform would after
    /// a batch of DOM changes.
    pub fn deliver_mutations(&self, observer: ObjectId) {
        if let Some(cb) = self.env.get_prop(observer, "callback").as_func().cloned() {
            cb.invoke(&self.env, &[Value::List(Vec::new())]);
        }
    }

    /// A detached node carrying a `src`, ready for `Node.appendChild`.
    pub fn create_script_node(&self, src: &str) -> ObjectId {
        let node = self.env.new_object();
        self.env.set_prop(node, "src", Value::Text(src.to_string()));
        node
    }

    pub fn current_path(&self) -> String {
        self.env
            .get_prop(self.location, "path")
            .as_text()
            .unwrap_or("/")
            .to_string()
    }
}

fn install_timers(env: &HostEnv) {
    env.set_slot(
        "setTimeout",
        CallTarget::new("setTimeout", |env, frame| {
            let cb = frame
                .args
                .first()
                .and_then(Value::as_func)
                .cloned()
                .ok_or_else(|| HostError::NotCallable("callback".to_string()))?;
            let delay = frame.args.get(1).and_then(Value::as_number).unwrap_or(0.0);
            let extra = frame.args.get(2..).unwrap_or_default().to_vec();
            let id = env.schedule(delay, None, cb, extra);
            Ok(Value::Number(id.0 as f64))
        }),
    );
    env.set_slot(
        "setInterval",
        CallTarget::new("setInterval", |env, frame| {
            let cb = frame
                .args
                .first()
                .and_then(Value::as_func)
                .cloned()
                .ok_or_else(|| HostError::NotCallable("callback".to_string()))?;
            let delay = frame.args.get(1).and_then(Value::as_number).unwrap_or(0.0);
            let extra = frame.args.get(2..).unwrap_or_default().to_vec();
            let id = env.schedule(delay, Some(delay), cb, extra);
            Ok(Value::Number(id.0 as f64))
        }),
    );
    env.set_slot(
        "clearTimeout",
        CallTarget::new("clearTimeout", |env, frame| {
            if let Some(id) = frame.args.first().and_then(Value::as_number) {
                env.cancel(TaskId(id as u64));
            }
            Ok(Value::Undefined)
        }),
    );
}

fn listener_key(event: &str, capture: bool) -> String {
    format!("listeners:{event}:{}", capture as u8)
}

fn add_listener(env: &HostEnv, obj: ObjectId, event: &str, cb: Callback, capture: bool) {
    let key = listener_key(event, capture);
    let mut list = match env.get_prop(obj, &key) {
        Value::List(list) => list,
        _ => Vec::new(),
    };
    // Same callback identity registers once, as the platform dedupes.
    let already = list
        .iter()
        .any(|v| matches!(v, Value::Func(f) if f.id() == cb.id()));
    if !already {
        list.push(Value::Func(cb));
    }
    env.set_prop(obj, &key, Value::List(list));
}

fn remove_listener(env: &HostEnv, obj: ObjectId, event: &str, cb: &Callback, capture: bool) {
    let key = listener_key(event, capture);
    if let Value::List(mut list) = env.get_prop(obj, &key) {
        list.retain(|v| !matches!(v, Value::Func(f) if f.id() == cb.id()));
        env.set_prop(obj, &key, Value::List(list));
    }
}

fn fire_listeners(env: &HostEnv, obj: ObjectId, event: &str) {
    for capture in [true, false] {
        let key = listener_key(event, capture);
        let funcs: Vec<Callback> = match env.get_prop(obj, &key) {
            Value::List(list) => list
                .iter()
                .filter_map(|v| v.as_func().cloned())
                .collect(),
            _ => Vec::new(),
        };
        for cb in funcs {
            cb.invoke(env, &[Value::Obj(obj)]);
        }
    }
}

fn install_xhr(env: &HostEnv, routes: &Arc<Mutex<HashMap<(String, String), CannedResponse>>>) {
    env.set_slot(
        "XMLHttpRequest",
        CallTarget::new("XMLHttpRequest", |env, _| {
            let obj = env.new_object();
            env.set_prop(obj, "readyState", Value::Number(0.0));
            Ok(Value::Obj(obj))
        }),
    );
    env.set_slot(
        "XMLHttpRequest.open",
        CallTarget::new("open", |env, frame| {
            let obj = frame.this.ok_or_else(|| HostError::Thrown("receiver required".to_string()))?;
            let method = frame
                .args
                .first()
                .and_then(Value::as_text)
                .unwrap_or("GET")
                .to_uppercase();
            let url = frame
                .args
                .get(1)
                .and_then(Value::as_text)
                .unwrap_or("")
                .to_string();
            env.set_prop(obj, "method", Value::Text(method));
            env.set_prop(obj, "url", Value::Text(url));
            env.set_prop(obj, "readyState", Value::Number(1.0));
            Ok(Value::Undefined)
        }),
    );
    env.set_slot(
        "XMLHttpRequest.addEventListener",
        CallTarget::new("addEventListener", |env, frame| {
            let obj = frame.this.ok_or_else(|| HostError::Thrown("receiver required".to_string()))?;
            let event = frame
                .args
                .first()
                .and_then(Value::as_text)
                .unwrap_or("")
                .to_string();
            let cb = frame
                .args
                .get(1)
                .and_then(Value::as_func)
                .cloned()
                .ok_or_else(|| HostError::NotCallable("callback".to_string()))?;
            let capture = frame
                .args
                .get(2)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            add_listener(env, obj, &event, cb, capture);
            Ok(Value::Undefined)
        }),
    );
    env.set_slot(
        "XMLHttpRequest.removeEventListener",
        CallTarget::new("removeEventListener", |env, frame| {
            let obj = frame.this.ok_or_else(|| HostError::Thrown("receiver required".to_string()))?;
            let event = frame
                .args
                .first()
                .and_then(Value::as_text)
                .unwrap_or("")
                .to_string();
            let Some(cb) = frame.args.get(1).and_then(Value::as_func) else {
                return Ok(Value::Undefined);
            };
            let capture = frame
                .args
                .get(2)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            remove_listener(env, obj, &event, cb, capture);
            Ok(Value::Undefined)
        }),
    );

    let send_routes = Arc::clone(routes);
    env.set_slot(
        "XMLHttpRequest.send",
        CallTarget::new("send", move |env, frame| {
            let obj = frame.this.ok_or_else(|| HostError::Thrown("receiver required".to_string()))?;
            let method = env
                .get_prop(obj, "method")
                .as_text()
                .unwrap_or("GET")
                .to_string();
            let url = env.get_prop(obj, "url").as_text().unwrap_or("").to_string();
            env.set_prop(obj, "readyState", Value::Number(2.0));
            let canned = send_routes.lock().get(&(method, url)).cloned();
            let task = Callback::new(move |env, _| {
                match &canned {
                    Some(resp) => {
                        env.set_prop(obj, "status", Value::Number(f64::from(resp.status)));
                        env.set_prop(obj, "responseText", Value::Text(resp.body.clone()));
                        env.set_prop(obj, "readyState", Value::Number(4.0));
                        fire_listeners(env, obj, "readystatechange");
                        fire_listeners(env, obj, "load");
                    }
                    None => {
                        env.set_prop(obj, "status", Value::Number(0.0));
                        env.set_prop(obj, "responseText", Value::Text(String::new()));
                        env.set_prop(obj, "readyState", Value::Number(4.0));
                        fire_listeners(env, obj, "readystatechange");
                        fire_listeners(env, obj, "error");
                    }
                }
                fire_listeners(env, obj, "loadend");
            });
            env.schedule(LATENCY_MS, None, task, Vec::new());
            Ok(Value::Undefined)
        }),
    );
}

fn install_fetch(env: &HostEnv, routes: &Arc<Mutex<HashMap<(String, String), CannedResponse>>>) {
    let fetch_routes = Arc::clone(routes);
    env.set_slot(
        "fetch",
        CallTarget::new("fetch", move |env, frame| {
            let url = frame
                .args
                .first()
                .and_then(Value::as_text)
                .unwrap_or("")
                .to_string();
            let method = frame
                .args
                .get(1)
                .and_then(Value::as_json)
                .and_then(|options| options.get("method"))
                .and_then(|m| m.as_str())
                .unwrap_or("GET")
                .to_uppercase();
            let canned = fetch_routes.lock().get(&(method, url)).cloned();
            let deferred = Deferred::new();
            let settle = deferred.clone();
            let task = Callback::new(move |env, _| match &canned {
                Some(resp) => {
                    let response = env.new_object();
                    env.set_prop(response, "status", Value::Number(f64::from(resp.status)));
                    env.set_prop(
                        response,
                        "headers",
                        Value::Json(serde_json::json!({ "content-length": resp.body.len() })),
                    );
                    env.set_prop(response, "body", Value::Text(resp.body.clone()));
                    settle.settle(env, Value::Obj(response), true);
                }
                None => {
                    settle.settle(env, Value::Text("connection refused".to_string()), false);
                }
            });
            env.schedule(LATENCY_MS, None, task, Vec::new());
            Ok(Value::Deferred(deferred))
        }),
    );
    env.set_slot(
        "Response.text",
        CallTarget::new("text", |env, frame| {
            let obj = frame.this.ok_or_else(|| HostError::Thrown("receiver required".to_string()))?;
            let body = env.get_prop(obj, "body");
            let deferred = Deferred::new();
            deferred.settle(env, body, true);
            Ok(Value::Deferred(deferred))
        }),
    );
    env.set_slot(
        "Response.json",
        CallTarget::new("json", |env, frame| {
            let obj = frame.this.ok_or_else(|| HostError::Thrown("receiver required".to_string()))?;
            let body = env.get_prop(obj, "body").as_text().unwrap_or("").to_string();
            let deferred = Deferred::new();
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => deferred.settle(env, Value::Json(json), true),
                Err(err) => deferred.settle(env, Value::Text(err.to_string()), false),
            }
            Ok(Value::Deferred(deferred))
        }),
    );
    env.set_slot(
        "Response.arrayBuffer",
        CallTarget::new("arrayBuffer", |env, frame| {
            let obj = frame.this.ok_or_else(|| HostError::Thrown("receiver required".to_string()))?;
            let len = env
                .get_prop(obj, "body")
                .as_text()
                .map(|body| body.len())
                .unwrap_or(0);
            let deferred = Deferred::new();
            deferred.settle(env, Value::Number(len as f64), true);
            Ok(Value::Deferred(deferred))
        }),
    );
}

fn install_promise(env: &HostEnv) {
    env.set_slot(
        "Promise",
        CallTarget::new("Promise", |env, frame| {
            let executor = frame
                .args
                .first()
                .and_then(Value::as_func)
                .cloned()
                .ok_or_else(|| HostError::NotCallable("callback".to_string()))?;
            let deferred = Deferred::new();
            let ok_cell = deferred.clone();
            let resolve = Callback::new(move |env, args| {
                ok_cell.settle(env, args.first().cloned().unwrap_or_default(), true);
            });
            let err_cell = deferred.clone();
            let reject = Callback::new(move |env, args| {
                err_cell.settle(env, args.first().cloned().unwrap_or_default(), false);
            });
            executor.invoke(env, &[Value::Func(resolve), Value::Func(reject)]);
            Ok(Value::Deferred(deferred))
        }),
    );
    env.set_slot(
        "Promise.resolve",
        CallTarget::new("resolve", |_, frame| {
            let value = frame.args.first().cloned().unwrap_or_default();
            Ok(Value::Deferred(Deferred::settled(value, true)))
        }),
    );
    env.set_slot(
        "Promise.reject",
        CallTarget::new("reject", |_, frame| {
            let value = frame.args.first().cloned().unwrap_or_default();
            Ok(Value::Deferred(Deferred::settled(value, false)))
        }),
    );
    env.set_slot(
        "Promise.all",
        CallTarget::new("all", |env, frame| {
            let items = match frame.args.first() {
                Some(Value::List(list)) => list.clone(),
                _ => Vec::new(),
            };
            let out = Deferred::new();
            if items.is_empty() {
                out.settle(env, Value::List(Vec::new()), true);
                return Ok(Value::Deferred(out));
            }
            let results = Arc::new(Mutex::new(vec![Value::Undefined; items.len()]));
            let remaining = Arc::new(Mutex::new(items.len()));
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Value::Deferred(inner) => {
                        let out = out.clone();
                        let results = Arc::clone(&results);
                        let remaining = Arc::clone(&remaining);
                        inner.on_settle(
                            env,
                            Callback::new(move |env, args| {
                                let value = args.first().cloned().unwrap_or_default();
                                let ok = matches!(args.get(1), Some(Value::Bool(true)));
                                if !ok {
                                    out.settle(env, value, false);
                                    return;
                                }
                                results.lock()[index] = value;
                                let done = {
                                    let mut rem = remaining.lock();
                                    *rem -= 1;
                                    *rem == 0
                                };
                                if done {
                                    let values = results.lock().clone();
                                    out.settle(env, Value::List(values), true);
                                }
                            }),
                        );
                    }
                    plain => {
                        results.lock()[index] = plain;
                        let done = {
                            let mut rem = remaining.lock();
                            *rem -= 1;
                            *rem == 0
                        };
                        if done {
                            let values = results.lock().clone();
                            out.settle(env, Value::List(values), true);
                        }
                    }
                }
            }
            Ok(Value::Deferred(out))
        }),
    );
    env.set_slot(
        "Promise.race",
        CallTarget::new("race", |env, frame| {
            let items = match frame.args.first() {
                Some(Value::List(list)) => list.clone(),
                _ => Vec::new(),
            };
            let out = Deferred::new();
            for item in items {
                match item {
                    Value::Deferred(inner) => {
                        let out = out.clone();
                        inner.on_settle(
                            env,
                            Callback::new(move |env, args| {
                                let value = args.first().cloned().unwrap_or_default();
                                let ok = matches!(args.get(1), Some(Value::Bool(true)));
                                // First settle wins; later ones are ignored.
                                out.settle(env, value, ok);
                            }),
                        );
                    }
                    plain => out.settle(env, plain, true),
                }
            }
            Ok(Value::Deferred(out))
        }),
    );
    env.set_slot(
        "Promise.then",
        CallTarget::new("then", |env, frame| {
            let source = frame
                .args
                .first()
                .and_then(Value::as_deferred)
                .cloned()
                .ok_or_else(|| HostError::Thrown("then requires a deferred".to_string()))?;
            let on_ok = frame.args.get(1).and_then(Value::as_func).cloned();
            let on_err = frame.args.get(2).and_then(Value::as_func).cloned();
            let out = Deferred::new();
            let chained = out.clone();
            source.on_settle(
                env,
                Callback::new(move |env, args| {
                    let value = args.first().cloned().unwrap_or_default();
                    let ok = matches!(args.get(1), Some(Value::Bool(true)));
                    let handler = if ok { &on_ok } else { &on_err };
                    if let Some(cb) = handler {
                        cb.invoke(env, &[value.clone()]);
                    }
                    chained.settle(env, value, ok);
                }),
            );
            Ok(Value::Deferred(out))
        }),
    );
}

fn install_history(env: &HostEnv, location: ObjectId) {
    for slot in ["history.pushState", "history.replaceState"] {
        env.set_slot(
            slot,
            CallTarget::new(slot, move |env, frame| {
                if let Some(url) = frame.args.get(2).and_then(Value::as_text) {
                    env.set_prop(location, "path", Value::Text(url.to_string()));
                }
                Ok(Value::Undefined)
            }),
        );
    }
}

fn install_dom(env: &HostEnv) {
    env.set_slot(
        "MutationObserver",
        CallTarget::new("MutationObserver", |env, frame| {
            let observer = env.new_object();
            if let Some(cb) = frame.args.first().and_then(Value::as_func).cloned() {
                env.set_prop(observer, "callback", Value::Func(cb));
            }
            Ok(Value::Obj(observer))
        }),
    );
    for slot in ["Node.appendChild", "Node.insertBefore"] {
        env.set_slot(
            slot,
            CallTarget::new(slot, |_, frame| {
                Ok(frame.args.first().cloned().unwrap_or_default())
            }),
        );
    }
}

fn install_global_events(env: &HostEnv, window: ObjectId) {
    env.set_slot(
        "addEventListener",
        CallTarget::new("addEventListener", move |env, frame| {
            let event = frame
                .args
                .first()
                .and_then(Value::as_text)
                .unwrap_or("")
                .to_string();
            let cb = frame
                .args
                .get(1)
                .and_then(Value::as_func)
                .cloned()
                .ok_or_else(|| HostError::NotCallable("callback".to_string()))?;
            let capture = frame
                .args
                .get(2)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            add_listener(env, window, &event, cb, capture);
            Ok(Value::Undefined)
        }),
    );
    env.set_slot(
        "removeEventListener",
        CallTarget::new("removeEventListener", move |env, frame| {
            let event = frame
                .args
                .first()
                .and_then(Value::as_text)
                .unwrap_or("")
                .to_string();
            let Some(cb) = frame.args.get(1).and_then(Value::as_func) else {
                return Ok(Value::Undefined);
            };
            let capture = frame
                .args
                .get(2)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            remove_listener(env, window, &event, cb, capture);
            Ok(Value::Undefined)
        }),
    );
}
