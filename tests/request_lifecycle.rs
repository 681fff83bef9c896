mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use pagescope::aggregate::records::RequestKind;
use pagescope::config::AgentSettings;
use pagescope::host::{Callback, SimPage, Value};
use pagescope::serialize::serialize;

use common::{build_agent, count_supportability};

const BODY: &str = r#"{"ok":true,"n":1}"#;

#[test]
fn xhr_lifecycle_produces_one_record() {
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(&page, AgentSettings::default());
    let aggregator = agent.instrument();
    let env = page.env();

    let xhr = env.call("XMLHttpRequest", Vec::new()).expect("construct");
    let obj = xhr.as_obj().expect("object");
    env.call_method(
        obj,
        "XMLHttpRequest.open",
        vec![
            Value::Text("get".to_string()),
            Value::Text("/json".to_string()),
        ],
    )
    .expect("open");

    let loads = Arc::new(Mutex::new(0u32));
    let fired = Arc::clone(&loads);
    let listener = Callback::new(move |_, _| *fired.lock() += 1);
    env.call_method(
        obj,
        "XMLHttpRequest.addEventListener",
        vec![
            Value::Text("load".to_string()),
            Value::Func(listener),
            Value::Bool(false),
        ],
    )
    .expect("addEventListener");
    env.call_method(obj, "XMLHttpRequest.send", Vec::new())
        .expect("send");
    env.run_until_idle();

    assert_eq!(*loads.lock(), 1);

    assert_eq!(aggregator.records_pending(), 1);
    let records = aggregator.take_records();
    assert_eq!(aggregator.records_pending(), 0);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.method, "GET");
    assert_eq!(record.status, 200);
    assert_eq!(record.hostname, "app.example.com");
    assert_eq!(record.path, "/json");
    assert_eq!(record.kind, RequestKind::Xhr);
    assert_eq!(record.response_size, Some(BODY.len() as u64));
    assert!(record.end_ms >= record.start_ms);

    // Same-origin call: the trace header was injected and recorded.
    assert!(record.trace_id.is_some());
    assert!(record.span_id.is_some());
    let header = env.get_prop(obj, "header:traceparent");
    assert!(header.as_text().is_some_and(|h| h.starts_with("00-")));

    // A second harvest finds nothing.
    assert!(aggregator.take_records().is_empty());
}

#[test]
fn load_and_error_listeners_still_yield_one_record() {
    // The canonical registration pattern: both terminal outcomes get a
    // listener, but only one of them can ever fire.
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(&page, AgentSettings::default());
    let aggregator = agent.instrument();
    let env = page.env();

    let xhr = env.call("XMLHttpRequest", Vec::new()).expect("construct");
    let obj = xhr.as_obj().expect("object");
    env.call_method(
        obj,
        "XMLHttpRequest.open",
        vec![
            Value::Text("GET".to_string()),
            Value::Text("/json".to_string()),
        ],
    )
    .expect("open");

    let loads = Arc::new(Mutex::new(0u32));
    let errors = Arc::new(Mutex::new(0u32));
    for (event, counter) in [("load", &loads), ("error", &errors)] {
        let fired = Arc::clone(counter);
        env.call_method(
            obj,
            "XMLHttpRequest.addEventListener",
            vec![
                Value::Text(event.to_string()),
                Value::Func(Callback::new(move |_, _| *fired.lock() += 1)),
                Value::Bool(false),
            ],
        )
        .expect("addEventListener");
    }
    env.call_method(obj, "XMLHttpRequest.send", Vec::new())
        .expect("send");
    env.run_until_idle();

    assert_eq!(*loads.lock(), 1);
    assert_eq!(*errors.lock(), 0);

    let records = aggregator.take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 200);
}

#[test]
fn duplicate_listener_registers_once() {
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(&page, AgentSettings::default());
    let aggregator = agent.instrument();
    let env = page.env();

    let xhr = env.call("XMLHttpRequest", Vec::new()).expect("construct");
    let obj = xhr.as_obj().expect("object");
    env.call_method(
        obj,
        "XMLHttpRequest.open",
        vec![
            Value::Text("GET".to_string()),
            Value::Text("/json".to_string()),
        ],
    )
    .expect("open");

    let loads = Arc::new(Mutex::new(0u32));
    let fired = Arc::clone(&loads);
    let listener = Callback::new(move |_, _| *fired.lock() += 1);
    for _ in 0..2 {
        env.call_method(
            obj,
            "XMLHttpRequest.addEventListener",
            vec![
                Value::Text("load".to_string()),
                Value::Func(listener.clone()),
                Value::Bool(false),
            ],
        )
        .expect("addEventListener");
    }
    env.call_method(obj, "XMLHttpRequest.send", Vec::new())
        .expect("send");
    env.run_until_idle();

    assert_eq!(*loads.lock(), 1);
    assert_eq!(aggregator.take_records().len(), 1);
}

#[test]
fn fetch_lifecycle_produces_one_record() {
    let page = SimPage::new("app.example.com");
    page.route("POST", "/submit", 201, BODY);
    let agent = build_agent(&page, AgentSettings::default());
    let aggregator = agent.instrument();
    let env = page.env();

    let request_body = r#"{"value":1}"#;
    env.call(
        "fetch",
        vec![
            Value::Text("/submit".to_string()),
            Value::Json(serde_json::json!({ "method": "post", "body": request_body })),
        ],
    )
    .expect("fetch");
    env.run_until_idle();

    let records = aggregator.take_records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.method, "POST");
    assert_eq!(record.status, 201);
    assert_eq!(record.kind, RequestKind::Fetch);
    assert_eq!(record.request_size, Some(request_body.len() as u64));
    // Response size comes from the content-length header.
    assert_eq!(record.response_size, Some(BODY.len() as u64));
    assert!(record.trace_id.is_some());
}

#[test]
fn failed_fetch_still_completes_with_status_zero() {
    let page = SimPage::new("app.example.com");
    let agent = build_agent(&page, AgentSettings::default());
    let aggregator = agent.instrument();

    page.env()
        .call("fetch", vec![Value::Text("/unrouted".to_string())])
        .expect("fetch");
    page.env().run_until_idle();

    let records = aggregator.take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 0);
}

#[test]
fn deny_star_collects_nothing() {
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(
        &page,
        AgentSettings {
            deny_list: vec!["*".to_string()],
            ..AgentSettings::default()
        },
    );
    let counts = count_supportability(agent.bus());
    let aggregator = agent.instrument();

    page.env()
        .call("fetch", vec![Value::Text("/json".to_string())])
        .expect("fetch");
    page.env().run_until_idle();

    assert!(aggregator.take_records().is_empty());
    let counts = counts.lock();
    assert_eq!(counts.get("requests/excluded/app"), Some(&1.0));
    assert_eq!(counts.get("requests/metrics/excluded/app"), Some(&1.0));
}

#[test]
fn beacon_exclusions_count_as_agent_caused() {
    let page = SimPage::new("app.example.com");
    page.route("POST", "https://collector.example.net/ingest", 200, "ok");
    let agent = build_agent(
        &page,
        AgentSettings {
            deny_list: vec!["collector.example.net".to_string()],
            beacon_host: Some("collector.example.net".to_string()),
            ..AgentSettings::default()
        },
    );
    let counts = count_supportability(agent.bus());
    let aggregator = agent.instrument();

    page.env()
        .call(
            "fetch",
            vec![
                Value::Text("https://collector.example.net/ingest".to_string()),
                Value::Json(serde_json::json!({ "method": "POST" })),
            ],
        )
        .expect("fetch");
    page.env().run_until_idle();

    assert!(aggregator.take_records().is_empty());
    assert_eq!(counts.lock().get("requests/excluded/agent"), Some(&1.0));
}

#[test]
fn metrics_on_denied_still_reports_duration() {
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(
        &page,
        AgentSettings {
            deny_list: vec!["*".to_string()],
            metrics_on_denied: true,
            ..AgentSettings::default()
        },
    );
    let durations = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&durations);
    agent.bus().on("metric", move |_, payload, _| {
        if let pagescope::bus::Payload::Metric { name, value, .. } = payload {
            if name == "request/duration" {
                sink.lock().push(*value);
            }
        }
        Ok(())
    });
    let counts = count_supportability(agent.bus());
    let aggregator = agent.instrument();

    page.env()
        .call("fetch", vec![Value::Text("/json".to_string())])
        .expect("fetch");
    page.env().run_until_idle();

    assert!(aggregator.take_records().is_empty());
    assert_eq!(durations.lock().len(), 1);
    assert_eq!(counts.lock().get("requests/excluded/app"), Some(&1.0));
    // Metrics were reported, so no metrics-excluded twin.
    assert_eq!(counts.lock().get("requests/metrics/excluded/app"), None);
}

#[test]
fn entity_scoped_records_are_copied() {
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(&page, AgentSettings::default());
    let aggregator = agent.instrument();

    agent.bus().get("fetch").on("fetch-start", |_, _, ctx| {
        if let Some(ctx) = ctx {
            ctx.with(|d| d.entity = Some("widget-7".to_string()));
        }
        Ok(())
    });

    page.env()
        .call("fetch", vec![Value::Text("/json".to_string())])
        .expect("fetch");
    page.env().run_until_idle();

    // The record lands in the main buffer and in the entity's own buffer.
    assert_eq!(aggregator.take_records().len(), 1);
    let scoped = aggregator.take_entity_records("widget-7");
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].entity.as_deref(), Some("widget-7"));
    assert!(aggregator.take_entity_records("widget-7").is_empty());
}

#[test]
fn invalid_entity_is_dropped_with_supportability() {
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(&page, AgentSettings::default());
    let counts = count_supportability(agent.bus());
    let aggregator = agent.instrument();

    // Empty identifiers fail the default entity guard.
    agent.bus().get("fetch").on("fetch-start", |_, _, ctx| {
        if let Some(ctx) = ctx {
            ctx.with(|d| d.entity = Some(String::new()));
        }
        Ok(())
    });

    page.env()
        .call("fetch", vec![Value::Text("/json".to_string())])
        .expect("fetch");
    page.env().run_until_idle();

    let records = aggregator.take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entity, None);
    assert_eq!(counts.lock().get("requests/entity/invalid"), Some(&1.0));
    assert!(aggregator.take_entity_records("").is_empty());
}

#[test]
fn interaction_records_park_until_resolution() {
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(&page, AgentSettings::default());
    let aggregator = agent.instrument();

    agent.bus().get("fetch").on("fetch-start", |_, _, ctx| {
        if let Some(ctx) = ctx {
            ctx.with(|d| d.interaction = Some(7));
        }
        Ok(())
    });

    page.env()
        .call("fetch", vec![Value::Text("/json".to_string())])
        .expect("fetch");
    page.env().run_until_idle();

    // Parked under the interaction, not harvestable yet.
    assert!(aggregator.take_records().is_empty());
    assert_eq!(aggregator.take_interaction(7).len(), 1);
    assert!(aggregator.take_interaction(7).is_empty());
}

#[test]
fn discarded_interaction_flushes_to_main_buffer() {
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(&page, AgentSettings::default());
    let aggregator = agent.instrument();

    agent.bus().get("fetch").on("fetch-start", |_, _, ctx| {
        if let Some(ctx) = ctx {
            ctx.with(|d| d.interaction = Some(3));
        }
        Ok(())
    });

    page.env()
        .call("fetch", vec![Value::Text("/json".to_string())])
        .expect("fetch");
    page.env().run_until_idle();

    assert!(aggregator.take_records().is_empty());
    aggregator.discard_interaction(3);
    assert_eq!(aggregator.take_records().len(), 1);
}

#[test]
fn graphql_body_yields_operation_attributes() {
    let page = SimPage::new("app.example.com");
    page.route("POST", "/graphql", 200, r#"{"data":{}}"#);
    let agent = build_agent(&page, AgentSettings::default());
    let aggregator = agent.instrument();

    page.env()
        .call(
            "fetch",
            vec![
                Value::Text("/graphql".to_string()),
                Value::Json(serde_json::json!({
                    "method": "POST",
                    "body": r#"{"query":"query ListItems { items { id } }"}"#,
                })),
            ],
        )
        .expect("fetch");
    page.env().run_until_idle();

    let records = aggregator.take_records();
    assert_eq!(records.len(), 1);
    let gql = records[0].gql.as_ref().expect("graphql info");
    assert_eq!(gql.operation_name, "ListItems");
    assert_eq!(gql.operation_type, "query");

    let wire = serialize(&records, 0.0).expect("payload");
    assert!(wire.starts_with("bel.7;"));
    assert!(wire.contains("ListItems"));
}

#[test]
fn soft_nav_routes_records_to_interaction_event() {
    let page = SimPage::new("app.example.com");
    page.route("GET", "/json", 200, BODY);
    let agent = build_agent(
        &page,
        AgentSettings {
            soft_nav_active: true,
            ..AgentSettings::default()
        },
    );
    let routed = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&routed);
    agent.bus().on("interaction-request", move |_, _, _| {
        *sink.lock() += 1;
        Ok(())
    });
    let trace_candidates = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&trace_candidates);
    agent.bus().on("request-trace", move |_, _, _| {
        *sink.lock() += 1;
        Ok(())
    });
    let aggregator = agent.instrument();

    page.env()
        .call("fetch", vec![Value::Text("/json".to_string())])
        .expect("fetch");
    page.env().run_until_idle();

    // Soft-nav owns the record; the main buffer stays empty, but the trace
    // candidate still fires.
    assert!(aggregator.take_records().is_empty());
    assert_eq!(*routed.lock(), 1);
    assert_eq!(*trace_candidates.lock(), 1);
}
