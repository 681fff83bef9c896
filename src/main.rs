use anyhow::Result;

use pagescope::agent::Agent;
use pagescope::config::{AgentConfig, AgentSettings};
use pagescope::host::{Callback, SimPage, Value};
use pagescope::serialize::serialize;

// A small end-to-end demo against the simulated page: instrument, run a
// couple of network calls, print the serialized payload.
fn main() -> Result<()> {
    pagescope::init_tracing();

    let page = SimPage::new("app.example.com");
    page.route("GET", "/api/items", 200, r#"{"items":[1,2,3]}"#);
    page.route("POST", "https://api.example.com/graphql", 200, r#"{"data":{}}"#);

    let settings = AgentSettings {
        deny_list: vec!["tracker.example.net".to_string()],
        ..AgentSettings::default()
    };
    let agent = Agent::new(page.env().clone(), AgentConfig::new(settings));
    let aggregator = agent.instrument();

    let env = page.env();
    env.call("fetch", vec![Value::Text("/api/items".to_string())])?;
    env.call(
        "fetch",
        vec![
            Value::Text("https://api.example.com/graphql".to_string()),
            Value::Json(serde_json::json!({
                "method": "POST",
                "body": r#"{"query":"query ListItems { items { id } }"}"#,
            })),
        ],
    )?;
    env.call(
        "setTimeout",
        vec![Value::Func(Callback::new(|_, _| {})), Value::Number(25.0)],
    )?;
    env.run_until_idle();

    let records = aggregator.take_records();
    match serialize(&records, 0.0) {
        Some(payload) => println!("{payload}"),
        None => println!("no records collected"),
    }
    Ok(())
}
