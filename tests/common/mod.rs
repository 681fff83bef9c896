#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use pagescope::agent::Agent;
use pagescope::bus::{Channel, Payload};
use pagescope::config::{AgentConfig, AgentSettings};
use pagescope::host::SimPage;

pub fn build_agent(page: &SimPage, settings: AgentSettings) -> Agent {
    Agent::new(page.env().clone(), AgentConfig::new(settings))
}

/// Records the names of the given events in emission order.
pub fn record_events(channel: &Channel, events: &[&str]) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for event in events {
        let sink = Arc::clone(&log);
        channel.on(event, move |name, _, _| {
            sink.lock().push(name.to_string());
            Ok(())
        });
    }
    log
}

/// Accumulates supportability metric values by name off the root channel.
pub fn count_supportability(root: &Channel) -> Arc<Mutex<HashMap<String, f64>>> {
    let counts = Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&counts);
    root.on("supportability", move |_, payload, _| {
        if let Payload::Metric { name, value, .. } = payload {
            *sink.lock().entry(name.clone()).or_insert(0.0) += *value;
        }
        Ok(())
    });
    counts
}
