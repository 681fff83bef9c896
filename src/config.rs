//! Agent configuration: static settings plus the collaborators the
//! configuration layer injects.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregate::records::{RequestParams, TracePayload};

/// Static configuration, as delivered by the bootstrap collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentSettings {
    /// URL-like strings whose matching calls are excluded from telemetry.
    #[serde(default)]
    pub deny_list: Vec<String>,
    /// The agent's own ingest host; exclusions matching it count as
    /// agent-caused rather than app-configured.
    #[serde(default)]
    pub beacon_host: Option<String>,
    /// Report the timing metric even for deny-listed calls.
    #[serde(default)]
    pub metrics_on_denied: bool,
    /// Soft-navigation tracking owns completed records when active.
    #[serde(default)]
    pub soft_nav_active: bool,
}

/// Decides whether a sub-entity identifier is valid for scoping.
pub type EntityGuard = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Produces the distributed-tracing payload for an outgoing call, keyed by
/// whether the call is same-origin.
pub type TraceSource = Arc<dyn Fn(&RequestParams, bool) -> Option<TracePayload> + Send + Sync>;

/// Time-authority correction applied to trace timestamps.
pub type TimeCorrection = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

#[derive(Clone)]
pub struct AgentConfig {
    pub settings: AgentSettings,
    pub entity_guard: EntityGuard,
    pub trace_source: TraceSource,
    pub correct_ts: TimeCorrection,
}

impl AgentConfig {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            settings: AgentSettings::default(),
            entity_guard: Arc::new(|entity| !entity.is_empty()),
            trace_source: Arc::new(|_params, same_origin| {
                same_origin.then(|| TracePayload::generate(0.0))
            }),
            correct_ts: Arc::new(|ts| ts),
        }
    }
}
