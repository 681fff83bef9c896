//! Consumes completed request lifecycles and turns them into filtered,
//! entity-scoped, trace-correlated records.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::bus::{Channel, InvocationContext, Payload};
use crate::config::AgentConfig;
use crate::host::{HostEnv, Value};

use super::buffer::OutputBuffer;
use super::deny_list::DenyListFilter;
use super::graphql::parse_graphql;
use super::records::{
    dedup_hash, RequestKind, RequestMetrics, RequestParams, RequestRecord,
};

struct AggregatorInner {
    bus: Channel,
    config: AgentConfig,
    origin: String,
    filter: DenyListFilter,
    buffer: OutputBuffer,
    entity_buffers: Mutex<HashMap<String, OutputBuffer>>,
    /// Legacy SPA holding area: records parked per interaction id, flushed
    /// into the main buffer only when that interaction is discarded.
    pending_interactions: Mutex<HashMap<u64, Vec<RequestRecord>>>,
}

#[derive(Clone)]
pub struct RequestAggregator {
    inner: Arc<AggregatorInner>,
}

impl RequestAggregator {
    pub fn new(agent: &Agent) -> Self {
        let config = agent.config().clone();
        Self {
            inner: Arc::new(AggregatorInner {
                bus: agent.bus().clone(),
                filter: DenyListFilter::new(&config.settings.deny_list),
                config,
                origin: agent.env().origin().to_string(),
                buffer: OutputBuffer::default(),
                entity_buffers: Mutex::new(HashMap::new()),
                pending_interactions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribes to the request adapters: trace-header injection on the
    /// start events, record finalization on the done events.
    pub fn install(&self, agent: &Agent) {
        let xhr = agent.bus().get("xhr");
        let fetch = agent.bus().get("fetch");

        xhr.on(
            "send-xhr-start",
            self.trace_handler(agent.env().clone(), RequestKind::Xhr),
        );
        fetch.on(
            "fetch-start",
            self.trace_handler(agent.env().clone(), RequestKind::Fetch),
        );
        xhr.on("xhr-done", self.done_handler());
        fetch.on("fetch-done", self.done_handler());
    }

    fn trace_handler(
        &self,
        env: HostEnv,
        kind: RequestKind,
    ) -> impl FnMut(&str, &mut Payload, Option<&InvocationContext>) -> Result<(), crate::error::AgentError>
           + Send
           + 'static {
        let agg = self.clone();
        move |_, payload, ctx| {
            let Some(ctx) = ctx else { return Ok(()) };
            let Some(params) = ctx.with(|d| d.params.clone()) else {
                return Ok(());
            };
            let same_origin = params.hostname.as_deref() == Some(agg.inner.origin.as_str());
            let Some(mut trace) = (agg.inner.config.trace_source)(&params, same_origin) else {
                return Ok(());
            };
            if trace.timestamp == 0.0 {
                trace.timestamp = env.now();
            }
            let header = format!("00-{}-{}-01", trace.trace_id, trace.span_id);
            if let Payload::CallStart { args, this, .. } = payload {
                match kind {
                    // Mutating the argument vector in place is how the
                    // header reaches the native call.
                    RequestKind::Fetch => {
                        if args.len() < 2 {
                            args.resize(2, Value::Undefined);
                        }
                        let mut options = match args[1].as_json() {
                            Some(json) if json.is_object() => json.clone(),
                            _ => serde_json::json!({}),
                        };
                        if !options["headers"].is_object() {
                            options["headers"] = serde_json::json!({});
                        }
                        options["headers"]["traceparent"] = serde_json::json!(header);
                        args[1] = Value::Json(options);
                    }
                    RequestKind::Xhr => {
                        if let Some(obj) = this {
                            env.set_prop(*obj, "header:traceparent", Value::Text(header));
                        }
                    }
                }
            }
            ctx.with(|d| d.trace = Some(trace));
            Ok(())
        }
    }

    fn done_handler(
        &self,
    ) -> impl FnMut(&str, &mut Payload, Option<&InvocationContext>) -> Result<(), crate::error::AgentError>
           + Send
           + 'static {
        let agg = self.clone();
        move |_, payload, ctx| {
            if let Payload::RequestDone {
                params,
                metrics,
                start_ms,
                end_ms,
                kind,
            } = payload
            {
                agg.finalize(params.clone(), metrics.clone(), *start_ms, *end_ms, *kind, ctx);
            }
            Ok(())
        }
    }

    /// The aggregation algorithm: hash, filter, scope-validate, report
    /// metrics, build and route the record.
    pub fn finalize(
        &self,
        params: RequestParams,
        metrics: RequestMetrics,
        start_ms: f64,
        end_ms: f64,
        kind: RequestKind,
        ctx: Option<&InvocationContext>,
    ) {
        let settings = &self.inner.config.settings;
        let hash = dedup_hash(
            params.status,
            params.hostname.as_deref().unwrap_or("unknown"),
            &params.pathname,
        );
        let collect = self
            .inner
            .filter
            .should_collect(params.hostname.as_deref(), &params.pathname);
        let metrics_wanted = collect || settings.metrics_on_denied;

        // Invalid entity scoping is dropped loudly, never kept silently.
        let mut entity = ctx.and_then(|c| c.with(|d| d.entity.clone()));
        if let Some(id) = &entity {
            if !(self.inner.config.entity_guard)(id) {
                warn!(entity = %id, "dropping invalid entity scope");
                self.supportability("requests/entity/invalid", 1.0);
                entity = None;
            }
        }

        // Timing metric is independent of whether the event record is kept.
        if metrics_wanted {
            let duration = (end_ms - start_ms).max(0.0);
            self.metric("request/duration", duration, None);
            if let Some(id) = &entity {
                self.metric("request/duration", duration, Some(id.clone()));
            }
        }

        if !collect {
            let agent_caused = match (&settings.beacon_host, &params.hostname) {
                (Some(beacon), Some(host)) => host.ends_with(beacon.as_str()),
                _ => false,
            };
            let scope = if agent_caused { "agent" } else { "app" };
            self.supportability(&format!("requests/excluded/{scope}"), 1.0);
            if !metrics_wanted {
                self.supportability(&format!("requests/metrics/excluded/{scope}"), 1.0);
            }
            debug!(
                hostname = params.hostname.as_deref().unwrap_or(""),
                path = %params.pathname,
                "request excluded from telemetry"
            );
            return;
        }

        let (trace, interaction, attrs) = ctx
            .map(|c| c.with(|d| (d.trace.clone(), d.interaction, d.attrs.clone())))
            .unwrap_or_default();

        let gql = parse_graphql(params.body.as_deref(), &params.query);
        if let Some(info) = &gql {
            let size = serde_json::json!({
                "operationName": info.operation_name,
                "operationType": info.operation_type,
            })
            .to_string()
            .len();
            self.supportability("graphql/bytes", size as f64);
        }

        let record = RequestRecord {
            method: params.method.clone(),
            status: params.status,
            hostname: params.hostname.clone().unwrap_or_default(),
            port: params.port.clone(),
            protocol: params.protocol.clone(),
            path: params.pathname.clone(),
            start_ms,
            end_ms,
            request_size: metrics.request_size,
            response_size: metrics.response_size,
            callback_ms: metrics.callback_ms,
            kind,
            span_id: trace.as_ref().map(|t| t.span_id.clone()),
            trace_id: trace.as_ref().map(|t| t.trace_id.clone()),
            trace_ms: trace.as_ref().map(|t| (self.inner.config.correct_ts)(t.timestamp)),
            gql,
            entity: entity.clone(),
            attrs,
        };

        // Outbound contract: every kept record is a trace candidate.
        let mut candidate = Payload::RecordCandidate {
            record: record.clone(),
            hash,
        };
        self.inner
            .bus
            .emit_force("request-trace", &mut candidate, ctx);

        // Exactly one primary route.
        if settings.soft_nav_active {
            let mut payload = Payload::InteractionCandidate {
                record: record.clone(),
                interaction,
            };
            self.inner
                .bus
                .emit_force("interaction-request", &mut payload, ctx);
        } else if let Some(id) = interaction {
            self.inner
                .pending_interactions
                .lock()
                .entry(id)
                .or_default()
                .push(record.clone());
        } else {
            self.inner.buffer.push(record.clone());
        }

        // Entity-scoped copy is unconditional on the primary route.
        if let Some(id) = &entity {
            self.inner
                .entity_buffers
                .lock()
                .entry(id.clone())
                .or_default()
                .push(record);
        }
    }

    /// Drains the main buffer; the transport collaborator's harvest call.
    pub fn take_records(&self) -> Vec<RequestRecord> {
        self.inner.buffer.take()
    }

    pub fn records_pending(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Drains the named sub-entity's own buffer.
    pub fn take_entity_records(&self, entity: &str) -> Vec<RequestRecord> {
        self.inner
            .entity_buffers
            .lock()
            .get(entity)
            .map(|buffer| buffer.take())
            .unwrap_or_default()
    }

    /// The interaction was discarded; its parked records belong to the main
    /// buffer after all.
    pub fn discard_interaction(&self, interaction: u64) {
        let parked = self
            .inner
            .pending_interactions
            .lock()
            .remove(&interaction)
            .unwrap_or_default();
        for record in parked {
            self.inner.buffer.push(record);
        }
    }

    /// The interaction completed; its records go to the interaction
    /// consumer instead of the main buffer.
    pub fn take_interaction(&self, interaction: u64) -> Vec<RequestRecord> {
        self.inner
            .pending_interactions
            .lock()
            .remove(&interaction)
            .unwrap_or_default()
    }

    fn metric(&self, name: &str, value: f64, entity: Option<String>) {
        let mut payload = Payload::Metric {
            name: name.to_string(),
            value,
            entity,
        };
        self.inner.bus.emit_force("metric", &mut payload, None);
    }

    fn supportability(&self, name: &str, value: f64) {
        let mut payload = Payload::Metric {
            name: name.to_string(),
            value,
            entity: None,
        };
        self.inner.bus.emit_force("supportability", &mut payload, None);
    }
}
