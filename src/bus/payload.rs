//! Closed payload shapes carried by bus events.
//!
//! One tagged variant per event family instead of an open bag, so consumers
//! dispatch on structure rather than duck-typing.

use crate::aggregate::records::{RequestKind, RequestMetrics, RequestParams, RequestRecord};
use crate::host::{ObjectId, Value};

#[derive(Clone, Debug)]
pub enum Payload {
    /// Emitted before a wrapped call runs. Handlers may mutate `args` in
    /// place; the mutated arguments reach the native call.
    CallStart {
        args: Vec<Value>,
        this: Option<ObjectId>,
        name: String,
    },
    /// Emitted after a wrapped call returns, on every path.
    CallEnd {
        args: Vec<Value>,
        this: Option<ObjectId>,
        result: Option<Value>,
    },
    /// Emitted when a wrapped call fails, strictly before its `end`.
    CallErr {
        args: Vec<Value>,
        this: Option<ObjectId>,
        error: String,
    },
    /// Re-emitted by the deferred adapter's combine/settle statics.
    Propagate { value: Value, finalized: bool },
    /// A network primitive's lifecycle completed; input to the aggregator.
    RequestDone {
        params: RequestParams,
        metrics: RequestMetrics,
        start_ms: f64,
        end_ms: f64,
        kind: RequestKind,
    },
    /// Generic metric (timing or supportability counter).
    Metric {
        name: String,
        value: f64,
        entity: Option<String>,
    },
    /// Per-record trace candidate for the request-trace consumer.
    RecordCandidate { record: RequestRecord, hash: u64 },
    /// Per-interaction candidate for the interaction-tree consumer.
    InteractionCandidate {
        record: RequestRecord,
        interaction: Option<u64>,
    },
    /// A subscriber failed; telemetry degrades, the host call does not.
    InternalError { message: String },
}
