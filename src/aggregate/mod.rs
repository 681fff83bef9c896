//! The network-call aggregation pipeline: filtering, scoping, tracing
//! correlation and buffering of finalized request records.

pub mod aggregator;
pub mod buffer;
pub mod deny_list;
pub mod graphql;
pub mod records;

pub use aggregator::RequestAggregator;
pub use buffer::OutputBuffer;
pub use deny_list::DenyListFilter;
pub use records::{
    dedup_hash, parse_url, GraphQlInfo, RequestKind, RequestMetrics, RequestParams, RequestRecord,
    TracePayload,
};
