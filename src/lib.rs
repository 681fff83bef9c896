//! In-page telemetry agent core: wraps a host environment's asynchronous
//! primitives, propagates causal context through their callbacks, and turns
//! completed network calls into filtered, serialized telemetry records.

pub mod adapters;
pub mod agent;
pub mod aggregate;
pub mod bus;
pub mod config;
pub mod error;
pub mod host;
pub mod intercept;
pub mod serialize;
pub mod telemetry;

pub use agent::Agent;
pub use config::{AgentConfig, AgentSettings};
pub use error::{AgentError, HostError};
pub use telemetry::init_tracing;
