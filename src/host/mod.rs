//! Host model: the capabilities the agent observes but does not own.
//!
//! Native entry points are `CallTarget` slots held by a [`HostEnv`]; the
//! embedder populates them and pumps the task queue. [`sim`] provides the
//! reference page environment used by the demo binary and the integration
//! tests.

pub mod deferred;
pub mod env;
pub mod sim;
pub mod value;

pub use deferred::Deferred;
pub use env::{CallFrame, CallTarget, HostEnv, NativeFn, TaskId};
pub use sim::SimPage;
pub use value::{Callback, ObjectId, Value};
