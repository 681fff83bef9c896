//! Hierarchical event bus with per-invocation contexts and one-shot
//! buffering, the spine every adapter and consumer hangs off.

pub mod channel;
pub mod context;
pub mod payload;

pub use channel::Channel;
pub use context::{
    current_context, AdapterKind, ContextScope, InvocationContext, TimerInfo, TimerMethod,
};
pub use payload::Payload;
