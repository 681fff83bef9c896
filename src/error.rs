//! Error types shared across the instrumentation core.

use thiserror::Error;

use crate::host::ObjectId;

/// Errors surfaced by the simulated host environment.
///
/// `Thrown` models a host-side exception escaping a native call; wrappers
/// observe it and pass it through unmodified.
#[derive(Debug, Error, Clone)]
pub enum HostError {
    /// No capability slot registered under this name
    #[error("no capability slot named {0:?}")]
    MissingSlot(String),

    /// A value that was expected to be callable is not
    #[error("value in {0:?} position is not callable")]
    NotCallable(String),

    /// The native call raised
    #[error("host call threw: {0}")]
    Thrown(String),

    /// A method call referenced an object the environment does not know
    #[error("unknown host object {0:?}")]
    UnknownObject(ObjectId),
}

/// Errors raised by the agent core itself.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Host environment failure
    #[error(transparent)]
    Host(#[from] HostError),

    /// A bus subscriber failed; reported as an `internal-error` event and
    /// never propagated to sibling handlers or the wrapped call
    #[error("event handler failed: {0}")]
    Handler(String),
}
