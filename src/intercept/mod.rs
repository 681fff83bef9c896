//! The interception substrate: generic call wrapping plus the
//! reference-counted registry of patched capabilities.

pub mod registry;
pub mod wrapper;

pub use registry::{Capability, WrapRegistry};
pub use wrapper::{ContextResolver, Interceptor};
