//! Process-wide registry of patched capabilities with reference counting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::bus::Channel;
use crate::host::{CallTarget, HostEnv};

/// The finite set of native capabilities adapters may patch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Capability {
    Timers,
    LegacyRequest,
    ModernRequest,
    Deferred,
    History,
    DomMutation,
    ScriptInsert,
    EventRegistration,
}

impl Capability {
    /// Name of the bus channel the capability's events flow on.
    pub fn channel_name(&self) -> &'static str {
        match self {
            Capability::Timers => "timer",
            Capability::LegacyRequest => "xhr",
            Capability::ModernRequest => "fetch",
            Capability::Deferred => "promise",
            Capability::History => "history",
            Capability::DomMutation => "mutation",
            Capability::ScriptInsert => "jsonp",
            Capability::EventRegistration => "events",
        }
    }
}

struct WrapState {
    count: u32,
    originals: Vec<(String, CallTarget)>,
}

struct RegistryInner {
    active: HashMap<Capability, WrapState>,
    disabled: HashSet<Capability>,
}

/// Tracks how many independent consumers requested each capability's
/// wrapping. The first acquire performs the patch; the native slots are
/// restored only when the count returns to zero; releases never underflow.
#[derive(Clone)]
pub struct WrapRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl WrapRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                active: HashMap::new(),
                disabled: HashSet::new(),
            })),
        }
    }

    /// Acquires `cap`, running `install` only for the first caller. Returns
    /// the capability's channel either way. A permanently disabled
    /// capability is never re-patched.
    pub fn acquire(
        &self,
        cap: Capability,
        bus: &Channel,
        install: impl FnOnce(&Channel) -> Vec<(String, CallTarget)>,
    ) -> Channel {
        let channel = bus.get(cap.channel_name());
        let mut inner = self.inner.lock();
        if inner.disabled.contains(&cap) {
            debug!(?cap, "capability permanently disabled; not wrapping");
            return channel;
        }
        if let Some(state) = inner.active.get_mut(&cap) {
            state.count += 1;
            debug!(?cap, count = state.count, "capability already wrapped");
            return channel;
        }
        let originals = install(&channel);
        debug!(?cap, slots = originals.len(), "capability wrapped");
        inner.active.insert(cap, WrapState { count: 1, originals });
        channel
    }

    /// Releases one reference; at zero the original targets go back into
    /// their slots. Extra releases are no-ops.
    pub fn release(&self, cap: Capability, env: &HostEnv) {
        let mut inner = self.inner.lock();
        let Some(state) = inner.active.get_mut(&cap) else {
            return;
        };
        state.count = state.count.saturating_sub(1);
        if state.count > 0 {
            return;
        }
        let state = inner
            .active
            .remove(&cap)
            .unwrap_or(WrapState { count: 0, originals: Vec::new() });
        for (slot, original) in state.originals {
            env.set_slot(&slot, original);
        }
        debug!(?cap, "capability restored");
    }

    /// Restores the capability now and refuses all future wrapping.
    pub fn disable_permanently(&self, cap: Capability, env: &HostEnv) {
        let mut inner = self.inner.lock();
        inner.disabled.insert(cap);
        if let Some(state) = inner.active.remove(&cap) {
            for (slot, original) in state.originals {
                env.set_slot(&slot, original);
            }
        }
        debug!(?cap, "capability permanently disabled");
    }

    /// Current reference count for `cap`.
    pub fn active_count(&self, cap: Capability) -> u32 {
        self.inner
            .lock()
            .active
            .get(&cap)
            .map(|s| s.count)
            .unwrap_or(0)
    }
}

impl Default for WrapRegistry {
    fn default() -> Self {
        Self::new()
    }
}
