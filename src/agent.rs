//! The agent instance: one bus, one host environment, one wrap registry.

use crate::adapters;
use crate::aggregate::RequestAggregator;
use crate::bus::Channel;
use crate::config::AgentConfig;
use crate::host::HostEnv;
use crate::intercept::WrapRegistry;

#[derive(Clone)]
pub struct Agent {
    bus: Channel,
    env: HostEnv,
    registry: WrapRegistry,
    config: AgentConfig,
}

impl Agent {
    pub fn new(env: HostEnv, config: AgentConfig) -> Self {
        Self {
            bus: Channel::root(false),
            env,
            registry: WrapRegistry::new(),
            config,
        }
    }

    /// Root channel of this agent's bus.
    pub fn bus(&self) -> &Channel {
        &self.bus
    }

    pub fn env(&self) -> &HostEnv {
        &self.env
    }

    pub fn registry(&self) -> &WrapRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Wraps every capability the environment provides and installs the
    /// network-call aggregation pipeline on top.
    pub fn instrument(&self) -> RequestAggregator {
        adapters::xhr::wrap_xhr(self);
        adapters::fetch::wrap_fetch(self);
        adapters::timers::wrap_timers(self);
        adapters::deferred::wrap_deferred(self);
        adapters::page::wrap_history(self);
        adapters::page::wrap_mutation(self);
        adapters::page::wrap_jsonp(self);
        adapters::page::wrap_events(self);

        let aggregator = RequestAggregator::new(self);
        aggregator.install(self);
        aggregator
    }
}
