//! Services shared by every part of one machine.

use super::faults::FaultSource;
use crate::config::MachineConfig;
use crate::error::MachineError;
use crate::events::{EventPump, MachineEvent};
use crate::executor::TaskExecutor;
use crate::status::LaundryStatusFlags;
use crate::vault::GuardedValue;
use std::sync::Arc;
use tracing::debug;

/// Explicitly constructed services for one machine instance, passed down to
/// states, task bodies and the driver.
pub(crate) struct MachineContext {
    config: MachineConfig,
    flags: GuardedValue<LaundryStatusFlags>,
    executor: TaskExecutor,
    events: Arc<EventPump>,
    faults: FaultSource,
}

impl MachineContext {
    pub(crate) fn new(config: MachineConfig) -> Result<Self, MachineError> {
        config.validate()?;
        let events = Arc::new(EventPump::start()?);
        let executor = TaskExecutor::start(Arc::clone(&events))?;
        let flags = GuardedValue::new("laundry status", LaundryStatusFlags::new, config.lock_timeout())
            .with_poll_interval(config.lock_poll_interval())
            .with_teardown(LaundryStatusFlags::clear_all);
        let faults = FaultSource::new(config.fault_probability, config.rng_seed);

        Ok(Self {
            config,
            flags,
            executor,
            events,
            faults,
        })
    }

    pub(crate) fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub(crate) fn flags(&self) -> &GuardedValue<LaundryStatusFlags> {
        &self.flags
    }

    pub(crate) fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub(crate) fn events(&self) -> &EventPump {
        &self.events
    }

    pub(crate) fn faults(&self) -> &FaultSource {
        &self.faults
    }

    pub(crate) fn publish(&self, event: MachineEvent) {
        self.events.publish(event);
    }

    /// Executor first so its last completions still reach the event thread,
    /// then the event thread, then the aggregate.
    pub(crate) fn dispose(&self) {
        let grace = self.config.disposal_grace();
        self.executor.dispose(grace);
        self.events.publish(MachineEvent::Disposed);
        self.events.dispose(grace);
        self.flags.dispose(grace);
        debug!("machine context disposed");
    }
}
