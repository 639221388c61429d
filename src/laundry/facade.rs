//! The public face of one laundry machine.
//!
//! Every operation takes the state-code vault first and the status vault
//! second, decides against both and releases them before any event is
//! published. Operations never block past the configured lock timeout: when
//! a vault cannot be taken in time the operation reports refusal and an
//! [`MachineEvent::AccessTimedOut`] is published.

use super::context::MachineContext;
use super::driver::{Driver, StateSlot};
use super::repository::LaundryRepository;
use crate::config::MachineConfig;
use crate::core::StateHistory;
use crate::error::{MachineError, VaultError};
use crate::events::MachineEvent;
use crate::status::{LaundryItem, LaundryMachineStateCode, LaundryStatusFlags};
use crate::vault::{GuardedValue, ScopedGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

type Code = LaundryMachineStateCode;

const WAIT_POLL: Duration = Duration::from_millis(1);

/// A running laundry machine.
///
/// # Example
///
/// ```rust
/// use laundry_machine::{LaundryItem, LaundryMachine, LaundryMachineStateCode as Code, MachineConfig};
/// use std::time::Duration;
///
/// let machine = LaundryMachine::new(MachineConfig::fast()).unwrap();
/// assert!(machine.turn_on());
/// assert!(machine.wait_for_state(Code::Empty, Duration::from_secs(5)));
///
/// let (id, started) = machine.load_and_cycle(LaundryItem::new("socks", 120, 0));
/// assert!(id.is_some() && started);
/// assert!(machine.wait_for_state(Code::Washing, Duration::from_secs(5)));
/// assert!(machine.wait_for_state(Code::Full, Duration::from_secs(5)));
///
/// let item = machine.unload_any().unwrap();
/// assert!(item.is_clean() && item.is_dry());
/// machine.dispose();
/// ```
pub struct LaundryMachine {
    context: Arc<MachineContext>,
    slot: Arc<GuardedValue<StateSlot>>,
    driver: Driver,
    disposed: AtomicBool,
}

impl LaundryMachine {
    /// Start a powered-down machine and its driver thread.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        let context = Arc::new(MachineContext::new(config)?);
        let slot = Arc::new(
            GuardedValue::new(
                "state code",
                || StateSlot::new(Code::PoweredDown, context.config().history_capacity),
                context.config().lock_timeout(),
            )
            .with_poll_interval(context.config().lock_poll_interval()),
        );
        let driver = Driver::start(Arc::clone(&slot), Arc::clone(&context))?;
        info!("laundry machine started");
        Ok(Self {
            context,
            slot,
            driver,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MachineConfig {
        self.context.config()
    }

    // ---- commands ----

    /// Ask a powered-down machine to power up.
    pub fn turn_on(&self) -> bool {
        self.with_status(|code, flags| flags.register_power_on(code))
            .unwrap_or(false)
    }

    /// Ask the machine to power down, cancelling any running task.
    pub fn turn_off(&self) -> bool {
        self.with_status(|code, flags| flags.register_shutdown(code))
            .unwrap_or(false)
    }

    pub fn initiate_wash(&self) -> bool {
        self.when_idle(LaundryStatusFlags::register_wash)
    }

    pub fn initiate_dry(&self) -> bool {
        self.when_idle(LaundryStatusFlags::register_dry)
    }

    /// Wash, then dry without further input.
    pub fn initiate_wash_dry(&self) -> bool {
        self.when_idle(LaundryStatusFlags::register_wash_dry)
    }

    /// Cancel whatever task the machine is running.
    pub fn abort(&self) -> bool {
        self.with_status(|code, flags| code.runs_task() && flags.register_cancel_current_task())
            .unwrap_or(false)
    }

    // ---- laundry ----

    /// Put an item in the drum. Returns its id, or `None` if refused.
    pub fn load(&self, item: LaundryItem) -> Option<Uuid> {
        self.try_load(&mut Some(item))
    }

    /// Load an item and, if the machine is on, start a wash-dry cycle.
    pub fn load_and_cycle(&self, item: LaundryItem) -> (Option<Uuid>, bool) {
        let outcome = self.with_status(|code, flags| {
            if !code.accepts_laundry() {
                return (None, false);
            }
            let id = flags.load_item(item);
            let started = id.is_some()
                && matches!(code, Code::Empty | Code::Full)
                && flags.register_wash_dry();
            (id, started)
        });
        let (id, started) = outcome.unwrap_or((None, false));
        if let Some(id) = id {
            self.context.publish(MachineEvent::LaundryLoaded { id });
        }
        (id, started)
    }

    /// Take the item with `id` out of the drum.
    pub fn unload(&self, id: Uuid) -> Option<LaundryItem> {
        let item = self
            .with_status(|code, flags| {
                if code.accepts_laundry() {
                    flags.unload_item(id)
                } else {
                    None
                }
            })
            .flatten()?;
        self.context
            .publish(MachineEvent::LaundryUnloaded { id: item.id() });
        Some(item)
    }

    /// Take whatever is in the drum.
    pub fn unload_any(&self) -> Option<LaundryItem> {
        let item = self
            .with_status(|code, flags| {
                if code.accepts_laundry() {
                    flags.unload_any()
                } else {
                    None
                }
            })
            .flatten()?;
        self.context
            .publish(MachineEvent::LaundryUnloaded { id: item.id() });
        Some(item)
    }

    /// Move the next item from `repository` into the drum.
    ///
    /// An item the machine refuses goes back into the repository.
    pub fn load_from(
        &self,
        repository: &dyn LaundryRepository,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Option<Uuid> {
        let mut pending = Some(repository.remove(timeout, token)?);
        let id = self.try_load(&mut pending);
        if let Some(item) = pending {
            debug!(item = %item.id(), "load refused, returning item");
            repository.add(item);
        }
        id
    }

    /// Move the drum's contents into `repository`.
    pub fn unload_into(&self, repository: &dyn LaundryRepository) -> bool {
        match self.unload_any() {
            Some(item) => {
                repository.add(item);
                true
            }
            None => false,
        }
    }

    // ---- observation ----

    /// The published state code, or `None` if it could not be read in time.
    pub fn query_state(&self, timeout: Duration) -> Option<Code> {
        let slot = self.acquire(&self.slot, timeout)?;
        Some(slot.query(StateSlot::code))
    }

    /// Number of state changes published so far.
    pub fn state_change_count(&self) -> Option<u64> {
        let slot = self.acquire(&self.slot, self.lock_timeout())?;
        Some(slot.query(StateSlot::change_count))
    }

    pub fn state_history(&self) -> Option<StateHistory<Code>> {
        let slot = self.acquire(&self.slot, self.lock_timeout())?;
        Some(slot.query(|s| s.history().clone()))
    }

    /// Copy of the status aggregate.
    pub fn status_snapshot(&self, timeout: Duration) -> Option<LaundryStatusFlags> {
        let flags = self.acquire(self.context.flags(), timeout)?;
        Some(flags.query(LaundryStatusFlags::clone))
    }

    /// Poll until the machine publishes `target`.
    pub fn wait_for_state(&self, target: Code, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.query_state(self.lock_timeout()) == Some(target) {
                return true;
            }
            if Instant::now() >= deadline || self.driver.is_terminated() {
                return false;
            }
            thread::sleep(WAIT_POLL);
        }
    }

    /// Poll until the change counter moves past `after`. Returns the new count.
    pub fn wait_for_change(&self, after: u64, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state_change_count() {
                Some(count) if count > after => return Some(count),
                _ if Instant::now() >= deadline || self.driver.is_terminated() => return None,
                _ => thread::sleep(WAIT_POLL),
            }
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<MachineEvent> {
        self.context.events().subscribe()
    }

    /// Run `listener` on the event thread for every event from now on.
    pub fn on_event(&self, listener: impl Fn(&MachineEvent) + Send + 'static) {
        self.context.events().add_listener(listener);
    }

    /// True once the driver has stopped, through disposal or a fault.
    pub fn is_terminated(&self) -> bool {
        self.driver.is_terminated()
    }

    // ---- teardown ----

    /// Stop the driver, the task worker and the event thread. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let grace = self.context.config().disposal_grace();
        self.driver.dispose(grace);
        self.context.dispose();
        self.slot.dispose(grace);
        info!("laundry machine disposed");
    }

    // ---- helpers ----

    fn lock_timeout(&self) -> Duration {
        self.context.config().lock_timeout()
    }

    /// Load the item held in `pending`. A refused item stays in `pending`.
    fn try_load(&self, pending: &mut Option<LaundryItem>) -> Option<Uuid> {
        let id = self
            .with_status(|code, flags| {
                if !code.accepts_laundry() || flags.is_loaded() {
                    return None;
                }
                flags.load_item(pending.take()?)
            })
            .flatten()?;
        self.context.publish(MachineEvent::LaundryLoaded { id });
        Some(id)
    }

    fn when_idle(&self, register: fn(&mut LaundryStatusFlags) -> bool) -> bool {
        self.with_status(|code, flags| matches!(code, Code::Empty | Code::Full) && register(flags))
            .unwrap_or(false)
    }

    /// Take both vaults in order and run `f` against the published code and
    /// the status aggregate.
    fn with_status<R>(&self, f: impl FnOnce(Code, &mut LaundryStatusFlags) -> R) -> Option<R> {
        let timeout = self.lock_timeout();
        let slot = self.acquire(&self.slot, timeout)?;
        let code = slot.query(StateSlot::code);
        let mut flags = self.acquire(self.context.flags(), timeout)?;
        let result = flags.mixed(|status| f(code, status));
        drop(flags);
        drop(slot);
        Some(result)
    }

    fn acquire<'a, T>(
        &self,
        vault: &'a GuardedValue<T>,
        timeout: Duration,
    ) -> Option<ScopedGuard<'a, T>> {
        match vault.lock(timeout) {
            Ok(guard) => Some(guard),
            Err(VaultError::TimedOut { resource, timeout }) => {
                self.context
                    .publish(MachineEvent::AccessTimedOut { resource, timeout });
                None
            }
            Err(e) => {
                debug!(error = %e, "machine unavailable");
                None
            }
        }
    }
}

impl Drop for LaundryMachine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for LaundryMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaundryMachine")
            .field("terminated", &self.driver.is_terminated())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
