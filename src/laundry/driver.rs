//! The thread that runs the machine.
//!
//! Each pass takes the state-code vault, lets the current state evaluate its
//! transition table against the status aggregate and, when a transition names
//! a new state, performs the change before releasing the state code. Callers
//! therefore never observe a code whose state has not been entered.

use super::context::MachineContext;
use super::states::MachineState;
use crate::config::MachineConfig;
use crate::core::{StateChange, StateHistory};
use crate::error::{fail_fast, InvariantError, MachineError, VaultError};
use crate::events::MachineEvent;
use crate::status::LaundryMachineStateCode;
use crate::vault::GuardedValue;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Code = LaundryMachineStateCode;

/// The published state code, guarded by the state-code vault.
#[derive(Debug, Clone)]
pub(crate) struct StateSlot {
    code: Code,
    change_count: u64,
    history: StateHistory<Code>,
    history_capacity: usize,
}

impl StateSlot {
    pub(crate) fn new(code: Code, history_capacity: usize) -> Self {
        Self {
            code,
            change_count: 0,
            history: StateHistory::new(),
            history_capacity,
        }
    }

    pub(crate) fn code(&self) -> Code {
        self.code
    }

    pub(crate) fn change_count(&self) -> u64 {
        self.change_count
    }

    pub(crate) fn history(&self) -> &StateHistory<Code> {
        &self.history
    }

    fn publish(&mut self, next: Code) -> StateChange<Code> {
        self.change_count += 1;
        let change = StateChange {
            from: self.code,
            to: next,
            timestamp: Utc::now(),
            change_count: self.change_count,
        };
        self.history
            .push_bounded(change.clone(), self.history_capacity);
        self.code = next;
        change
    }
}

enum Step {
    Idle,
    Changed,
    Stop,
}

/// Handle on the driver thread.
pub(crate) struct Driver {
    cancel: CancellationToken,
    terminated: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread: ThreadId,
}

impl Driver {
    /// Enter the state the slot currently names, then start driving.
    pub(crate) fn start(
        slot: Arc<GuardedValue<StateSlot>>,
        context: Arc<MachineContext>,
    ) -> Result<Self, MachineError> {
        let code = slot.lock_default()?.query(StateSlot::code);
        let initial = MachineState::new(code, Arc::clone(&context))?;
        initial.enter()?;
        debug!(state = %code, "initial state entered");

        let cancel = CancellationToken::new();
        let terminated = Arc::new(AtomicBool::new(false));
        let run = DriverLoop {
            config: context.config().clone(),
            slot,
            context,
            current: initial,
            published: code,
            cancel: cancel.clone(),
            terminated: Arc::clone(&terminated),
        };
        let handle = thread::Builder::new()
            .name("laundry-driver".to_string())
            .spawn(move || run.run())
            .map_err(|source| MachineError::Spawn {
                thread: "driver",
                source,
            })?;

        Ok(Self {
            cancel,
            terminated,
            thread: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Stop the loop, wait for the current state's task and join.
    ///
    /// Aborts the process if the driver does not stop within `grace`.
    pub(crate) fn dispose(&self, grace: Duration) {
        self.cancel.cancel();
        if thread::current().id() == self.thread {
            warn!("driver disposed from its own thread; not waiting");
            return;
        }
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let deadline = Instant::now() + grace;
        while !self.is_terminated() {
            if Instant::now() >= deadline {
                fail_fast(&format!("driver did not stop within {grace:?}"));
            }
            thread::sleep(Duration::from_millis(1));
        }
        let _ = handle.join();
        debug!("driver disposed");
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.dispose(Duration::from_secs(10));
    }
}

struct DriverLoop {
    config: MachineConfig,
    slot: Arc<GuardedValue<StateSlot>>,
    context: Arc<MachineContext>,
    current: MachineState,
    published: Code,
    cancel: CancellationToken,
    terminated: Arc<AtomicBool>,
}

impl DriverLoop {
    fn run(mut self) {
        info!(state = %self.published, "driver started");
        let mut idle = 0_u32;
        while !self.cancel.is_cancelled() {
            match self.step() {
                Step::Changed => idle = 0,
                Step::Idle => {
                    idle += 1;
                    if idle >= self.config.spin_iterations_before_sleep {
                        thread::sleep(self.config.idle_sleep());
                        idle = 0;
                    } else {
                        thread::yield_now();
                    }
                }
                Step::Stop => break,
            }
        }

        self.current.dispose();
        info!(state = %self.published, "driver terminated");
        self.context.publish(MachineEvent::Terminated {
            state: self.published,
        });
        self.terminated.store(true, Ordering::Release);
    }

    fn step(&mut self) -> Step {
        let vault = Arc::clone(&self.slot);
        let mut slot = match vault.lock_with_cancel(self.config.lock_timeout(), &self.cancel) {
            Ok(guard) => guard,
            Err(VaultError::TimedOut { resource, timeout }) => {
                warn!(resource, ?timeout, "driver could not take the state code");
                self.context
                    .publish(MachineEvent::AccessTimedOut { resource, timeout });
                return Step::Idle;
            }
            Err(_) => return Step::Stop,
        };

        let Some(next) = self
            .current
            .find_and_execute_possible_transition(self.config.transition_timeout())
        else {
            return Step::Idle;
        };

        let old = self.published;
        if let Err(e) = self.change_state(next) {
            drop(slot);
            error!(from = %old, to = %next, error = %e, "state change failed");
            let state = match &e {
                MachineError::Invariant(InvariantError::EntryNotMet { state, .. }) => *state,
                _ => old,
            };
            self.context.publish(MachineEvent::UnexpectedFault {
                state: Some(state),
                description: e.to_string(),
            });
            return Step::Stop;
        }

        let change = slot.mixed(|s| s.publish(next));
        drop(slot);
        self.published = next;
        info!(
            from = %old,
            to = %next,
            kind = ?self.current.kind(),
            change_count = change.change_count,
            "state changed"
        );
        self.context.publish(MachineEvent::StateChanged {
            old,
            new: next,
            change_count: change.change_count,
            timestamp: change.timestamp,
        });
        Step::Changed
    }

    /// Exit the current state, then build and enter `next`.
    ///
    /// `next` becomes current even when entry fails, so teardown cancels
    /// whatever it managed to start.
    fn change_state(&mut self, next: Code) -> Result<(), MachineError> {
        self.current.establish_exit_invariants()?;
        self.current.dispose();
        let entered = MachineState::new(next, Arc::clone(&self.context))?;
        let result = entered.enter();
        self.current = entered;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{CommandKind, LaundryItem};

    fn slot() -> Arc<GuardedValue<StateSlot>> {
        Arc::new(GuardedValue::new(
            "state code",
            || StateSlot::new(Code::PoweredDown, 64),
            Duration::from_secs(1),
        ))
    }

    fn wait_for(slot: &GuardedValue<StateSlot>, code: Code) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if slot.lock_default().unwrap().query(StateSlot::code) == code {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn publishing_counts_and_records_changes() {
        let mut slot = StateSlot::new(Code::PoweredDown, 64);
        let change = slot.publish(Code::Activating);
        assert_eq!(change.change_count, 1);
        slot.publish(Code::Empty);
        assert_eq!(slot.code(), Code::Empty);
        assert_eq!(slot.change_count(), 2);
        assert_eq!(
            slot.history().get_path(),
            vec![&Code::PoweredDown, &Code::Activating, &Code::Empty]
        );
    }

    #[test]
    fn published_history_stays_within_capacity() {
        let mut slot = StateSlot::new(Code::Full, 4);
        for _ in 0..50 {
            slot.publish(Code::Washing);
            slot.publish(Code::Full);
        }
        assert_eq!(slot.change_count(), 100);
        assert_eq!(slot.history().changes().len(), 4);
        assert_eq!(slot.history().last().unwrap().change_count, 100);
        assert_eq!(slot.history().path_since(98), vec![&Code::Washing, &Code::Full]);
    }

    #[test]
    fn driver_powers_up_and_down() {
        let context = Arc::new(MachineContext::new(MachineConfig::fast()).unwrap());
        let slot = slot();
        let events = context.events().subscribe();
        let driver = Driver::start(Arc::clone(&slot), Arc::clone(&context)).unwrap();

        context
            .flags()
            .lock_default()
            .unwrap()
            .action(|f| assert!(f.register_power_on(Code::PoweredDown)));
        assert!(wait_for(&slot, Code::Empty));

        {
            let guard = slot.lock_default().unwrap();
            let code = guard.query(StateSlot::code);
            context
                .flags()
                .lock_default()
                .unwrap()
                .action(|f| assert!(f.register_shutdown(code)));
        }
        assert!(wait_for(&slot, Code::PoweredDown));

        driver.dispose(Duration::from_secs(5));
        assert!(driver.is_terminated());
        let path: Vec<Code> = slot
            .lock_default()
            .unwrap()
            .query(|s| s.history().get_path().into_iter().copied().collect());
        assert_eq!(
            path,
            vec![Code::PoweredDown, Code::Activating, Code::Empty, Code::PoweredDown]
        );

        context.dispose();
        let seen: Vec<MachineEvent> = events.try_iter().collect();
        assert!(seen.iter().any(|e| matches!(
            e,
            MachineEvent::StateChanged { old: Code::Activating, new: Code::Empty, change_count: 2, .. }
        )));
        assert!(seen.contains(&MachineEvent::Terminated {
            state: Code::PoweredDown
        }));
    }

    #[test]
    fn disposing_mid_wash_cancels_the_task() {
        let config = MachineConfig {
            soak_time_ms: 10_000,
            ..MachineConfig::fast()
        };
        let context = Arc::new(MachineContext::new(config).unwrap());
        let slot = Arc::new(GuardedValue::new(
            "state code",
            || StateSlot::new(Code::Full, 64),
            Duration::from_secs(1),
        ));
        context.flags().lock_default().unwrap().action(|f| {
            f.load_item(LaundryItem::new("rug", 150, 0));
            assert!(f.register_wash());
        });
        let driver = Driver::start(Arc::clone(&slot), Arc::clone(&context)).unwrap();
        assert!(wait_for(&slot, Code::Washing));

        let started = Instant::now();
        driver.dispose(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(5));
        let cancelled = context
            .flags()
            .lock_default()
            .unwrap()
            .query(|f| f.command_is(CommandKind::Wash, crate::status::CommandState::Cancelled));
        assert!(cancelled);
        context.dispose();
    }

    #[test]
    fn failed_entry_stops_the_driver() {
        let context = Arc::new(MachineContext::new(MachineConfig::fast()).unwrap());
        let slot = Arc::new(GuardedValue::new(
            "state code",
            || StateSlot::new(Code::Washing, 64),
            Duration::from_secs(1),
        ));
        let err = Driver::start(slot, Arc::clone(&context)).err().unwrap();
        assert!(matches!(
            err,
            MachineError::Invariant(InvariantError::EntryNotMet {
                state: Code::Washing,
                ..
            })
        ));
        context.dispose();
    }
}
