//! The concrete laundry machine states.
//!
//! A state is a [`LaundryMachineStateCode`] plus data: a priority-ordered
//! transition table, entry and exit invariants, and optionally the task it
//! runs while active. [`MachineState::new`] builds that data for a code.

use super::context::MachineContext;
use super::tasks::{self, PhaseTiming};
use crate::error::{fail_fast, InvariantError, MachineError, StatusError, VaultError};
use crate::events::MachineEvent;
use crate::executor::{ControlBlock, TaskCompletion, TaskHandle};
use crate::framework::{
    verify_invariants, BuildError, Evaluation, Invariant, Transition, TransitionBuilder,
    TransitionError, TransitionTable,
};
use crate::status::{
    CancelState, CommandKind, CommandState, ErrorState, LaundryMachineStateCode, LaundryStatusFlags,
    TaskResult, TaskResultCode,
};
use crate::vault::GuardedValue;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};

type Code = LaundryMachineStateCode;
type Flags = LaundryStatusFlags;
type Table = TransitionTable<Code, Flags, StateScope>;
type Builder = TransitionBuilder<Code, Flags, StateScope>;
type MachineTransition = Transition<Code, Flags, StateScope>;

/// What a state is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// No task runs; only external commands move the machine on.
    WaitForMoreInputOnly,
    /// Owns a running task and reacts to its completion or cancellation.
    WaitForTaskComplete,
    /// Powered down; only a power-up leaves it.
    Terminal,
    /// Needs outside intervention.
    Error,
}

impl StateKind {
    pub fn of(code: Code) -> Self {
        match code {
            Code::Empty | Code::Full => Self::WaitForMoreInputOnly,
            Code::Activating | Code::Washing | Code::Drying => Self::WaitForTaskComplete,
            Code::PoweredDown => Self::Terminal,
            Code::Error => Self::Error,
        }
    }
}

/// The task a task-owning state runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateTask {
    Activate,
    Wash,
    Dry,
}

impl StateTask {
    fn of(code: Code) -> Option<Self> {
        match code {
            Code::Activating => Some(Self::Activate),
            Code::Washing => Some(Self::Wash),
            Code::Drying => Some(Self::Dry),
            _ => None,
        }
    }

    fn command(self) -> CommandKind {
        match self {
            Self::Activate => CommandKind::PowerUp,
            Self::Wash => CommandKind::Wash,
            Self::Dry => CommandKind::Dry,
        }
    }
}

/// Per-activation data handed to transition procedures.
pub(crate) struct StateScope {
    code: Code,
    context: Arc<MachineContext>,
    task: OnceLock<TaskHandle>,
}

impl StateScope {
    fn cancel_task(&self) -> bool {
        match self.task.get() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }
}

/// One activation of a machine state.
pub(crate) struct MachineState {
    kind: StateKind,
    table: Table,
    entry: Vec<Invariant<Flags>>,
    exit: Vec<Invariant<Flags>>,
    task: Option<StateTask>,
    scope: StateScope,
    disposed: bool,
}

impl MachineState {
    pub(crate) fn new(code: Code, context: Arc<MachineContext>) -> Result<Self, MachineError> {
        let table = match code {
            Code::PoweredDown => powered_down_table()?,
            Code::Activating => activating_table()?,
            Code::Empty => empty_table()?,
            Code::Full => full_table()?,
            Code::Washing => washing_table()?,
            Code::Drying => drying_table()?,
            Code::Error => error_table()?,
        };
        Ok(Self {
            kind: StateKind::of(code),
            table,
            entry: entry_invariants(code),
            exit: exit_invariants(code),
            task: StateTask::of(code),
            scope: StateScope {
                code,
                context,
                task: OnceLock::new(),
            },
            disposed: false,
        })
    }

    pub(crate) fn code(&self) -> Code {
        self.scope.code
    }

    pub(crate) fn kind(&self) -> StateKind {
        self.kind
    }

    /// Validate entry invariants, then start the state's task if it has one.
    pub(crate) fn enter(&self) -> Result<(), MachineError> {
        self.validate_entry_invariants()?;
        self.begin()
    }

    pub(crate) fn validate_entry_invariants(&self) -> Result<(), MachineError> {
        let verdict = self.flags().lock_default()?.query(|f| verify_invariants(&self.entry, f));
        verdict.map_err(|description| {
            InvariantError::EntryNotMet {
                state: self.code(),
                description,
            }
            .into()
        })
    }

    /// Acknowledge the state's command and queue its task, waiting until the
    /// worker has picked it up.
    pub(crate) fn begin(&self) -> Result<(), MachineError> {
        let Some(task) = self.task else {
            return Ok(());
        };
        let command = task.command();
        let code = self.code();
        let acknowledged = self.flags().lock_default()?.mixed(|f| match task {
            StateTask::Activate => f.acknowledge_power_up_pending(code),
            StateTask::Wash | StateTask::Dry => f.acknowledge_my_task(command),
        });
        if !acknowledged {
            return Err(StatusError::StateLogic(format!(
                "{code} could not acknowledge its {command} command"
            ))
            .into());
        }

        let context = &self.scope.context;
        let handle = context.executor().enqueue(self.control_block(task))?;
        let timeout = context.config().max_time_to_start();
        let started = handle.wait_started(timeout);
        let _ = self.scope.task.set(handle);
        if !started {
            return Err(MachineError::TaskTimeout {
                action: "start",
                timeout,
            });
        }
        debug!(state = %code, command = %command, "state task started");
        Ok(())
    }

    /// Evaluate the transition table once. Returns the state to move to.
    ///
    /// Timeouts and ordinary procedure failures count as "nothing fired".
    /// Logic errors abort the process.
    pub(crate) fn find_and_execute_possible_transition(&self, timeout: Duration) -> Option<Code> {
        let code = self.code();
        let context = &self.scope.context;
        match self.table.evaluate(context.flags(), timeout, &self.scope) {
            Evaluation::NoneFired => None,
            Evaluation::Fired {
                transition,
                priority,
                next,
            } => {
                debug!(state = %code, transition = %transition, priority, ?next, "transition fired");
                context.publish(MachineEvent::TransitionPredicateTrue {
                    state: code,
                    transition,
                    priority,
                });
                next
            }
            Evaluation::TimedOut(err) => {
                if let VaultError::TimedOut { resource, timeout } = err {
                    context.publish(MachineEvent::AccessTimedOut { resource, timeout });
                }
                None
            }
            Evaluation::Unavailable(err) => {
                debug!(state = %code, error = %err, "status unavailable");
                None
            }
            Evaluation::Failed { transition, error } if error.is_defect() => fail_fast(&format!(
                "transition '{transition}' of {code} hit a defect: {error}"
            )),
            Evaluation::Failed { transition, error } => {
                error!(state = %code, transition = %transition, error = %error, "transition failed");
                None
            }
            Evaluation::Panicked(message) => {
                error!(state = %code, panic = %message, "transition evaluation panicked");
                None
            }
        }
    }

    /// Wait for the state's task to report, then check exit invariants.
    pub(crate) fn establish_exit_invariants(&self) -> Result<(), MachineError> {
        if let Some(handle) = self.scope.task.get() {
            let timeout = self.scope.context.config().max_time_to_stop();
            if !handle.wait_finished(timeout) {
                return Err(MachineError::TaskTimeout {
                    action: "stop",
                    timeout,
                });
            }
        }
        let verdict = self.flags().lock_default()?.query(|f| verify_invariants(&self.exit, f));
        verdict.map_err(|description| {
            InvariantError::ExitNotMet {
                state: self.code(),
                description,
            }
            .into()
        })
    }

    /// Cancel a task that is still running and wait for it to report.
    ///
    /// Aborts the process if the task does not stop in time. Idempotent.
    pub(crate) fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(handle) = self.scope.task.get() {
            if !handle.is_finished() {
                handle.cancel();
                let timeout = self.scope.context.config().max_time_to_stop();
                if !handle.wait_finished(timeout) {
                    fail_fast(&format!(
                        "task '{}' of {} did not stop within {timeout:?}",
                        handle.name(),
                        self.code()
                    ));
                }
            }
        }
        debug!(state = %self.code(), "state disposed");
    }

    fn flags(&self) -> &GuardedValue<Flags> {
        self.scope.context.flags()
    }

    fn control_block(&self, task: StateTask) -> ControlBlock {
        let context = &self.scope.context;
        let config = context.config();
        let weak = Arc::downgrade(context);
        let timing = |duration| PhaseTiming {
            duration,
            check_interval: config.cancellation_check_interval(),
        };
        let command = task.command();
        let on_complete = record_completion(Weak::clone(&weak), command);
        match task {
            StateTask::Activate => ControlBlock::new(
                "activate",
                tasks::activate(weak, timing(config.activation_time())),
                on_complete,
            ),
            StateTask::Wash => ControlBlock::new(
                "wash",
                tasks::wash(weak, timing(config.soak_time()), timing(config.cleanse_time())),
                on_complete,
            ),
            StateTask::Dry => ControlBlock::new(
                "dry",
                tasks::dry(weak, timing(config.dry_time())),
                on_complete,
            ),
        }
    }
}

impl Drop for MachineState {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineState")
            .field("code", &self.code())
            .field("kind", &self.kind)
            .field("transitions", &self.table.len())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

// ---- task completion ----

/// Callback that records a task's result on the aggregate.
fn record_completion(
    context: Weak<MachineContext>,
    command: CommandKind,
) -> impl FnOnce(TaskCompletion) + Send + 'static {
    move |done: TaskCompletion| {
        let Some(context) = context.upgrade() else {
            return;
        };
        let recorded = context
            .flags()
            .lock_default()
            .map(|mut guard| guard.mixed(|f| apply_result(f, command, &done.result)));
        match recorded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => fail_fast(&format!("could not record {command} result: {e}")),
            Err(e) => {
                error!(command = %command, error = %e, "task result lost");
                context.publish(MachineEvent::UnexpectedFault {
                    state: None,
                    description: format!("{command} result could not be recorded: {e}"),
                });
            }
        }
    }
}

fn apply_result(f: &mut Flags, command: CommandKind, result: &TaskResult) -> Result<(), StatusError> {
    let explanation = result.explanation();
    match result.code() {
        TaskResultCode::Success => f.complete_my_status(command, explanation),
        TaskResultCode::Cancelled => {
            // Cancelled without a request on record, e.g. at teardown.
            if f.command_is(command, CommandState::Pending) && !f.register_cancel_current_task() {
                return Err(StatusError::StateLogic(format!(
                    "{command} was cancelled but no cancellation could be recorded"
                )));
            }
            f.cancel_my_status(command, explanation)?;
            if f.cancel_is(CancelState::Requested) {
                f.register_cancellation_pending();
            }
            f.register_cancellation_complete();
            Ok(())
        }
        TaskResultCode::Failed | TaskResultCode::ErrorUnknown => {
            f.fail_my_status(command, explanation)?;
            if !f.register_error(explanation, false) {
                warn!(command = %command, "an error was already registered");
            }
            Ok(())
        }
        TaskResultCode::NotStarted | TaskResultCode::StillPending => Err(StatusError::StateLogic(
            format!("{command} reported a non-terminal result"),
        )),
    }
}

// ---- invariants ----

fn no_command_current(f: &Flags) -> bool {
    f.current_command().is_none()
}

fn no_command_in_flight(f: &Flags) -> bool {
    CommandKind::ALL.iter().all(|kind| {
        !f.command_is(*kind, CommandState::Pending)
            && !f.command_is(*kind, CommandState::CancellationRequested)
    })
}

fn entry_invariants(code: Code) -> Vec<Invariant<Flags>> {
    match code {
        Code::PoweredDown => vec![
            Invariant::new("no command is current", no_command_current),
            Invariant::new("power-up is idle", |f: &Flags| f.command(CommandKind::PowerUp).is_nil()),
            Invariant::new("shutdown is idle", |f: &Flags| f.command(CommandKind::Shutdown).is_nil()),
        ],
        Code::Activating => vec![
            Invariant::new("power-up is the current command", |f: &Flags| {
                f.is_current(CommandKind::PowerUp)
            }),
            Invariant::new("power-up is requested", |f: &Flags| {
                f.command_is(CommandKind::PowerUp, CommandState::Requested)
            }),
        ],
        Code::Empty => vec![
            Invariant::new("drum is empty", |f: &Flags| !f.is_loaded()),
            Invariant::new("no command is in flight", no_command_in_flight),
        ],
        Code::Full => vec![
            Invariant::new("laundry is loaded", Flags::is_loaded),
            Invariant::new("no command is in flight", no_command_in_flight),
        ],
        Code::Washing => task_entry(CommandKind::Wash),
        Code::Drying => task_entry(CommandKind::Dry),
        Code::Error => vec![
            Invariant::new("an error is registered", |f: &Flags| f.error_is(ErrorState::Registered)),
            Invariant::new("no command is current", no_command_current),
        ],
    }
}

fn task_entry(command: CommandKind) -> Vec<Invariant<Flags>> {
    vec![
        Invariant::new(format!("{command} is the current command"), move |f: &Flags| {
            f.is_current(command)
        }),
        Invariant::new(format!("{command} is requested"), move |f: &Flags| {
            f.command_is(command, CommandState::Requested)
        }),
        Invariant::new("laundry is loaded", Flags::is_loaded),
    ]
}

fn exit_invariants(code: Code) -> Vec<Invariant<Flags>> {
    match code {
        Code::PoweredDown => vec![Invariant::new("power-up is the current command", |f: &Flags| {
            f.is_current(CommandKind::PowerUp)
        })],
        Code::Activating => task_exit(CommandKind::PowerUp),
        Code::Washing => task_exit(CommandKind::Wash),
        Code::Drying => task_exit(CommandKind::Dry),
        Code::Empty | Code::Full => {
            vec![Invariant::new("no command is in flight", no_command_in_flight)]
        }
        Code::Error => vec![Invariant::new("shutdown is idle", |f: &Flags| {
            f.command(CommandKind::Shutdown).is_nil()
        })],
    }
}

fn task_exit(command: CommandKind) -> Vec<Invariant<Flags>> {
    vec![
        Invariant::new(format!("{command} is idle"), move |f: &Flags| f.command(command).is_nil()),
        Invariant::new("cancellation is idle", |f: &Flags| f.cancel_is(CancelState::Nil)),
    ]
}

// ---- transition tables ----

fn shutdown_requested(f: &Flags) -> bool {
    f.command_is(CommandKind::Shutdown, CommandState::Requested)
}

/// The cancellation of a finished task has been fully recorded.
fn cancellation_settled(f: &Flags) -> bool {
    f.cancel_is(CancelState::Complete) || f.cancel_is(CancelState::Nil)
}

/// Walk a cancellation the task finished before observing through Pending
/// to Complete. Returns whether a cancellation had been requested.
fn settle_late_cancellation(f: &mut Flags) -> Result<bool, StatusError> {
    if f.cancel_is(CancelState::Nil) {
        return Ok(false);
    }
    if f.cancel_is(CancelState::Requested) && !f.register_cancellation_pending() {
        return Err(StatusError::StateLogic(
            "late cancellation could not be marked pending".to_string(),
        ));
    }
    if f.cancel_is(CancelState::Pending) && !f.register_cancellation_complete() {
        return Err(StatusError::StateLogic(
            "late cancellation could not be completed".to_string(),
        ));
    }
    debug!("cancellation arrived after the task finished");
    Ok(true)
}

fn power_down(origin: Code, priority: u32) -> Result<MachineTransition, BuildError> {
    Builder::new("power down")
        .from(origin)
        .priority(priority)
        .to(Code::PoweredDown)
        .when(shutdown_requested)
        .execute(|f, _| {
            f.execute_shutdown("powered down")?;
            Ok(Some(Code::PoweredDown))
        })
        .build()
}

/// Priority 0 of every task-owning state: forward a cancellation request to
/// the running task.
fn forward_cancellation(origin: Code, command: CommandKind) -> Result<MachineTransition, BuildError> {
    Builder::new(format!("{command} cancellation requested"))
        .from(origin)
        .priority(0)
        .when(move |f| {
            f.is_current(command)
                && f.command_is(command, CommandState::CancellationRequested)
                && f.cancel_is(CancelState::Requested)
        })
        .execute(|f, scope| {
            if !scope.cancel_task() {
                return Err(TransitionError::Fault(format!(
                    "{} has no running task to cancel",
                    scope.code
                )));
            }
            if !f.register_cancellation_pending() {
                return Err(StatusError::StateLogic(
                    "cancellation could not be marked pending".to_string(),
                )
                .into());
            }
            Ok(None)
        })
        .build()
}

fn powered_down_table() -> Result<Table, BuildError> {
    Table::new(Code::PoweredDown).with(
        Builder::new("power up requested")
            .from(Code::PoweredDown)
            .priority(0)
            .when(|f| {
                f.is_current(CommandKind::PowerUp)
                    && f.command_is(CommandKind::PowerUp, CommandState::Requested)
            })
            .goes_to(Code::Activating)
            .build()?,
    )
}

fn activating_table() -> Result<Table, BuildError> {
    const POWER_UP: CommandKind = CommandKind::PowerUp;
    Table::new(Code::Activating)
        .with(forward_cancellation(Code::Activating, POWER_UP)?)?
        .with(
            Builder::new("activation complete")
                .from(Code::Activating)
                .priority(1)
                .to(Code::Empty)
                .to(Code::Full)
                .when(|f| f.command_is(POWER_UP, CommandState::Completed))
                .execute(|f, _| {
                    settle_late_cancellation(f)?;
                    f.reset_my_status_and_any_cancellation(POWER_UP)?;
                    Ok(Some(if f.is_loaded() { Code::Full } else { Code::Empty }))
                })
                .build()?,
        )?
        .with(
            Builder::new("activation cancelled")
                .from(Code::Activating)
                .priority(2)
                .to(Code::PoweredDown)
                .when(|f| f.command_is(POWER_UP, CommandState::Cancelled) && cancellation_settled(f))
                .execute(|f, _| {
                    f.reset_my_status_and_any_cancellation(POWER_UP)?;
                    f.execute_shutdown("powered down during activation")?;
                    Ok(Some(Code::PoweredDown))
                })
                .build()?,
        )?
        .with(
            Builder::new("activation faulted")
                .from(Code::Activating)
                .priority(3)
                .to(Code::Error)
                .when(|f| f.command_is(POWER_UP, CommandState::Faulted))
                .execute(|f, _| {
                    f.reset_my_status_and_any_cancellation(POWER_UP)?;
                    Ok(Some(Code::Error))
                })
                .build()?,
        )
}

fn empty_table() -> Result<Table, BuildError> {
    Table::new(Code::Empty)
        .with(power_down(Code::Empty, 0)?)?
        .with(
            Builder::new("laundry loaded")
                .from(Code::Empty)
                .priority(1)
                .when(Flags::is_loaded)
                .goes_to(Code::Full)
                .build()?,
        )
}

fn full_table() -> Result<Table, BuildError> {
    Table::new(Code::Full)
        .with(power_down(Code::Full, 0)?)?
        .with(
            Builder::new("laundry removed")
                .from(Code::Full)
                .priority(1)
                .when(|f| !f.is_loaded())
                .goes_to(Code::Empty)
                .build()?,
        )?
        .with(
            Builder::new("wash requested")
                .from(Code::Full)
                .priority(2)
                .when(|f| {
                    f.is_current(CommandKind::Wash)
                        && f.command_is(CommandKind::Wash, CommandState::Requested)
                })
                .goes_to(Code::Washing)
                .build()?,
        )?
        .with(
            Builder::new("dry requested")
                .from(Code::Full)
                .priority(3)
                .when(|f| {
                    f.is_current(CommandKind::Dry)
                        && f.command_is(CommandKind::Dry, CommandState::Requested)
                })
                .goes_to(Code::Drying)
                .build()?,
        )
}

fn washing_table() -> Result<Table, BuildError> {
    const WASH: CommandKind = CommandKind::Wash;
    const DRY: CommandKind = CommandKind::Dry;
    Table::new(Code::Washing)
        .with(forward_cancellation(Code::Washing, WASH)?)?
        .with(
            Builder::new("wash complete")
                .from(Code::Washing)
                .priority(1)
                .to(Code::Full)
                .to(Code::Drying)
                .when(|f| f.command_is(WASH, CommandState::Completed))
                .execute(|f, _| {
                    let aborted = settle_late_cancellation(f)?;
                    f.reset_my_status_and_any_cancellation(WASH)?;
                    if !f.command_is(DRY, CommandState::Requested) {
                        return Ok(Some(Code::Full));
                    }
                    if aborted || shutdown_requested(f) {
                        f.cancel_queued(DRY, "wash cycle stopped")?;
                        return Ok(Some(Code::Full));
                    }
                    if !f.promote(DRY) {
                        return Err(StatusError::StateLogic(
                            "queued dry could not be promoted".to_string(),
                        )
                        .into());
                    }
                    Ok(Some(Code::Drying))
                })
                .build()?,
        )?
        .with(
            Builder::new("wash cancelled")
                .from(Code::Washing)
                .priority(2)
                .to(Code::Full)
                .when(|f| f.command_is(WASH, CommandState::Cancelled) && cancellation_settled(f))
                .execute(|f, _| {
                    f.reset_my_status_and_any_cancellation(WASH)?;
                    if f.command_is(DRY, CommandState::Requested) {
                        f.cancel_queued(DRY, "wash cancelled")?;
                    }
                    Ok(Some(Code::Full))
                })
                .build()?,
        )?
        .with(
            Builder::new("wash faulted")
                .from(Code::Washing)
                .priority(3)
                .to(Code::Error)
                .when(|f| f.command_is(WASH, CommandState::Faulted))
                .execute(|f, _| {
                    f.reset_my_status_and_any_cancellation(WASH)?;
                    if f.command_is(DRY, CommandState::Requested) {
                        f.cancel_queued(DRY, "wash faulted")?;
                    }
                    Ok(Some(Code::Error))
                })
                .build()?,
        )
}

fn drying_table() -> Result<Table, BuildError> {
    const DRY: CommandKind = CommandKind::Dry;
    Table::new(Code::Drying)
        .with(forward_cancellation(Code::Drying, DRY)?)?
        .with(
            Builder::new("dry complete")
                .from(Code::Drying)
                .priority(1)
                .to(Code::Full)
                .when(|f| f.command_is(DRY, CommandState::Completed))
                .execute(|f, _| {
                    settle_late_cancellation(f)?;
                    f.reset_my_status_and_any_cancellation(DRY)?;
                    Ok(Some(Code::Full))
                })
                .build()?,
        )?
        .with(
            Builder::new("dry cancelled")
                .from(Code::Drying)
                .priority(2)
                .to(Code::Full)
                .when(|f| f.command_is(DRY, CommandState::Cancelled) && cancellation_settled(f))
                .execute(|f, _| {
                    f.reset_my_status_and_any_cancellation(DRY)?;
                    Ok(Some(Code::Full))
                })
                .build()?,
        )?
        .with(
            Builder::new("dry faulted")
                .from(Code::Drying)
                .priority(3)
                .to(Code::Error)
                .when(|f| f.command_is(DRY, CommandState::Faulted))
                .execute(|f, _| {
                    f.reset_my_status_and_any_cancellation(DRY)?;
                    Ok(Some(Code::Error))
                })
                .build()?,
        )
}

/// Shutdown is the only way out of Error. A recoverable error is processed
/// on the way down; a logic error stays registered and blocks power-up.
fn error_table() -> Result<Table, BuildError> {
    Table::new(Code::Error).with(
        Builder::new("power down")
            .from(Code::Error)
            .priority(0)
            .to(Code::PoweredDown)
            .when(shutdown_requested)
            .execute(|f, _| {
                if !f.error_status().is_logic_error() && !f.process_error("processed at shutdown") {
                    return Err(StatusError::StateLogic(
                        "registered error could not be processed".to_string(),
                    )
                    .into());
                }
                f.execute_shutdown("powered down from error")?;
                Ok(Some(Code::PoweredDown))
            })
            .build()?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::status::LaundryItem;

    fn context() -> Arc<MachineContext> {
        Arc::new(MachineContext::new(MachineConfig::fast()).unwrap())
    }

    fn state(code: Code, context: &Arc<MachineContext>) -> MachineState {
        MachineState::new(code, Arc::clone(context)).unwrap()
    }

    fn with_flags<R>(context: &MachineContext, f: impl FnOnce(&mut Flags) -> R) -> R {
        context.flags().lock_default().unwrap().mixed(f)
    }

    fn step(state: &MachineState) -> Option<Code> {
        state.find_and_execute_possible_transition(Duration::from_millis(100))
    }

    /// Poll until the state's table fires a change.
    fn step_until_change(state: &MachineState) -> Code {
        for _ in 0..2_000 {
            if let Some(next) = step(state) {
                return next;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("no transition fired for {}", state.code());
    }

    #[test]
    fn every_code_builds_a_state() {
        let context = context();
        for code in Code::ALL {
            let state = state(code, &context);
            assert_eq!(state.code(), code);
            assert_eq!(state.kind(), StateKind::of(code));
        }
    }

    #[test]
    fn table_destinations_match_the_state_graph() {
        assert_eq!(powered_down_table().unwrap().destinations(), vec![Code::Activating]);
        assert_eq!(empty_table().unwrap().destinations(), vec![Code::PoweredDown, Code::Full]);
        assert_eq!(
            full_table().unwrap().destinations(),
            vec![Code::PoweredDown, Code::Empty, Code::Washing, Code::Drying]
        );
        assert_eq!(
            washing_table().unwrap().destinations(),
            vec![Code::Full, Code::Drying, Code::Error]
        );
        assert_eq!(error_table().unwrap().destinations(), vec![Code::PoweredDown]);
    }

    #[test]
    fn powered_down_moves_to_activating_on_power_up() {
        let context = context();
        let state = state(Code::PoweredDown, &context);
        state.enter().unwrap();
        assert_eq!(step(&state), None);

        with_flags(&context, |f| assert!(f.register_power_on(Code::PoweredDown)));
        assert_eq!(step(&state), Some(Code::Activating));
        state.establish_exit_invariants().unwrap();
    }

    #[test]
    fn full_prefers_power_down_over_washing() {
        let context = context();
        with_flags(&context, |f| {
            f.load_item(LaundryItem::new("sheet", 50, 0));
            assert!(f.register_wash());
            assert!(f.register_shutdown(Code::Full));
        });
        let state = state(Code::Full, &context);
        assert_eq!(step(&state), Some(Code::PoweredDown));
        with_flags(&context, |f| {
            assert!(f.command(CommandKind::Wash).is_nil());
            assert!(f.current_command().is_none());
        });
    }

    #[test]
    fn washing_requires_a_requested_wash() {
        let context = context();
        with_flags(&context, |f| {
            f.load_item(LaundryItem::new("sheet", 50, 0));
        });
        let err = state(Code::Washing, &context).enter().unwrap_err();
        match err {
            MachineError::Invariant(InvariantError::EntryNotMet { state, description }) => {
                assert_eq!(state, Code::Washing);
                assert!(description.contains("Wash is the current command"));
                assert!(description.contains("Wash is requested"));
            }
            other => panic!("expected entry violation, got {other:?}"),
        }
    }

    #[test]
    fn wash_then_queued_dry_runs_through_drying() {
        let context = context();
        with_flags(&context, |f| {
            f.load_item(LaundryItem::new("jeans", 200, 40));
            assert!(f.register_wash_dry());
        });

        let washing = state(Code::Washing, &context);
        washing.enter().unwrap();
        assert_eq!(step_until_change(&washing), Code::Drying);
        washing.establish_exit_invariants().unwrap();

        let drying = state(Code::Drying, &context);
        drying.enter().unwrap();
        assert_eq!(step_until_change(&drying), Code::Full);
        drying.establish_exit_invariants().unwrap();

        let item = with_flags(&context, |f| f.loaded_item().cloned()).unwrap();
        assert!(item.is_clean());
        assert!(item.is_dry());
    }

    #[test]
    fn cancelled_wash_returns_to_full_and_drops_queued_dry() {
        let config = MachineConfig {
            soak_time_ms: 5_000,
            ..MachineConfig::fast()
        };
        let context = Arc::new(MachineContext::new(config).unwrap());
        with_flags(&context, |f| {
            f.load_item(LaundryItem::new("towel", 90, 0));
            assert!(f.register_wash_dry());
        });
        let washing = state(Code::Washing, &context);
        washing.enter().unwrap();

        with_flags(&context, |f| assert!(f.register_cancel_current_task()));
        assert_eq!(step(&washing), None);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !with_flags(&context, |f| f.command_is(CommandKind::Wash, CommandState::Cancelled)) {
            assert!(std::time::Instant::now() < deadline, "wash task never reported");
            std::thread::sleep(Duration::from_millis(1));
        }
        with_flags(&context, |f| assert!(f.cancel_is(CancelState::Complete)));

        assert_eq!(step_until_change(&washing), Code::Full);
        washing.establish_exit_invariants().unwrap();
        with_flags(&context, |f| {
            assert!(f.is_quiescent());
            assert_eq!(f.loaded_item().unwrap().soiled_factor(), 90);
        });
    }

    #[test]
    fn abort_overtaken_by_wash_completion_still_drops_queued_dry() {
        let context = context();
        let washing = state(Code::Washing, &context);
        with_flags(&context, |f| {
            f.load_item(LaundryItem::new("towel", 90, 0));
            assert!(f.register_wash_dry());
            assert!(f.acknowledge_my_task(CommandKind::Wash));
            assert!(f.register_cancel_current_task());
            f.complete_my_status(CommandKind::Wash, "finished first").unwrap();
        });

        assert_eq!(step(&washing), Some(Code::Full));
        with_flags(&context, |f| {
            assert!(f.command(CommandKind::Dry).is_nil());
            assert!(f.is_quiescent());
        });
    }

    #[test]
    fn abort_overtaken_by_dry_completion_returns_to_full() {
        let context = context();
        let drying = state(Code::Drying, &context);
        with_flags(&context, |f| {
            f.load_item(LaundryItem::new("sheet", 0, 80));
            assert!(f.register_dry());
            assert!(f.acknowledge_my_task(CommandKind::Dry));
            assert!(f.register_cancel_current_task());
            f.complete_my_status(CommandKind::Dry, "finished first").unwrap();
        });

        assert_eq!(step(&drying), Some(Code::Full));
        with_flags(&context, |f| assert!(f.is_quiescent()));
    }

    #[test]
    fn late_cancellation_is_walked_to_complete() {
        let mut flags = Flags::new();
        assert!(!settle_late_cancellation(&mut flags).unwrap());

        flags.load_item(LaundryItem::new("sheet", 0, 80));
        assert!(flags.register_dry());
        assert!(flags.acknowledge_my_task(CommandKind::Dry));
        assert!(flags.register_cancel_current_task());
        assert!(settle_late_cancellation(&mut flags).unwrap());
        assert!(flags.cancel_is(CancelState::Complete));

        assert!(settle_late_cancellation(&mut flags).unwrap());
        assert!(flags.cancel_is(CancelState::Complete));
    }

    #[test]
    fn failed_activation_registers_an_error_and_lands_in_error() {
        let config = MachineConfig {
            fault_probability: 1.0,
            rng_seed: Some(5),
            ..MachineConfig::fast()
        };
        let context = Arc::new(MachineContext::new(config).unwrap());
        with_flags(&context, |f| assert!(f.register_power_on(Code::PoweredDown)));
        let activating = state(Code::Activating, &context);
        activating.enter().unwrap();
        assert_eq!(step_until_change(&activating), Code::Error);
        activating.establish_exit_invariants().unwrap();

        let error = state(Code::Error, &context);
        error.enter().unwrap();
        with_flags(&context, |f| assert!(f.register_shutdown(Code::Error)));
        assert_eq!(step(&error), Some(Code::PoweredDown));
        with_flags(&context, |f| {
            assert!(f.error_is(ErrorState::Processed));
            assert!(f.command(CommandKind::Shutdown).is_nil());
        });
    }

    #[test]
    fn disposing_a_running_state_cancels_its_task() {
        let config = MachineConfig {
            dry_time_ms: 5_000,
            ..MachineConfig::fast()
        };
        let context = Arc::new(MachineContext::new(config).unwrap());
        with_flags(&context, |f| {
            f.load_item(LaundryItem::new("coat", 0, 200));
            assert!(f.register_dry());
        });
        let mut drying = state(Code::Drying, &context);
        drying.enter().unwrap();
        drying.dispose();

        with_flags(&context, |f| {
            assert!(f.command_is(CommandKind::Dry, CommandState::Cancelled));
            assert!(f.cancel_is(CancelState::Complete));
        });
    }

    #[test]
    fn logic_error_blocks_power_up_after_shutdown() {
        let context = context();
        with_flags(&context, |f| assert!(f.register_error("impossible state", true)));
        let error = state(Code::Error, &context);
        error.enter().unwrap();
        with_flags(&context, |f| assert!(f.register_shutdown(Code::Error)));
        assert_eq!(step(&error), Some(Code::PoweredDown));
        with_flags(&context, |f| {
            assert!(f.error_is(ErrorState::Registered));
            assert!(!f.register_power_on(Code::PoweredDown));
        });
    }
}
