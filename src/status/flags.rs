//! The laundry machine's shared status aggregate.
//!
//! Every method here is meant to run under one acquisition of the aggregate
//! vault, which makes each call atomic with respect to the driver, the task
//! worker and external callers.
//!
//! Precondition failures return `false`/`None`. Calls that only a machine
//! state makes on its own command return `Result` and fail with
//! [`StatusError::StateLogic`] when the command is not the current one.

use super::cancel_flag::{CancelFlag, CancelState};
use super::code::{CommandKind, LaundryMachineStateCode};
use super::command::{CommandRequestStatus, CommandState};
use super::error_status::{ErrorRegistrationStatus, ErrorState};
use super::item::LaundryItem;
use crate::error::StatusError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaundryStatusFlags {
    loaded: Option<LaundryItem>,
    power_up: CommandRequestStatus,
    shutdown: CommandRequestStatus,
    wash: CommandRequestStatus,
    dry: CommandRequestStatus,
    cancel: CancelFlag,
    error: ErrorRegistrationStatus,
    current: Option<CommandKind>,
}

impl Default for LaundryStatusFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl LaundryStatusFlags {
    pub fn new() -> Self {
        Self {
            loaded: None,
            power_up: CommandRequestStatus::new(CommandKind::PowerUp),
            shutdown: CommandRequestStatus::new(CommandKind::Shutdown),
            wash: CommandRequestStatus::new(CommandKind::Wash),
            dry: CommandRequestStatus::new(CommandKind::Dry),
            cancel: CancelFlag::new(),
            error: ErrorRegistrationStatus::new(),
            current: None,
        }
    }

    // ---- queries ----

    pub fn loaded_item(&self) -> Option<&LaundryItem> {
        self.loaded.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn command(&self, kind: CommandKind) -> &CommandRequestStatus {
        match kind {
            CommandKind::PowerUp => &self.power_up,
            CommandKind::Shutdown => &self.shutdown,
            CommandKind::Wash => &self.wash,
            CommandKind::Dry => &self.dry,
        }
    }

    pub fn command_is(&self, kind: CommandKind, state: CommandState) -> bool {
        self.command(kind).is(state)
    }

    pub fn current_command(&self) -> Option<CommandKind> {
        self.current
    }

    pub fn is_current(&self, kind: CommandKind) -> bool {
        self.current == Some(kind)
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn cancel_is(&self, state: CancelState) -> bool {
        self.cancel.is(state)
    }

    pub fn error_status(&self) -> &ErrorRegistrationStatus {
        &self.error
    }

    pub fn error_is(&self, state: ErrorState) -> bool {
        self.error.is(state)
    }

    /// No command is current and every command, cancel and error flag is Nil.
    pub fn is_quiescent(&self) -> bool {
        self.current.is_none()
            && CommandKind::ALL.iter().all(|k| self.command(*k).is_nil())
            && self.cancel.is_nil()
            && self.error.is_nil()
    }

    // ---- power ----

    /// Request power-up. Only legal from PoweredDown, with no current
    /// command and no error sitting in the Registered state.
    pub fn register_power_on(&mut self, state: LaundryMachineStateCode) -> bool {
        if self.current.is_some()
            || state != LaundryMachineStateCode::PoweredDown
            || self.error.is(ErrorState::Registered)
            || !self.power_up.is_nil()
            || !self.shutdown.is_nil()
        {
            return false;
        }
        self.request_current(CommandKind::PowerUp)
    }

    /// Requested -> Pending for the power-up command.
    ///
    /// Accepted only while the machine is Activating or still PoweredDown.
    /// The state check is combined with the command check by `&&`; joining
    /// them with `||` would accept every state and is a latent defect.
    pub fn acknowledge_power_up_pending(&mut self, state: LaundryMachineStateCode) -> bool {
        let in_power_up_window = matches!(
            state,
            LaundryMachineStateCode::Activating | LaundryMachineStateCode::PoweredDown
        );
        in_power_up_window && self.acknowledge_my_task(CommandKind::PowerUp)
    }

    /// Request shutdown. A running task is asked to cancel at the same time.
    pub fn register_shutdown(&mut self, state: LaundryMachineStateCode) -> bool {
        if state == LaundryMachineStateCode::PoweredDown || !self.shutdown.is_nil() {
            return false;
        }
        if self.shutdown.request().is_err() {
            return false;
        }
        if state.runs_task() {
            self.register_cancel_current_task();
        }
        true
    }

    /// Carry out a requested shutdown: cancel whatever command is merely
    /// requested, then walk Shutdown through Pending -> Completed -> Nil.
    ///
    /// Returns `Ok(false)` when no shutdown was requested.
    pub fn execute_shutdown(&mut self, explanation: &str) -> Result<bool, StatusError> {
        if !self.shutdown.is(CommandState::Requested) {
            return Ok(false);
        }
        if let Some(current) = self.current {
            if current != CommandKind::Shutdown {
                self.cancel_queued(current, explanation)?;
            }
        }
        for queued in [CommandKind::Wash, CommandKind::Dry] {
            if self.command_is(queued, CommandState::Requested) {
                self.cancel_queued(queued, explanation)?;
            }
        }
        self.current = Some(CommandKind::Shutdown);
        if !self.acknowledge_my_task(CommandKind::Shutdown) {
            return Err(StatusError::StateLogic(
                "shutdown could not be acknowledged".to_string(),
            ));
        }
        self.complete_my_status(CommandKind::Shutdown, explanation)?;
        self.reset_my_status_and_any_cancellation(CommandKind::Shutdown)?;
        Ok(true)
    }

    // ---- wash / dry ----

    pub fn register_wash(&mut self) -> bool {
        self.is_loaded() && self.is_quiescent() && self.request_current(CommandKind::Wash)
    }

    pub fn register_dry(&mut self) -> bool {
        self.is_loaded() && self.is_quiescent() && self.request_current(CommandKind::Dry)
    }

    /// Request both; Wash becomes current and Dry waits as queued.
    pub fn register_wash_dry(&mut self) -> bool {
        if !self.is_loaded() || !self.is_quiescent() {
            return false;
        }
        if self.dry.request().is_err() {
            return false;
        }
        self.request_current(CommandKind::Wash)
    }

    /// Make a queued, requested command current. Fails if another command
    /// is still current.
    pub fn promote(&mut self, kind: CommandKind) -> bool {
        if self.current.is_some() || !self.command_is(kind, CommandState::Requested) {
            return false;
        }
        self.current = Some(kind);
        true
    }

    /// Requested -> Cancelled -> Nil for a command that never started.
    pub fn cancel_queued(&mut self, kind: CommandKind, explanation: &str) -> Result<(), StatusError> {
        let status = self.command_mut(kind);
        status.cancel(explanation)?;
        status.reset(false)?;
        if self.current == Some(kind) {
            self.current = None;
        }
        Ok(())
    }

    // ---- task lifecycle ----

    /// Requested -> Pending for the command a state claims as its own.
    pub fn acknowledge_my_task(&mut self, kind: CommandKind) -> bool {
        if self.current != Some(kind) {
            return false;
        }
        self.command_mut(kind).acknowledge().is_ok()
    }

    /// Ask the current, pending command to cancel.
    pub fn register_cancel_current_task(&mut self) -> bool {
        let Some(current) = self.current else {
            return false;
        };
        if !self.command_is(current, CommandState::Pending) || !self.cancel.is_nil() {
            return false;
        }
        if self.cancel.request().is_err() {
            return false;
        }
        if self.command_mut(current).request_cancellation().is_err() {
            self.cancel.reset();
            return false;
        }
        debug!(command = %current, "cancellation requested");
        true
    }

    pub fn register_cancellation_pending(&mut self) -> bool {
        self.cancel.set_pending().is_ok()
    }

    pub fn register_cancellation_complete(&mut self) -> bool {
        self.cancel.complete().is_ok()
    }

    pub fn complete_my_status(
        &mut self,
        kind: CommandKind,
        explanation: &str,
    ) -> Result<(), StatusError> {
        self.ensure_current(kind, "complete")?;
        self.command_mut(kind).complete(explanation)
    }

    pub fn fail_my_status(&mut self, kind: CommandKind, explanation: &str) -> Result<(), StatusError> {
        self.ensure_current(kind, "fail")?;
        self.command_mut(kind).fault(explanation)
    }

    pub fn cancel_my_status(
        &mut self,
        kind: CommandKind,
        explanation: &str,
    ) -> Result<(), StatusError> {
        self.ensure_current(kind, "cancel")?;
        self.command_mut(kind).cancel(explanation)
    }

    /// Terminal -> Nil for `kind`, reset the cancel flag and release the
    /// current slot if `kind` held it.
    pub fn reset_my_status_and_any_cancellation(
        &mut self,
        kind: CommandKind,
    ) -> Result<(), StatusError> {
        self.command_mut(kind).reset(false)?;
        self.cancel.reset();
        if self.current == Some(kind) {
            self.current = None;
        }
        Ok(())
    }

    // ---- errors ----

    pub fn register_error(&mut self, explanation: &str, is_logic_error: bool) -> bool {
        self.error.register(explanation, is_logic_error).is_ok()
    }

    /// Refuses logic errors.
    pub fn process_error(&mut self, explanation: &str) -> bool {
        self.error.process(explanation).is_ok()
    }

    pub fn clear_error(&mut self, explanation: &str) -> bool {
        self.error.clear(explanation).is_ok()
    }

    pub fn reset_error(&mut self) -> bool {
        self.error.reset(false).is_ok()
    }

    // ---- laundry ----

    /// Load an item into an empty drum. Returns its id.
    pub fn load_item(&mut self, item: LaundryItem) -> Option<Uuid> {
        if self.loaded.is_some() {
            return None;
        }
        let id = item.id();
        self.loaded = Some(item);
        Some(id)
    }

    /// Unload the item with `id`, unless a command is current.
    pub fn unload_item(&mut self, id: Uuid) -> Option<LaundryItem> {
        if self.current.is_some() {
            return None;
        }
        match &self.loaded {
            Some(item) if item.id() == id => self.loaded.take(),
            _ => None,
        }
    }

    /// Unload whatever is loaded, unless a command is current.
    pub fn unload_any(&mut self) -> Option<LaundryItem> {
        if self.current.is_some() {
            return None;
        }
        self.loaded.take()
    }

    /// Apply `f` to the loaded item. Returns `false` when the drum is empty.
    pub fn apply_to_loaded(&mut self, f: impl FnOnce(&mut LaundryItem)) -> bool {
        match self.loaded.as_mut() {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    /// Force every lifecycle back to Nil. Used when the vault is torn down.
    pub fn clear_all(&mut self) {
        let loaded = self.loaded.take();
        *self = Self::new();
        self.loaded = loaded;
    }

    fn request_current(&mut self, kind: CommandKind) -> bool {
        if self.command_mut(kind).request().is_err() {
            return false;
        }
        self.current = Some(kind);
        debug!(command = %kind, "command requested");
        true
    }

    fn ensure_current(&self, kind: CommandKind, verb: &str) -> Result<(), StatusError> {
        if self.current == Some(kind) {
            Ok(())
        } else {
            Err(StatusError::StateLogic(format!(
                "asked to {verb} {kind} but the current command is {:?}",
                self.current
            )))
        }
    }

    fn command_mut(&mut self, kind: CommandKind) -> &mut CommandRequestStatus {
        match kind {
            CommandKind::PowerUp => &mut self.power_up,
            CommandKind::Shutdown => &mut self.shutdown,
            CommandKind::Wash => &mut self.wash,
            CommandKind::Dry => &mut self.dry,
        }
    }
}
