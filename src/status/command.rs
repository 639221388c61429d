//! Per-command request lifecycle.
//!
//! ```text
//! Nil -> Requested -> Pending -> Completed
//!            |           |   \-> Faulted
//!            |           \-> CancellationRequested -> Cancelled
//!            |-> Refused                          \-> Completed | Faulted
//!            \-> Cancelled
//! ```
//!
//! `CancellationRequested` may still end in `Completed` or `Faulted`: a task
//! can finish before it observes its cancellation token.

use super::code::CommandKind;
use crate::core::State;
use crate::error::StatusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::state_enum! {
    #[derive(Copy, Eq, Hash)]
    pub enum CommandState {
        Nil,
        Requested,
        Refused,
        Pending,
        CancellationRequested,
        Cancelled,
        Completed,
        Faulted,
    }
    final: [Refused, Cancelled, Completed, Faulted]
    error: [Faulted]
}

impl CommandState {
    fn can_move_to(self, next: Self) -> bool {
        use CommandState::*;
        matches!(
            (self, next),
            (Nil, Requested)
                | (Requested, Refused)
                | (Requested, Pending)
                | (Requested, Cancelled)
                | (Pending, CancellationRequested)
                | (Pending, Completed)
                | (Pending, Faulted)
                | (CancellationRequested, Cancelled)
                | (CancellationRequested, Completed)
                | (CancellationRequested, Faulted)
        )
    }
}

/// Lifecycle of one command kind, with a timestamp for each step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRequestStatus {
    kind: CommandKind,
    state: CommandState,
    requested_at: Option<DateTime<Utc>>,
    pending_at: Option<DateTime<Utc>>,
    cancellation_requested_at: Option<DateTime<Utc>>,
    terminated_at: Option<DateTime<Utc>>,
    explanation: Option<String>,
}

impl CommandRequestStatus {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            state: CommandState::Nil,
            requested_at: None,
            pending_at: None,
            cancellation_requested_at: None,
            terminated_at: None,
            explanation: None,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn is(&self, state: CommandState) -> bool {
        self.state == state
    }

    pub fn is_nil(&self) -> bool {
        self.state == CommandState::Nil
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_final()
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    pub fn pending_at(&self) -> Option<DateTime<Utc>> {
        self.pending_at
    }

    pub fn cancellation_requested_at(&self) -> Option<DateTime<Utc>> {
        self.cancellation_requested_at
    }

    pub fn terminated_at(&self) -> Option<DateTime<Utc>> {
        self.terminated_at
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    pub fn request(&mut self) -> Result<(), StatusError> {
        self.move_to(CommandState::Requested)?;
        self.requested_at = Some(Utc::now());
        Ok(())
    }

    pub fn refuse(&mut self, explanation: impl Into<String>) -> Result<(), StatusError> {
        self.terminate(CommandState::Refused, explanation)
    }

    /// Requested -> Pending.
    pub fn acknowledge(&mut self) -> Result<(), StatusError> {
        self.move_to(CommandState::Pending)?;
        self.pending_at = Some(Utc::now());
        Ok(())
    }

    pub fn request_cancellation(&mut self) -> Result<(), StatusError> {
        self.move_to(CommandState::CancellationRequested)?;
        self.cancellation_requested_at = Some(Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self, explanation: impl Into<String>) -> Result<(), StatusError> {
        self.terminate(CommandState::Cancelled, explanation)
    }

    pub fn complete(&mut self, explanation: impl Into<String>) -> Result<(), StatusError> {
        self.terminate(CommandState::Completed, explanation)
    }

    pub fn fault(&mut self, explanation: impl Into<String>) -> Result<(), StatusError> {
        self.terminate(CommandState::Faulted, explanation)
    }

    /// Return to `Nil`.
    ///
    /// Only terminal states may be reset unless `force` is set.
    pub fn reset(&mut self, force: bool) -> Result<(), StatusError> {
        if !force && !self.is_terminal() {
            return Err(self.violation(CommandState::Nil));
        }
        *self = Self::new(self.kind);
        Ok(())
    }

    fn terminate(
        &mut self,
        state: CommandState,
        explanation: impl Into<String>,
    ) -> Result<(), StatusError> {
        self.move_to(state)?;
        self.terminated_at = Some(Utc::now());
        self.explanation = Some(explanation.into());
        Ok(())
    }

    fn move_to(&mut self, next: CommandState) -> Result<(), StatusError> {
        if !self.state.can_move_to(next) {
            return Err(self.violation(next));
        }
        self.state = next;
        Ok(())
    }

    fn violation(&self, next: CommandState) -> StatusError {
        StatusError::InvalidTransition {
            subject: format!("{} command", self.kind),
            from: self.state.name().to_string(),
            to: next.name().to_string(),
        }
    }
}
