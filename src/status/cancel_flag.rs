//! Cancellation lifecycle: Nil -> Requested -> Pending -> Complete.

use crate::core::State;
use crate::error::StatusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::state_enum! {
    #[derive(Copy, Eq, Hash)]
    pub enum CancelState {
        Nil,
        Requested,
        Pending,
        Complete,
    }
    final: [Complete]
}

/// Strictly sequential cancellation flag. `reset` is unconditional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CancelFlag {
    state: CancelState,
    changed_at: Option<DateTime<Utc>>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelFlag {
    pub fn new() -> Self {
        Self {
            state: CancelState::Nil,
            changed_at: None,
        }
    }

    pub fn state(&self) -> CancelState {
        self.state
    }

    pub fn is(&self, state: CancelState) -> bool {
        self.state == state
    }

    pub fn is_nil(&self) -> bool {
        self.is(CancelState::Nil)
    }

    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.changed_at
    }

    pub fn request(&mut self) -> Result<(), StatusError> {
        self.advance(CancelState::Nil, CancelState::Requested)
    }

    pub fn set_pending(&mut self) -> Result<(), StatusError> {
        self.advance(CancelState::Requested, CancelState::Pending)
    }

    pub fn complete(&mut self) -> Result<(), StatusError> {
        self.advance(CancelState::Pending, CancelState::Complete)
    }

    pub fn reset(&mut self) {
        self.state = CancelState::Nil;
        self.changed_at = Some(Utc::now());
    }

    fn advance(&mut self, expected: CancelState, next: CancelState) -> Result<(), StatusError> {
        if self.state != expected {
            return Err(StatusError::InvalidTransition {
                subject: "cancel flag".to_string(),
                from: self.state.name().to_string(),
                to: next.name().to_string(),
            });
        }
        self.state = next;
        self.changed_at = Some(Utc::now());
        Ok(())
    }
}
