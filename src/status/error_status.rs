//! Error registration lifecycle: Nil -> Registered -> Processed -> Cleared.
//!
//! Logic errors are non-recoverable: they can be registered but never
//! processed, so they stay `Registered` until forcibly reset.

use crate::core::State;
use crate::error::StatusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

crate::state_enum! {
    #[derive(Copy, Eq, Hash)]
    pub enum ErrorState {
        Nil,
        Registered,
        Processed,
        Cleared,
    }
    final: [Cleared]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorRegistrationStatus {
    state: ErrorState,
    id: Option<Uuid>,
    is_logic_error: bool,
    explanation: String,
    changed_at: Option<DateTime<Utc>>,
}

impl Default for ErrorRegistrationStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRegistrationStatus {
    pub fn new() -> Self {
        Self {
            state: ErrorState::Nil,
            id: None,
            is_logic_error: false,
            explanation: String::new(),
            changed_at: None,
        }
    }

    pub fn state(&self) -> ErrorState {
        self.state
    }

    pub fn is(&self, state: ErrorState) -> bool {
        self.state == state
    }

    pub fn is_nil(&self) -> bool {
        self.is(ErrorState::Nil)
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn is_logic_error(&self) -> bool {
        self.is_logic_error
    }

    /// All explanation text appended so far, one step per line.
    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.changed_at
    }

    /// Nil -> Registered. Returns the new error's identifier.
    pub fn register(
        &mut self,
        explanation: impl AsRef<str>,
        is_logic_error: bool,
    ) -> Result<Uuid, StatusError> {
        self.advance(ErrorState::Nil, ErrorState::Registered, explanation)?;
        let id = Uuid::new_v4();
        self.id = Some(id);
        self.is_logic_error = is_logic_error;
        Ok(id)
    }

    /// Registered -> Processed. Refused for logic errors.
    pub fn process(&mut self, explanation: impl AsRef<str>) -> Result<(), StatusError> {
        if self.is_logic_error {
            return Err(StatusError::InvalidTransition {
                subject: "logic error registration".to_string(),
                from: self.state.name().to_string(),
                to: ErrorState::Processed.name().to_string(),
            });
        }
        self.advance(ErrorState::Registered, ErrorState::Processed, explanation)
    }

    /// Processed -> Cleared.
    pub fn clear(&mut self, explanation: impl AsRef<str>) -> Result<(), StatusError> {
        self.advance(ErrorState::Processed, ErrorState::Cleared, explanation)
    }

    /// Cleared -> Nil, or any state -> Nil when forced.
    pub fn reset(&mut self, force: bool) -> Result<(), StatusError> {
        if !force && !self.is(ErrorState::Cleared) {
            return Err(self.violation(ErrorState::Nil));
        }
        *self = Self::new();
        self.changed_at = Some(Utc::now());
        Ok(())
    }

    fn advance(
        &mut self,
        expected: ErrorState,
        next: ErrorState,
        explanation: impl AsRef<str>,
    ) -> Result<(), StatusError> {
        if self.state != expected {
            return Err(self.violation(next));
        }
        self.state = next;
        self.changed_at = Some(Utc::now());
        if !self.explanation.is_empty() {
            self.explanation.push('\n');
        }
        self.explanation
            .push_str(&format!("[{}] {}", next.name(), explanation.as_ref()));
        Ok(())
    }

    fn violation(&self, next: ErrorState) -> StatusError {
        StatusError::InvalidTransition {
            subject: "error registration".to_string(),
            from: self.state.name().to_string(),
            to: next.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_error_walks_all_states() {
        let mut status = ErrorRegistrationStatus::new();
        let id = status.register("drum jammed", false).unwrap();
        assert_eq!(status.id(), Some(id));
        status.process("drum freed").unwrap();
        status.clear("self test passed").unwrap();
        assert!(status.is(ErrorState::Cleared));

        let lines: Vec<&str> = status.explanation().lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("drum jammed"));
        assert!(lines[2].starts_with("[Cleared]"));

        status.reset(false).unwrap();
        assert!(status.is_nil());
        assert!(status.id().is_none());
    }

    #[test]
    fn logic_error_cannot_be_processed() {
        let mut status = ErrorRegistrationStatus::new();
        status.register("impossible state", true).unwrap();
        assert!(status.is_logic_error());
        assert!(status.process("try anyway").is_err());
        assert!(status.is(ErrorState::Registered));
        assert!(status.reset(false).is_err());
        status.reset(true).unwrap();
        assert!(status.is_nil());
    }

    #[test]
    fn out_of_order_steps_fail() {
        let mut status = ErrorRegistrationStatus::new();
        assert!(status.process("nothing").is_err());
        assert!(status.clear("nothing").is_err());
        status.register("x", false).unwrap();
        assert!(status.register("y", false).is_err());
        assert!(status.clear("skip").is_err());
    }
}
