//! Errors for transition construction and execution.

use crate::error::StatusError;
use thiserror::Error;

/// Errors that can occur when building transitions and transition tables.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BuildError {
    #[error("Transition '{0}' has no origin state. Call .from(state)")]
    MissingOrigin(String),

    #[error("Transition '{0}' has no priority. Call .priority(n)")]
    MissingPriority(String),

    #[error("Transition '{0}' has no predicate. Call .when(predicate)")]
    MissingPredicate(String),

    #[error("Transition '{0}' has no procedure. Call .execute(procedure) or .goes_to(state)")]
    MissingProcedure(String),

    #[error("State {state} already has transition '{existing}' at priority {priority}")]
    DuplicatePriority {
        state: String,
        priority: u32,
        existing: String,
    },

    #[error("Transition '{transition}' starts at {origin} but the table belongs to {table}")]
    OriginMismatch {
        table: String,
        transition: String,
        origin: String,
    },
}

/// Errors raised while executing a transition's procedure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransitionError {
    #[error("transition '{transition}' moved to undeclared destination {destination}")]
    UndeclaredDestination {
        transition: String,
        destination: String,
    },

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("transition procedure failed: {0}")]
    Fault(String),
}

impl TransitionError {
    /// Logic errors and undeclared destinations are defects, not faults.
    pub fn is_defect(&self) -> bool {
        match self {
            Self::UndeclaredDestination { .. } => true,
            Self::Status(status) => status.is_logic_error(),
            Self::Fault(_) => false,
        }
    }
}
