//! Error types for the laundry machine.
//!
//! Timeouts and precondition failures are ordinary values here. The facade
//! turns them into `false`/`None`. State-logic errors are programming defects;
//! the threads that hit them call [`fail_fast`].

use crate::status::LaundryMachineStateCode;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Errors produced while acquiring a [`GuardedValue`](crate::vault::GuardedValue).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VaultError {
    #[error("timed out after {timeout:?} waiting for '{resource}'")]
    TimedOut {
        resource: &'static str,
        timeout: Duration,
    },

    #[error("acquisition of '{resource}' was cancelled")]
    Cancelled { resource: &'static str },

    #[error("'{resource}' is disposed or being disposed")]
    Disposed { resource: &'static str },
}

impl VaultError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Errors raised by the status aggregate and its nested lifecycles.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StatusError {
    /// A lifecycle was asked to move along an edge it does not have.
    #[error("{subject} cannot move from {from} to {to}")]
    InvalidTransition {
        subject: String,
        from: String,
        to: String,
    },

    /// An internal consistency check failed. Treated as a defect.
    #[error("state logic error: {0}")]
    StateLogic(String),
}

impl StatusError {
    pub fn is_logic_error(&self) -> bool {
        matches!(self, Self::StateLogic(_))
    }
}

/// Entry or exit invariants of a machine state did not hold.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvariantError {
    #[error("entry invariants of {state} not met: {description}")]
    EntryNotMet {
        state: LaundryMachineStateCode,
        description: String,
    },

    #[error("exit invariants of {state} not met: {description}")]
    ExitNotMet {
        state: LaundryMachineStateCode,
        description: String,
    },
}

impl InvariantError {
    pub fn state(&self) -> LaundryMachineStateCode {
        match self {
            Self::EntryNotMet { state, .. } | Self::ExitNotMet { state, .. } => *state,
        }
    }
}

/// Errors from the task execution context.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("task execution context is not active ({0})")]
    NotActive(&'static str),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors loading or validating a [`MachineConfig`](crate::config::MachineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that stop a machine state from being set up or run.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Build(#[from] crate::framework::BuildError),

    #[error("task did not {action} within {timeout:?}")]
    TaskTimeout {
        action: &'static str,
        timeout: Duration,
    },

    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        source: std::io::Error,
    },
}

/// Log a defect and abort the process.
///
/// Continuing after a state-logic error risks corrupting the aggregate, so
/// this never unwinds.
pub fn fail_fast(reason: &str) -> ! {
    error!(reason, "unrecoverable laundry machine defect, aborting");
    eprintln!("laundry machine aborting: {reason}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_error_reports_timeout() {
        let err = VaultError::TimedOut {
            resource: "flags",
            timeout: Duration::from_millis(5),
        };
        assert!(err.is_timeout());
        assert!(!VaultError::Disposed { resource: "flags" }.is_timeout());
        assert!(err.to_string().contains("flags"));
    }

    #[test]
    fn invariant_error_carries_state() {
        let err = InvariantError::EntryNotMet {
            state: LaundryMachineStateCode::Washing,
            description: "wash command must be requested".into(),
        };
        assert_eq!(err.state(), LaundryMachineStateCode::Washing);
        assert!(err.to_string().contains("Washing"));
    }

    #[test]
    fn status_error_classifies_logic_errors() {
        assert!(StatusError::StateLogic("x".into()).is_logic_error());
        let invalid = StatusError::InvalidTransition {
            subject: "CancelFlag".into(),
            from: "Nil".into(),
            to: "Pending".into(),
        };
        assert!(!invalid.is_logic_error());
        assert_eq!(invalid.to_string(), "CancelFlag cannot move from Nil to Pending");
    }
}
