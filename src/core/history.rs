//! State change history tracking.
//!
//! The driver loop records every published state change here. History is
//! immutable: `record` returns a new history with the change appended.

use super::state::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Record of a single published state change.
///
/// `change_count` is the driver's monotonically increasing counter value
/// after the change was published.
///
/// # Example
///
/// ```rust
/// use laundry_machine::core::StateChange;
/// use laundry_machine::LaundryMachineStateCode;
/// use chrono::Utc;
///
/// let change = StateChange {
///     from: LaundryMachineStateCode::PoweredDown,
///     to: LaundryMachineStateCode::Activating,
///     timestamp: Utc::now(),
///     change_count: 1,
/// };
/// assert_eq!(change.change_count, 1);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateChange<S: State> {
    /// The state being left
    pub from: S,
    /// The state being entered
    pub to: S,
    /// When the change was published
    pub timestamp: DateTime<Utc>,
    /// Value of the change counter after this change
    pub change_count: u64,
}

/// Ordered history of state changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateHistory<S: State> {
    changes: Vec<StateChange<S>>,
}

impl<S: State> Default for StateHistory<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State> StateHistory<S> {
    /// Create a new empty history.
    pub fn new() -> Self {
        Self {
            changes: Vec::new(),
        }
    }

    /// Record a change, returning a new history.
    ///
    /// The existing history is left untouched.
    pub fn record(&self, change: StateChange<S>) -> Self {
        let mut changes = self.changes.clone();
        changes.push(change);
        Self { changes }
    }

    /// Append a change in place, dropping the oldest changes so that at most
    /// `capacity` remain.
    pub fn push_bounded(&mut self, change: StateChange<S>, capacity: usize) {
        self.changes.push(change);
        let excess = self.changes.len().saturating_sub(capacity);
        if excess > 0 {
            self.changes.drain(..excess);
        }
    }

    /// Get the path of states traversed.
    ///
    /// Returns references to states in order: the first `from` state, then
    /// the `to` state of each change.
    ///
    /// # Example
    ///
    /// ```rust
    /// use laundry_machine::core::{StateChange, StateHistory};
    /// use laundry_machine::LaundryMachineStateCode as Code;
    /// use chrono::Utc;
    ///
    /// let history = StateHistory::new()
    ///     .record(StateChange { from: Code::Full, to: Code::Washing, timestamp: Utc::now(), change_count: 1 })
    ///     .record(StateChange { from: Code::Washing, to: Code::Full, timestamp: Utc::now(), change_count: 2 });
    ///
    /// assert_eq!(history.get_path(), vec![&Code::Full, &Code::Washing, &Code::Full]);
    /// ```
    pub fn get_path(&self) -> Vec<&S> {
        let mut path = Vec::new();
        if let Some(first) = self.changes.first() {
            path.push(&first.from);
        }
        for change in &self.changes {
            path.push(&change.to);
        }
        path
    }

    /// Path of states entered after the change counter passed `after`.
    ///
    /// Used by callers that captured a counter value before issuing a command
    /// and want only the states that followed it.
    pub fn path_since(&self, after: u64) -> Vec<&S> {
        self.changes
            .iter()
            .filter(|c| c.change_count > after)
            .map(|c| &c.to)
            .collect()
    }

    /// Calculate total duration from first to last change.
    ///
    /// Returns `None` if there are no changes.
    pub fn duration(&self) -> Option<Duration> {
        if let (Some(first), Some(last)) = (self.changes.first(), self.changes.last()) {
            let duration = last.timestamp.signed_duration_since(first.timestamp);
            duration.to_std().ok()
        } else {
            None
        }
    }

    /// Get all changes in order.
    pub fn changes(&self) -> &[StateChange<S>] {
        &self.changes
    }

    /// The most recent change, if any.
    pub fn last(&self) -> Option<&StateChange<S>> {
        self.changes.last()
    }
}
