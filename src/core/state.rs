//! Core State trait shared by every state-like enum in the crate.
//!
//! The outer machine code, the per-command lifecycle, the cancel flag, the
//! error lifecycle and task results are all small state machines. They share
//! this trait so that logging, history and invariant descriptions can name
//! states uniformly.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for state machine states.
///
/// All methods are pure - no side effects. States are plain values that
/// describe the current position in a state machine.
///
/// # Required Traits
///
/// - `Clone`: states are copied into history records and events
/// - `PartialEq`: states are compared by transition predicates
/// - `Debug`: states appear in diagnostics
/// - `Serialize` + `Deserialize`: states appear in status snapshots
///
/// # Example
///
/// ```rust
/// use laundry_machine::core::State;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
/// enum DoorState {
///     Open,
///     Closed,
///     Jammed,
/// }
///
/// impl State for DoorState {
///     fn name(&self) -> &str {
///         match self {
///             Self::Open => "Open",
///             Self::Closed => "Closed",
///             Self::Jammed => "Jammed",
///         }
///     }
///
///     fn is_error(&self) -> bool {
///         matches!(self, Self::Jammed)
///     }
/// }
/// ```
pub trait State:
    Clone + PartialEq + Debug + Serialize + for<'de> Deserialize<'de> + Send + Sync
{
    /// Get the state's name for display/logging.
    fn name(&self) -> &str;

    /// Check if this is a final (terminal) state.
    ///
    /// For lifecycle enums a final state is one that only a reset can leave.
    ///
    /// Default implementation returns `false`.
    fn is_final(&self) -> bool {
        false
    }

    /// Check if this is an error state.
    ///
    /// Default implementation returns `false`.
    fn is_error(&self) -> bool {
        false
    }
}
