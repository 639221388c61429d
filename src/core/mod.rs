//! Core state types shared by the whole crate.
//!
//! This module contains the pure pieces of the state machine:
//! - State definitions via the `State` trait and the `state_enum!` macro
//! - Immutable history of published state changes
//!
//! Nothing in here touches threads or locks.

mod history;
#[macro_use]
mod macros;
mod state;

pub use history::{StateChange, StateHistory};
pub use state::State;
