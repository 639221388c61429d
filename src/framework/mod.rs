//! Generic state/transition framework.
//!
//! A machine state is described by data rather than by a type hierarchy:
//! a [`TransitionTable`] of priority-ordered [`Transition`]s plus entry and
//! exit [`Invariant`]s. The table is evaluated against a
//! [`GuardedValue`](crate::vault::GuardedValue) under a single acquisition.
//!
//! # Example
//!
//! ```rust
//! use laundry_machine::framework::{Evaluation, TransitionBuilder, TransitionTable};
//! use laundry_machine::vault::GuardedValue;
//! use laundry_machine::LaundryMachineStateCode as Code;
//! use std::time::Duration;
//!
//! let table = TransitionTable::<Code, u32, ()>::new(Code::Empty)
//!     .with(
//!         TransitionBuilder::new("loaded")
//!             .from(Code::Empty)
//!             .priority(0)
//!             .when(|items: &u32| *items > 0)
//!             .goes_to(Code::Full)
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let vault = GuardedValue::new("items", || 1_u32, Duration::from_millis(50));
//! let evaluation = table.evaluate(&vault, Duration::from_millis(50), &());
//! assert_eq!(evaluation.next_state(), Some(Code::Full));
//! ```

mod builder;
mod error;
mod invariant;
mod table;
mod transition;

pub use builder::TransitionBuilder;
pub use error::{BuildError, TransitionError};
pub use invariant::{check_invariants, verify_invariants, Invariant, InvariantViolation};
pub use table::{panic_message, Evaluation, TransitionTable};
pub use transition::{Predicate, Procedure, SideEffect, Transition};
