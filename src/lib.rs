//! Laundry Machine: a concurrent state machine over guarded resources.
//!
//! A simulated washing machine whose outer states (powered down, empty,
//! full, activating, washing, drying, error) are driven by a dedicated
//! thread. All shared data lives in [`vault::GuardedValue`]s that grant
//! exclusive, timeout-bounded access through scoped guards.
//!
//! # Core Concepts
//!
//! - **Vault**: one protected value, one holder at a time, every wait bounded
//! - **Status aggregate**: command, cancellation and error lifecycles plus the
//!   loaded item, mutated atomically under one guard
//! - **Transition tables**: priority-ordered predicates and procedures per state
//! - **Task executor**: a single worker running cancellable task bodies
//!
//! # Example
//!
//! ```rust
//! use laundry_machine::{LaundryItem, LaundryMachine, LaundryMachineStateCode, MachineConfig};
//! use std::time::Duration;
//!
//! let machine = LaundryMachine::new(MachineConfig::fast()).unwrap();
//! assert_eq!(
//!     machine.query_state(Duration::from_millis(500)),
//!     Some(LaundryMachineStateCode::PoweredDown)
//! );
//!
//! let id = machine.load(LaundryItem::new("shirt", 80, 0));
//! assert!(id.is_some());
//! assert!(machine.turn_on());
//! assert!(machine.wait_for_state(LaundryMachineStateCode::Full, Duration::from_secs(5)));
//! machine.dispose();
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod executor;
pub mod framework;
pub mod laundry;
pub mod status;
pub mod vault;

pub use config::MachineConfig;
pub use core::{State, StateChange, StateHistory};
pub use error::{ConfigError, ExecutorError, InvariantError, MachineError, StatusError, VaultError};
pub use events::MachineEvent;
pub use laundry::{FaultSource, LaundryBin, LaundryMachine, LaundryRepository, StateKind};
pub use status::{
    CancelState, CommandKind, CommandState, ErrorState, LaundryItem, LaundryMachineStateCode,
    LaundryStatusFlags, MAX_LEVEL,
};
