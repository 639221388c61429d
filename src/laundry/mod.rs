//! The laundry machine itself.
//!
//! [`LaundryMachine`] owns a driver thread that moves through the machine
//! states, a task worker that runs activation, washing and drying, and an
//! event thread that delivers notifications and task completions.

mod context;
mod driver;
mod facade;
mod faults;
mod repository;
mod states;
mod tasks;

pub use facade::LaundryMachine;
pub use faults::FaultSource;
pub use repository::{LaundryBin, LaundryRepository};
pub use states::StateKind;
