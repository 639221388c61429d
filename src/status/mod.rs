//! The protected status aggregate and its nested lifecycles.
//!
//! [`LaundryStatusFlags`] is the single value shared between the driver, the
//! task worker and external callers. It is only ever touched through a
//! [`ScopedGuard`](crate::vault::ScopedGuard).

mod cancel_flag;
mod code;
mod command;
mod error_status;
mod flags;
mod item;
mod task_result;

pub use cancel_flag::{CancelFlag, CancelState};
pub use code::{CommandKind, LaundryMachineStateCode};
pub use command::{CommandRequestStatus, CommandState};
pub use error_status::{ErrorRegistrationStatus, ErrorState};
pub use flags::LaundryStatusFlags;
pub use item::{LaundryItem, MAX_LEVEL};
pub use task_result::{TaskResult, TaskResultCode};
