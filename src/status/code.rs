//! Outer machine state codes and the command kinds that drive them.

use serde::{Deserialize, Serialize};

crate::state_enum! {
    /// The outer laundry machine's current state.
    #[derive(Copy, Eq, Hash)]
    pub enum LaundryMachineStateCode {
        PoweredDown,
        Empty,
        Full,
        Activating,
        Washing,
        Drying,
        Error,
    }
    error: [Error]
}

impl LaundryMachineStateCode {
    pub const ALL: [Self; 7] = [
        Self::PoweredDown,
        Self::Empty,
        Self::Full,
        Self::Activating,
        Self::Washing,
        Self::Drying,
        Self::Error,
    ];

    /// States that own a running task.
    pub fn runs_task(self) -> bool {
        matches!(self, Self::Activating | Self::Washing | Self::Drying)
    }

    /// States in which the door may be opened.
    pub fn accepts_laundry(self) -> bool {
        matches!(self, Self::PoweredDown | Self::Empty | Self::Full)
    }
}

/// The four commands the aggregate tracks a lifecycle for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    PowerUp,
    Shutdown,
    Wash,
    Dry,
}

impl CommandKind {
    pub const ALL: [Self; 4] = [Self::PowerUp, Self::Shutdown, Self::Wash, Self::Dry];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PowerUp => "PowerUp",
            Self::Shutdown => "Shutdown",
            Self::Wash => "Wash",
            Self::Dry => "Dry",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
