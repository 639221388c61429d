//! Laundry items and the simple effects washing and drying have on them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Highest soil or dampness level an item can have.
pub const MAX_LEVEL: u8 = u8::MAX;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaundryItem {
    id: Uuid,
    description: String,
    soiled_factor: u8,
    dampness: u8,
}

impl LaundryItem {
    pub fn new(description: impl Into<String>, soiled_factor: u8, dampness: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            soiled_factor,
            dampness,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn soiled_factor(&self) -> u8 {
        self.soiled_factor
    }

    pub fn dampness(&self) -> u8 {
        self.dampness
    }

    pub fn is_clean(&self) -> bool {
        self.soiled_factor == 0
    }

    pub fn is_dry(&self) -> bool {
        self.dampness == 0
    }

    /// Raise dampness toward [`MAX_LEVEL`] by `fraction` of the remaining gap.
    pub fn soak(&mut self, fraction: f64) {
        let gap = MAX_LEVEL - self.dampness;
        self.dampness += portion(gap, fraction);
    }

    /// Remove `fraction` of the current soil.
    pub fn cleanse(&mut self, fraction: f64) {
        self.soiled_factor -= portion(self.soiled_factor, fraction);
    }

    /// Remove `fraction` of the current dampness.
    pub fn dry(&mut self, fraction: f64) {
        self.dampness -= portion(self.dampness, fraction);
    }
}

fn portion(level: u8, fraction: f64) -> u8 {
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    (f64::from(level) * fraction).round().min(f64::from(level)) as u8
}
