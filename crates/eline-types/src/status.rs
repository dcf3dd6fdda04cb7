//! Operational status shared by links and paths.

use serde::{Deserialize, Serialize};

/// Operational status of a network entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityStatus {
    /// Entity is operational.
    Up,
    /// Entity is administratively enabled but not operational.
    Down,
    /// Entity is administratively disabled.
    Disabled,
}

impl EntityStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Up => "UP",
            EntityStatus::Down => "DOWN",
            EntityStatus::Disabled => "DISABLED",
        }
    }

    /// Returns true if the entity is operational.
    pub fn is_up(&self) -> bool {
        matches!(self, EntityStatus::Up)
    }
}
