//! Container lifecycle states and reconciliation.
//!
//! The status of a container is never stored as truth. Each time it is
//! needed the container gathers an [`Observation`] from the host and
//! [`Observation::resolve`] maps it to exactly one [`ContainerStatus`].

use serde::{Deserialize, Serialize};

use crate::error::{ContainerError, Result};

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// No live jail, or the init process is gone.
    #[default]
    Stopped,
    /// The jail exists and init is blocked on the exec fifo.
    Created,
    /// The init process has been released.
    Running,
    /// The jail is frozen.
    Paused,
}

impl ContainerStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }

    /// Returns true if the init process has been released.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContainerStatus {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stopped" => Ok(Self::Stopped),
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            _ => Err(ContainerError::InvalidState(format!("unknown status: {s}"))),
        }
    }
}

/// Host facts gathered during reconciliation.
///
/// Fields later in the list are only meaningful when the earlier checks
/// passed; gathering stops at the first decisive fact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    /// The jail is frozen.
    pub paused: bool,
    /// The host lists a jail with our name and remembered jid.
    pub jail_present: bool,
    /// The remembered init identity still matches, or none is remembered yet.
    pub identity_valid: bool,
    /// The exec fifo is present in the rootfs.
    pub exec_fifo_present: bool,
}

impl Observation {
    /// Maps the observation to a status.
    #[must_use]
    pub const fn resolve(&self) -> ContainerStatus {
        if self.paused {
            ContainerStatus::Paused
        } else if !self.jail_present || !self.identity_valid {
            ContainerStatus::Stopped
        } else if self.exec_fifo_present {
            ContainerStatus::Created
        } else {
            ContainerStatus::Running
        }
    }
}
