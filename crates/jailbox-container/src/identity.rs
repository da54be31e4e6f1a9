//! Init process identity.
//!
//! A pid alone cannot identify the init process: once it exits the host may
//! hand the same pid to an unrelated process. Pairing the pid with the start
//! time reported by the host makes reuse detectable.

use serde::{Deserialize, Serialize};

use crate::error::{ContainerError, Result};

/// Pid plus host-reported start time of a container's init process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityToken {
    /// Host pid of the init process.
    pub pid: i32,
    /// Start time string exactly as the host reports it.
    pub start_time: String,
}

impl IdentityToken {
    /// Creates a new identity token.
    pub fn new(pid: i32, start_time: impl Into<String>) -> Self {
        Self {
            pid,
            start_time: start_time.into(),
        }
    }

    /// Checks a freshly resolved token against this remembered one.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::IdentityMismatch`] if either field differs.
    pub fn verify(&self, live: &Self) -> Result<()> {
        if self == live {
            return Ok(());
        }
        Err(ContainerError::IdentityMismatch {
            pid: self.pid,
            expected: self.start_time.clone(),
            actual: if live.pid == self.pid {
                live.start_time.clone()
            } else {
                format!("pid {} started {}", live.pid, live.start_time)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_same_identity() {
        let token = IdentityToken::new(812, "Mon Oct 19 10:02:11 2026");
        assert!(token.verify(&token.clone()).is_ok());
    }

    #[test]
    fn test_verify_reused_pid() {
        let token = IdentityToken::new(812, "Mon Oct 19 10:02:11 2026");
        let live = IdentityToken::new(812, "Mon Oct 19 11:40:03 2026");

        let err = token.verify(&live).unwrap_err();
        assert!(err.indicates_stopped());
        assert!(matches!(
            err,
            ContainerError::IdentityMismatch { pid: 812, ref actual, .. } if actual == "Mon Oct 19 11:40:03 2026"
        ));
    }

    #[test]
    fn test_verify_different_pid() {
        let token = IdentityToken::new(812, "Mon Oct 19 10:02:11 2026");
        let live = IdentityToken::new(990, "Mon Oct 19 10:02:11 2026");
        assert!(token.verify(&live).is_err());
    }
}
