//! Isolation backend.
//!
//! The container never talks to the host tools directly; it goes through the
//! [`JailBackend`] trait (real tools in production, mock for testing).

pub mod descriptor;
pub mod invoke;
pub mod jail;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::sys::signal::Signal;

use crate::error::Result;
use crate::identity::IdentityToken;

pub use descriptor::JailDescriptor;
pub use invoke::{CommandOutput, Invocation, LaunchHandle, Outcome};
pub use jail::JailCommandBackend;

/// Everything needed to create a jail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Jail name, equal to the container id.
    pub name: String,
    /// Rendered `jail.conf`.
    pub descriptor: PathBuf,
    /// File the host writes the new jail's parameters to.
    pub jid_file: PathBuf,
}

/// Processes a signal is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    /// Every process in the jail.
    All,
    /// One process, by host pid.
    Pid(i32),
}

/// Operations on host jails.
#[async_trait]
pub trait JailBackend: Send + Sync {
    /// Starts creating a jail. The returned handle resolves when the host
    /// tool exits.
    async fn create(&self, request: &LaunchRequest) -> Result<LaunchHandle>;

    /// Looks up the jid of a live jail by name.
    async fn resolve_jail_id(&self, name: &str) -> Result<Option<String>>;

    /// Reads the pid init recorded inside the jail.
    async fn resolve_init_pid(&self, jail_id: &str) -> Result<i32>;

    /// Host-reported start time of a process.
    async fn resolve_start_time(&self, pid: i32) -> Result<String>;

    /// Removes a jail and kills its processes.
    async fn destroy(&self, jail_id: &str) -> Result<()>;

    /// Delivers a signal inside a jail.
    async fn signal(&self, jail_id: &str, target: SignalTarget, signal: Signal) -> Result<()>;

    /// Unmounts a filesystem left behind by a jail.
    async fn unmount(&self, path: &Path) -> Result<()>;

    /// Resolves the identity of the jail's init process.
    async fn resolve_init_identity(&self, jail_id: &str) -> Result<IdentityToken> {
        let pid = self.resolve_init_pid(jail_id).await?;
        let start_time = self.resolve_start_time(pid).await?;
        Ok(IdentityToken::new(pid, start_time))
    }
}
