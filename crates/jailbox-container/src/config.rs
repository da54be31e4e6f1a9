//! Configuration management.
//!
//! Two kinds of configuration live here:
//!
//! - [`Config`]: the per-container snapshot derived from the OCI bundle
//!   and persisted with the container state.
//! - [`RuntimeConfig`]: host-wide settings for the supervisor itself, loaded
//!   with the following priority:
//!
//! 1. Environment variables (`JAILBOX_*`, `__` separates nested keys)
//! 2. Configuration file (`/usr/local/etc/jailbox/config.toml`)
//! 3. Default values
//!
//! ## Example Configuration File
//!
//! ```toml
//! root = "/var/run/jailbox"
//! launch_timeout_ms = 5000
//!
//! [tools]
//! jail = "/usr/sbin/jail"
//! jls = "/usr/sbin/jls"
//! ```

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ContainerError, Result};

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/usr/local/etc/jailbox/config.toml";

// ============================================================================
// Container configuration
// ============================================================================

/// A contiguous range of ids mapped from the container to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    /// First id inside the container.
    pub container_id: u32,
    /// First id on the host.
    pub host_id: u32,
    /// Number of ids in the range.
    pub size: u32,
}

impl IdMap {
    /// Maps a container id to its host id, if the range covers it.
    #[must_use]
    pub const fn to_host(&self, id: u32) -> Option<u32> {
        if id >= self.container_id && id - self.container_id < self.size {
            self.host_id.checked_add(id - self.container_id)
        } else {
            None
        }
    }
}

/// Immutable configuration of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root filesystem the jail is rooted at.
    pub rootfs: PathBuf,
    /// Whether the supervisor runs unprivileged.
    pub rootless: bool,
    /// User id mappings. Empty means identity mapping.
    pub uid_mappings: Vec<IdMap>,
    /// Group id mappings. Empty means identity mapping.
    pub gid_mappings: Vec<IdMap>,
}

impl Config {
    /// Creates a configuration for the given root filesystem.
    pub fn new(rootfs: impl Into<PathBuf>) -> Self {
        Self {
            rootfs: rootfs.into(),
            ..Self::default()
        }
    }

    /// Host uid that container root maps to.
    ///
    /// # Errors
    ///
    /// Returns an error if mappings are present but none covers uid 0.
    pub fn host_root_uid(&self) -> Result<u32> {
        host_root_id(&self.uid_mappings, "user")
    }

    /// Host gid that container root maps to.
    ///
    /// # Errors
    ///
    /// Returns an error if mappings are present but none covers gid 0.
    pub fn host_root_gid(&self) -> Result<u32> {
        host_root_id(&self.gid_mappings, "group")
    }

    /// Validates the configuration against the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the rootfs is relative or missing, or if the id
    /// mappings have no root entry.
    pub fn validate(&self) -> Result<()> {
        if !self.rootfs.is_absolute() {
            return Err(ContainerError::ConfigInvalid(format!(
                "rootfs ({}) must be an absolute path",
                self.rootfs.display()
            )));
        }
        if !self.rootfs.is_dir() {
            return Err(ContainerError::ConfigInvalid(format!(
                "rootfs ({}) does not exist",
                self.rootfs.display()
            )));
        }
        self.host_root_uid()?;
        self.host_root_gid()?;
        Ok(())
    }
}

fn host_root_id(mappings: &[IdMap], kind: &str) -> Result<u32> {
    if mappings.is_empty() {
        return Ok(0);
    }
    mappings
        .iter()
        .find_map(|m| m.to_host(0))
        .ok_or_else(|| ContainerError::ConfigInvalid(format!("no root {kind} mapping found")))
}

// ============================================================================
// Runtime configuration
// ============================================================================

/// Host-wide supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding one subdirectory per container.
    pub root: PathBuf,
    /// Host tool locations.
    pub tools: ToolPaths,
    /// Deadline for `jail -c`.
    pub launch_timeout_ms: u64,
    /// Deadline for `jls`, `jexec` and `ps` queries.
    pub query_timeout_ms: u64,
    /// Deadline for `jail -r`.
    pub destroy_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/run/jailbox"),
            tools: ToolPaths::default(),
            launch_timeout_ms: 5_000,
            query_timeout_ms: 5_000,
            destroy_timeout_ms: 30_000,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from the system file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> std::result::Result<Self, figment::Error> {
        Self::load_from(SYSTEM_CONFIG_PATH)
    }

    /// Loads configuration from a specific file and environment.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> std::result::Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("JAILBOX_").split("__"))
            .extract()
    }

    #[must_use]
    pub const fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    #[must_use]
    pub const fn destroy_timeout(&self) -> Duration {
        Duration::from_millis(self.destroy_timeout_ms)
    }
}

/// Absolute paths of the host tools the backend drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub jail: PathBuf,
    pub jls: PathBuf,
    pub jexec: PathBuf,
    pub ps: PathBuf,
    pub umount: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            jail: PathBuf::from("/usr/sbin/jail"),
            jls: PathBuf::from("/usr/sbin/jls"),
            jexec: PathBuf::from("/usr/sbin/jexec"),
            ps: PathBuf::from("/bin/ps"),
            umount: PathBuf::from("/sbin/umount"),
        }
    }
}
