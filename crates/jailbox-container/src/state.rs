//! Persisted container state.
//!
//! `state.json` is written on each state-advancing transition and removed on
//! destroy. It lets a later supervisor process rebuild a container and gives
//! reconciliation the remembered identity to compare against; it is never
//! taken as the current status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;
use crate::identity::IdentityToken;

/// File name of the persisted state inside a container directory.
pub const STATE_FILENAME: &str = "state.json";

/// Snapshot of a container as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Container id.
    pub id: String,
    /// Configuration snapshot.
    pub config: Config,
    /// Jail id assigned by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jail_id: Option<String>,
    /// Init pid, 0 until the readiness handshake completes.
    #[serde(default)]
    pub init_process_pid: i32,
    /// Host-reported init start time, empty until the handshake completes.
    #[serde(default)]
    pub init_process_start: String,
    /// When the jail launch was issued.
    pub created: DateTime<Utc>,
    /// Whether the supervisor runs unprivileged.
    #[serde(default)]
    pub rootless: bool,
    /// Devfs mounted for the jail, unmounted on destroy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_mount_path: Option<PathBuf>,
}

impl State {
    /// Load state from JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save state to JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized or written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Remembered init identity, if the handshake completed.
    #[must_use]
    pub fn init_identity(&self) -> Option<IdentityToken> {
        (self.init_process_pid > 0 && !self.init_process_start.is_empty())
            .then(|| IdentityToken::new(self.init_process_pid, self.init_process_start.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> State {
        State {
            id: "c1".to_string(),
            config: Config::new("/var/containers/c1/root"),
            jail_id: Some("7".to_string()),
            init_process_pid: 812,
            init_process_start: "Mon Oct 19 10:02:11 2026".to_string(),
            created: Utc::now(),
            rootless: false,
            dev_mount_path: None,
        }
    }

    #[test]
    fn test_state_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILENAME);

        let state = sample();
        state.save(&path).unwrap();

        let loaded = State::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(
            loaded.init_identity(),
            Some(IdentityToken::new(812, "Mon Oct 19 10:02:11 2026"))
        );
    }

    #[test]
    fn test_state_json_layout() {
        let mut state = sample();
        state.jail_id = None;
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["id"], "c1");
        assert_eq!(json["init_process_pid"], 812);
        assert_eq!(json["config"]["rootfs"], "/var/containers/c1/root");
        assert!(json.get("jail_id").is_none());
        assert!(json.get("dev_mount_path").is_none());
    }

    #[test]
    fn test_no_identity_before_handshake() {
        let mut state = sample();
        state.init_process_pid = 0;
        state.init_process_start.clear();
        assert_eq!(state.init_identity(), None);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(State::load(dir.path().join(STATE_FILENAME)).is_err());
    }
}
