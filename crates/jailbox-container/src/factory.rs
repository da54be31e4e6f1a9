//! Container creation and loading.

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{JailBackend, JailCommandBackend};
use crate::config::{Config, RuntimeConfig};
use crate::container::Container;
use crate::error::{ContainerError, Result};
use crate::state::{STATE_FILENAME, State};

/// Creates and loads containers under one root directory.
///
/// The root holds one directory per container id; the directory's existence
/// is what makes an id taken.
#[derive(Clone)]
pub struct Factory {
    root: PathBuf,
    backend: Arc<dyn JailBackend>,
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Factory {
    /// Creates a factory, creating `root` with mode 0700 if needed.
    ///
    /// An empty root is accepted here and rejected by [`Factory::create`]
    /// and [`Factory::load`].
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: impl Into<PathBuf>, backend: Arc<dyn JailBackend>) -> Result<Self> {
        let root = root.into();
        if !root.as_os_str().is_empty() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&root)
                .map_err(|e| ContainerError::system(format!("mkdir {}", root.display()), e))?;
        }
        Ok(Self { root, backend })
    }

    /// Creates a factory backed by the host jail tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured root cannot be created.
    pub fn from_runtime_config(config: &RuntimeConfig) -> Result<Self> {
        Self::new(
            config.root.clone(),
            Arc::new(JailCommandBackend::new(config)),
        )
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a stopped container. Nothing is launched.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConfigInvalid`] for an empty root, a bad id
    /// or a bad config, and [`ContainerError::AlreadyExists`] if the id is
    /// taken.
    pub fn create(&self, id: &str, config: Config) -> Result<Container> {
        self.ensure_root()?;
        validate_id(id)?;
        config.validate()?;

        let container_root = self.root.join(id);
        DirBuilder::new()
            .mode(0o711)
            .create(&container_root)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    ContainerError::AlreadyExists(format!("container with id {id}"))
                } else {
                    ContainerError::system(format!("mkdir {}", container_root.display()), e)
                }
            })?;

        info!(container_id = %id, root = %container_root.display(), "container created");
        Ok(Container::new(
            id.to_string(),
            container_root,
            config,
            Arc::clone(&self.backend),
        ))
    }

    /// Rebuilds a container from its persisted state and reconciles it.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if no state is persisted for the
    /// id, or an error from reading the state or querying the host.
    pub async fn load(&self, id: &str) -> Result<Container> {
        self.ensure_root()?;
        validate_id(id)?;

        let container_root = self.root.join(id);
        let state_path = container_root.join(STATE_FILENAME);
        if !state_path.exists() {
            return Err(ContainerError::NotFound(id.to_string()));
        }

        let state = State::load(&state_path)?;
        let container = Container::from_state(container_root, state, Arc::clone(&self.backend));
        let status = container.status().await?;
        debug!(container_id = %id, status = %status, "container loaded");
        Ok(container)
    }

    fn ensure_root(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(ContainerError::ConfigInvalid("invalid root".to_string()));
        }
        Ok(())
    }
}

/// Checks that an id is usable as a directory and jail name.
///
/// # Errors
///
/// Returns [`ContainerError::ConfigInvalid`] if the id is empty, a path
/// component like `..`, or contains characters outside `[A-Za-z0-9_.+-]`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ContainerError::ConfigInvalid(
            "container id cannot be empty".to_string(),
        ));
    }
    if id == "." || id == ".." {
        return Err(ContainerError::ConfigInvalid(format!("invalid id format: {id}")));
    }
    let valid = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-'));
    if !valid {
        return Err(ContainerError::ConfigInvalid(format!("invalid id format: {id}")));
    }
    Ok(())
}
