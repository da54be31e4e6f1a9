//! A single jail-backed container.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::descriptor::{DESCRIPTOR_FILENAME, JailDescriptor};
use crate::backend::jail::parse_jid_file;
use crate::backend::{JailBackend, LaunchRequest, SignalTarget};
use crate::config::Config;
use crate::error::{ContainerError, Result};
use crate::fifo::{ExecFifo, Readiness};
use crate::identity::IdentityToken;
use crate::process::InitSpec;
use crate::state::{STATE_FILENAME, State};
use crate::status::{ContainerStatus, Observation};

/// File `jail -J` writes the new jail's parameters to.
pub const JID_FILENAME: &str = "jid";

/// Mutable container fields, guarded by the container lock.
#[derive(Debug)]
struct Inner {
    status: ContainerStatus,
    jail_id: Option<String>,
    init: Option<IdentityToken>,
    dev_mount_path: Option<PathBuf>,
    created: DateTime<Utc>,
}

/// A container backed by one FreeBSD jail.
///
/// Every lifecycle operation holds the container lock from start to finish,
/// so operations on one container never interleave.
pub struct Container {
    id: String,
    root: PathBuf,
    config: Config,
    exec_fifo: ExecFifo,
    backend: Arc<dyn JailBackend>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Container {
    pub(crate) fn new(
        id: String,
        root: PathBuf,
        config: Config,
        backend: Arc<dyn JailBackend>,
    ) -> Self {
        let exec_fifo = ExecFifo::in_rootfs(&config.rootfs);
        Self {
            id,
            root,
            config,
            exec_fifo,
            backend,
            inner: Mutex::new(Inner {
                status: ContainerStatus::Stopped,
                jail_id: None,
                init: None,
                dev_mount_path: None,
                created: Utc::now(),
            }),
        }
    }

    pub(crate) fn from_state(root: PathBuf, state: State, backend: Arc<dyn JailBackend>) -> Self {
        let init = state.init_identity();
        let mut container = Self::new(state.id, root, state.config, backend);
        {
            let inner = container.inner.get_mut();
            inner.jail_id = state.jail_id;
            inner.init = init;
            inner.dev_mount_path = state.dev_mount_path;
            inner.created = state.created;
        }
        container
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Supervisor directory of this container.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn exec_fifo_path(&self) -> &Path {
        self.exec_fifo.path()
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILENAME)
    }

    #[must_use]
    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILENAME)
    }

    fn jid_path(&self) -> PathBuf {
        self.root.join(JID_FILENAME)
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Current status, reconciled against the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried.
    pub async fn status(&self) -> Result<ContainerStatus> {
        let mut inner = self.inner.lock().await;
        self.refresh_state(&mut inner).await
    }

    /// Snapshot of the container after reconciling against the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried.
    pub async fn state(&self) -> Result<State> {
        let mut inner = self.inner.lock().await;
        self.refresh_state(&mut inner).await?;
        Ok(self.snapshot(&inner))
    }

    /// Launches the jail and leaves init waiting on the exec fifo.
    ///
    /// Does nothing if the container is already created or running.
    ///
    /// # Errors
    ///
    /// Returns an error if a stale exec fifo exists or the launch fails.
    pub async fn start(&self, init: &InitSpec) -> Result<()> {
        init.validate()?;
        let mut inner = self.inner.lock().await;
        if !self.prepare_start(&mut inner).await? {
            return Ok(());
        }

        if let Err(err) = self.launch(&mut inner, init).await {
            self.exec_fifo.abandon();
            return Err(err);
        }
        Ok(())
    }

    /// Launches the jail and completes the readiness handshake.
    ///
    /// The fifo reader is started before the launch is issued, so a marker
    /// written while `jail -c` is still running is picked up.
    ///
    /// # Errors
    ///
    /// Returns the first error of the launch or the handshake.
    pub async fn run(&self, init: &InitSpec) -> Result<()> {
        init.validate()?;
        let mut inner = self.inner.lock().await;
        if !self.prepare_start(&mut inner).await? {
            return Ok(());
        }

        let fifo = self.exec_fifo.clone();
        let reader = tokio::task::spawn_blocking(move || fifo.wait_ready());

        if let Err(err) = self.launch(&mut inner, init).await {
            self.exec_fifo.abandon();
            if let Ok(Err(reader_err)) = reader.await {
                debug!(container_id = %self.id, error = %reader_err, "exec fifo reader released");
            }
            return Err(err);
        }

        let readiness = reader.await.map_err(join_error)??;
        self.finish_exec(&mut inner, readiness).await
    }

    /// Completes the readiness handshake of a created container.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::AlreadyRunning`] if the handshake already
    /// happened and [`ContainerError::InvalidState`] if the container is
    /// stopped.
    pub async fn exec(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match self.refresh_state(&mut inner).await? {
            ContainerStatus::Created => {}
            status if status.is_running() => {
                return Err(ContainerError::AlreadyRunning(self.id.clone()));
            }
            _ => {
                return Err(ContainerError::InvalidState(format!(
                    "container {} is stopped",
                    self.id
                )));
            }
        }

        let fifo = self.exec_fifo.clone();
        let readiness = tokio::task::spawn_blocking(move || fifo.wait_ready())
            .await
            .map_err(join_error)??;
        self.finish_exec(&mut inner, readiness).await
    }

    /// Tears down the jail and removes all persisted files.
    ///
    /// A jail that is already gone is not an error. If the host cannot be
    /// queried or refuses to remove a live jail, bookkeeping and files are
    /// still cleared and the failure is returned afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried, the jail cannot be
    /// removed, or the container directory cannot be deleted.
    pub async fn destroy(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let mut failure = None;

        if let Some(jail_id) = inner.jail_id.clone() {
            let present = self.jail_present(&jail_id).await.unwrap_or_else(|err| {
                warn!(container_id = %self.id, jail_id = %jail_id, error = %err, "failed to query jail");
                failure = Some(err);
                false
            });
            if present {
                match self.backend.destroy(&jail_id).await {
                    Ok(()) => {
                        info!(container_id = %self.id, jail_id = %jail_id, "jail removed");
                        if let Some(dev) = inner.dev_mount_path.take()
                            && let Err(err) = self.backend.unmount(&dev).await
                        {
                            debug!(
                                container_id = %self.id,
                                path = %dev.display(),
                                error = %err,
                                "devfs unmount skipped"
                            );
                        }
                    }
                    Err(err) => {
                        if self.jail_present(&jail_id).await.unwrap_or(true) {
                            warn!(container_id = %self.id, jail_id = %jail_id, error = %err, "failed to remove jail");
                            failure = Some(err);
                        } else {
                            debug!(container_id = %self.id, jail_id = %jail_id, error = %err, "jail vanished during removal");
                        }
                    }
                }
            } else if failure.is_none() {
                debug!(container_id = %self.id, jail_id = %jail_id, "jail already gone");
            }
        }

        inner.jail_id = None;
        inner.init = None;
        inner.dev_mount_path = None;

        if let Err(err) = self.exec_fifo.remove() {
            warn!(container_id = %self.id, error = %err, "failed to remove exec fifo");
        }

        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ContainerError::system(
                    format!("remove {}", self.root.display()),
                    e,
                ));
            }
        }

        self.transition(&mut inner, ContainerStatus::Stopped);
        info!(container_id = %self.id, "container destroyed");

        failure.map_or(Ok(()), Err)
    }

    /// Sends a signal to init, or to every process in the jail.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InstanceGone`] if no live jail backs the
    /// container, or the error of the host tool.
    pub async fn signal(&self, signal: Signal, all: bool) -> Result<()> {
        let inner = self.inner.lock().await;

        let live = match inner.jail_id.as_deref() {
            Some(jail_id) => self.jail_present(jail_id).await?,
            None => false,
        };
        let Some(jail_id) = inner.jail_id.clone().filter(|_| live) else {
            warn!(container_id = %self.id, signal = %signal, "signal to container without a live jail");
            return Err(ContainerError::InstanceGone(self.id.clone()));
        };

        let target = if all {
            SignalTarget::All
        } else if let Some(init) = &inner.init {
            SignalTarget::Pid(init.pid)
        } else {
            SignalTarget::Pid(self.backend.resolve_init_pid(&jail_id).await?)
        };

        info!(container_id = %self.id, jail_id = %jail_id, signal = %signal, ?target, "signalling container");
        self.backend
            .signal(&jail_id, target, signal)
            .await
            .inspect_err(|err| {
                warn!(container_id = %self.id, error = %err, "signal delivery failed");
            })
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    async fn refresh_state(&self, inner: &mut Inner) -> Result<ContainerStatus> {
        let observation = self.observe(inner).await?;
        let status = observation.resolve();
        self.transition(inner, status);
        Ok(status)
    }

    async fn observe(&self, inner: &Inner) -> Result<Observation> {
        let mut observation = Observation {
            paused: self.is_paused(),
            ..Observation::default()
        };
        if observation.paused {
            return Ok(observation);
        }

        let Some(jail_id) = inner.jail_id.as_deref() else {
            return Ok(observation);
        };
        observation.jail_present = self.jail_present(jail_id).await?;
        if !observation.jail_present {
            return Ok(observation);
        }

        observation.identity_valid = match &inner.init {
            Some(token) => self.identity_still_valid(jail_id, token).await?,
            None => true,
        };
        observation.exec_fifo_present = self.exec_fifo.exists();
        Ok(observation)
    }

    /// Jails cannot be frozen; kept as the hook for a future pause.
    #[allow(clippy::unused_self)]
    const fn is_paused(&self) -> bool {
        false
    }

    async fn jail_present(&self, jail_id: &str) -> Result<bool> {
        let live = self.backend.resolve_jail_id(&self.id).await?;
        Ok(live.as_deref() == Some(jail_id))
    }

    async fn identity_still_valid(&self, jail_id: &str, token: &IdentityToken) -> Result<bool> {
        let checked = self
            .backend
            .resolve_init_identity(jail_id)
            .await
            .and_then(|live| token.verify(&live));

        match checked {
            Ok(()) => Ok(true),
            Err(err) if err.indicates_stopped() => {
                debug!(container_id = %self.id, error = %err, "init process is gone");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn transition(&self, inner: &mut Inner, next: ContainerStatus) {
        if inner.status != next {
            debug!(container_id = %self.id, from = %inner.status, to = %next, "container state transition");
            inner.status = next;
        }
    }

    // ========================================================================
    // Start and handshake
    // ========================================================================

    /// Creates the exec fifo if the container is stopped.
    ///
    /// Returns false if it was already started.
    async fn prepare_start(&self, inner: &mut Inner) -> Result<bool> {
        let status = self.refresh_state(inner).await?;
        if status != ContainerStatus::Stopped {
            debug!(container_id = %self.id, status = %status, "container already started");
            return Ok(false);
        }

        self.exec_fifo
            .create(self.config.host_root_uid()?, self.config.host_root_gid()?)?;
        Ok(true)
    }

    async fn launch(&self, inner: &mut Inner, init: &InitSpec) -> Result<()> {
        let descriptor = JailDescriptor::for_container(&self.id, &self.config, init);
        let request = LaunchRequest {
            name: self.id.clone(),
            descriptor: self.descriptor_path(),
            jid_file: self.jid_path(),
        };

        descriptor.write_to(&request.descriptor)?;
        match std::fs::remove_file(&request.jid_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ContainerError::system(
                    format!("remove {}", request.jid_file.display()),
                    e,
                ));
            }
        }
        inner.dev_mount_path = descriptor.dev_mount_path().map(Path::to_path_buf);
        inner.created = Utc::now();

        let launched = match self.backend.create(&request).await {
            Ok(handle) => {
                info!(
                    container_id = %self.id,
                    pid = ?handle.pid(),
                    operation = handle.operation(),
                    "jail launch issued"
                );
                handle.wait().await
            }
            Err(err) => Err(err),
        };

        if let Err(err) = launched {
            warn!(container_id = %self.id, error = %err, "jail launch failed");
            self.discard_failed_launch(inner).await;
            return Err(err);
        }

        let jail_id = self.launched_jail_id().await?;
        info!(container_id = %self.id, jail_id = %jail_id, "jail created");

        inner.jail_id = Some(jail_id);
        inner.init = None;
        self.transition(inner, ContainerStatus::Created);
        self.save_state(inner)
    }

    /// Removes a jail left behind by a failed launch.
    ///
    /// If it cannot be removed its jid is kept and persisted, so the next
    /// start sees it instead of launching a second jail.
    async fn discard_failed_launch(&self, inner: &mut Inner) {
        inner.jail_id = None;
        let leftover = match self.backend.resolve_jail_id(&self.id).await {
            Ok(leftover) => leftover,
            Err(err) => {
                warn!(container_id = %self.id, error = %err, "failed to query jail after failed launch");
                None
            }
        };

        if let Some(jail_id) = leftover {
            match self.backend.destroy(&jail_id).await {
                Ok(()) => {
                    info!(container_id = %self.id, jail_id = %jail_id, "removed jail of failed launch");
                }
                Err(err) => {
                    warn!(container_id = %self.id, jail_id = %jail_id, error = %err, "failed to remove jail of failed launch");
                    inner.jail_id = Some(jail_id);
                    if let Err(err) = self.save_state(inner) {
                        warn!(container_id = %self.id, error = %err, "failed to save container state");
                    }
                    return;
                }
            }
        }
        self.transition(inner, ContainerStatus::Stopped);
    }

    async fn launched_jail_id(&self) -> Result<String> {
        if let Some(jail_id) = std::fs::read_to_string(self.jid_path())
            .ok()
            .as_deref()
            .and_then(parse_jid_file)
        {
            return Ok(jail_id);
        }

        self.backend
            .resolve_jail_id(&self.id)
            .await?
            .ok_or_else(|| ContainerError::InstanceGone(self.id.clone()))
    }

    async fn finish_exec(&self, inner: &mut Inner, readiness: Readiness) -> Result<()> {
        let Readiness::Ready(marker) = readiness else {
            return Err(ContainerError::AlreadyRunning(self.id.clone()));
        };
        debug!(container_id = %self.id, bytes = marker.len(), "init signalled ready");

        let jail_id = match inner.jail_id.clone() {
            Some(jail_id) => jail_id,
            None => self
                .backend
                .resolve_jail_id(&self.id)
                .await?
                .ok_or_else(|| ContainerError::InstanceGone(self.id.clone()))?,
        };

        let identity = match self.backend.resolve_init_identity(&jail_id).await {
            Ok(identity) => identity,
            Err(err) => {
                if let Err(remove_err) = self.exec_fifo.remove() {
                    warn!(container_id = %self.id, error = %remove_err, "failed to remove exec fifo");
                }
                return Err(err);
            }
        };

        info!(container_id = %self.id, jail_id = %jail_id, init_pid = identity.pid, "container running");
        inner.jail_id = Some(jail_id);
        inner.init = Some(identity);
        self.transition(inner, ContainerStatus::Running);
        self.save_state(inner)?;
        self.exec_fifo.remove()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn snapshot(&self, inner: &Inner) -> State {
        State {
            id: self.id.clone(),
            config: self.config.clone(),
            jail_id: inner.jail_id.clone(),
            init_process_pid: inner.init.as_ref().map_or(0, |init| init.pid),
            init_process_start: inner
                .init
                .as_ref()
                .map(|init| init.start_time.clone())
                .unwrap_or_default(),
            created: inner.created,
            rootless: self.config.rootless,
            dev_mount_path: inner.dev_mount_path.clone(),
        }
    }

    fn save_state(&self, inner: &Inner) -> Result<()> {
        self.snapshot(inner).save(self.state_path())?;
        debug!(container_id = %self.id, "container state saved");
        Ok(())
    }
}

fn join_error(err: tokio::task::JoinError) -> ContainerError {
    ContainerError::Runtime(format!("exec fifo reader failed: {err}"))
}
