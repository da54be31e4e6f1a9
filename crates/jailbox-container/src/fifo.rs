//! Exec fifo readiness handshake.
//!
//! The supervisor creates a named pipe in the rootfs before the jail is
//! launched. The jail's start command writes a marker into it right before
//! exec'ing init, which blocks until the supervisor opens the other end.
//! Because a fifo writer cannot get past `open` without a reader (and vice
//! versa), a marker written before anyone reads is never lost.

use std::fs::{File, OpenOptions, Permissions};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Uid, chown, mkfifo};
use tracing::{debug, warn};

use crate::error::{ContainerError, Result};

/// File name of the exec fifo at the rootfs top level.
pub const EXEC_FIFO_FILENAME: &str = "exec.fifo";

const EXEC_FIFO_MODE: u32 = 0o622;

/// What a reader got from the exec fifo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Init wrote its marker.
    Ready(Vec<u8>),
    /// The write side closed without data.
    Closed,
}

/// The exec fifo of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecFifo {
    path: PathBuf,
}

impl ExecFifo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The fifo for a rootfs, visible inside the jail as `/exec.fifo`.
    #[must_use]
    pub fn in_rootfs(rootfs: &Path) -> Self {
        Self::new(rootfs.join(EXEC_FIFO_FILENAME))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.symlink_metadata().is_ok()
    }

    /// Creates the fifo owned by the given host ids.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::AlreadyExists`] if a fifo is left over from
    /// an earlier start, and a system error if it cannot be created.
    pub fn create(&self, uid: u32, gid: u32) -> Result<()> {
        let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IWGRP | Mode::S_IWOTH;
        match mkfifo(&self.path, mode) {
            Ok(()) => {}
            Err(Errno::EEXIST) => {
                return Err(ContainerError::AlreadyExists(format!(
                    "exec fifo {}",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(ContainerError::system(
                    format!("mkfifo {}", self.path.display()),
                    e,
                ));
            }
        }

        // mkfifo honours the umask; set the mode explicitly instead of
        // clearing the process-wide umask.
        let prepared = std::fs::set_permissions(&self.path, Permissions::from_mode(EXEC_FIFO_MODE))
            .map_err(|e| ContainerError::system(format!("chmod {}", self.path.display()), e))
            .and_then(|()| {
                chown(&self.path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(
                    |e| ContainerError::system(format!("chown {}", self.path.display()), e),
                )
            });

        if let Err(err) = prepared {
            let _ = std::fs::remove_file(&self.path);
            return Err(err);
        }

        debug!(path = %self.path.display(), uid, gid, "exec fifo created");
        Ok(())
    }

    /// Blocks until a writer has opened, written and closed the fifo.
    ///
    /// Must run on a blocking thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the fifo cannot be opened or read.
    pub fn wait_ready(&self) -> Result<Readiness> {
        let mut file = File::open(&self.path)
            .map_err(|e| ContainerError::system(format!("open {}", self.path.display()), e))?;

        let mut payload = Vec::new();
        file.read_to_end(&mut payload)
            .map_err(|e| ContainerError::system(format!("read {}", self.path.display()), e))?;

        if payload.is_empty() {
            Ok(Readiness::Closed)
        } else {
            Ok(Readiness::Ready(payload))
        }
    }

    /// Removes the fifo. A missing fifo is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the fifo exists but cannot be removed.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContainerError::system(
                format!("remove {}", self.path.display()),
                e,
            )),
        }
    }

    /// Removes the fifo and releases any reader waiting on it.
    ///
    /// Opening read-write never blocks on a fifo and counts as a writer, so
    /// a reader stuck in `open` proceeds; closing it afterwards gives that
    /// reader EOF. A reader that has not opened yet finds no fifo.
    pub fn abandon(&self) {
        let handle = OpenOptions::new().read(true).write(true).open(&self.path);
        if let Err(err) = self.remove() {
            warn!(path = %self.path.display(), error = %err, "failed to remove exec fifo");
        }
        drop(handle);
    }
}
