//! `jail.conf` rendering.
//!
//! Parameters are held in a sorted map so the same container always renders
//! the same bytes.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{ContainerError, Result};
use crate::process::InitSpec;

/// File name of the rendered descriptor inside a container directory.
pub const DESCRIPTOR_FILENAME: &str = "jail.conf";

/// Path inside the jail where init records its own pid.
pub const INIT_PID_FILE: &str = "/var/run/jailbox-init.pid";

/// Path inside the jail of the exec fifo.
pub const JAIL_EXEC_FIFO: &str = "/exec.fifo";

/// Marker init writes to the exec fifo once it is about to exec.
pub const READY_MARKER: &str = "1";

const HOST_MOUNT: &str = "/sbin/mount";
const HOST_UMOUNT: &str = "/sbin/umount";

/// A jail definition ready to be written as `jail.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailDescriptor {
    name: String,
    params: BTreeMap<String, String>,
    dev_mount_path: Option<PathBuf>,
}

impl JailDescriptor {
    /// Creates an empty descriptor for a jail name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
            dev_mount_path: None,
        }
    }

    /// Builds the descriptor for a container and its init process.
    ///
    /// `exec.start` runs a shell that records its pid, signals the exec fifo
    /// and then execs the init command, so the recorded pid is the init pid.
    /// It is backgrounded with its stdio detached so `jail -c` returns while
    /// init waits for the fifo to be read.
    #[must_use]
    pub fn for_container(id: &str, config: &Config, init: &InitSpec) -> Self {
        let mut descriptor = Self::new(id)
            .param("exec.clean", "true")
            .param("exec.start", start_command(init))
            .param("exec.stop", "/bin/sh /etc/rc.shutdown")
            .param("host.hostname", id)
            .param("path", config.rootfs.display().to_string());

        let dev = config.rootfs.join("dev");
        if dev.is_dir() {
            let dev_display = dev.display().to_string();
            descriptor = descriptor
                .param("exec.prestart", format!("{HOST_MOUNT} -t devfs devfs {dev_display}"))
                .param("exec.poststop", format!("{HOST_UMOUNT} -f {dev_display}"));
            descriptor.dev_mount_path = Some(dev);
        }

        descriptor
    }

    /// Sets a parameter, replacing any previous value.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Devfs mount point requested by this descriptor.
    #[must_use]
    pub fn dev_mount_path(&self) -> Option<&Path> {
        self.dev_mount_path.as_deref()
    }

    /// Renders the descriptor in `jail.conf` syntax.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{} {{\n", self.name);
        for (key, value) in &self.params {
            let _ = writeln!(out, "\t{key}={};", quote(value));
        }
        out.push_str("}\n");
        out
    }

    /// Writes the rendered descriptor, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns an error if the old file cannot be removed or the new one
    /// cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ContainerError::system(
                    format!("remove {}", path.display()),
                    e,
                ));
            }
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o400)
            .open(path)
            .map_err(|e| ContainerError::system(format!("create {}", path.display()), e))?;
        file.write_all(self.render().as_bytes())?;
        Ok(())
    }
}

/// Quotes a value for `jail.conf`.
///
/// Besides quotes and backslashes, `$` is escaped because jail(8) expands
/// variables inside double-quoted strings.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' | '$' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Single-quotes a word for `/bin/sh`.
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn start_command(init: &InitSpec) -> String {
    let script = format!(
        "echo $$ > {INIT_PID_FILE} && printf {READY_MARKER} > {JAIL_EXEC_FIFO} && exec \"$@\""
    );
    let mut command = format!("/bin/sh -c {} jailbox-init", shell_quote(&script));
    for arg in &init.args {
        command.push(' ');
        command.push_str(&shell_quote(arg));
    }
    command.push_str(" </dev/null >/dev/null 2>&1 &");
    command
}
