//! Backend driving the FreeBSD jail tools.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use tracing::debug;

use super::descriptor::INIT_PID_FILE;
use super::invoke::{Invocation, LaunchHandle, Outcome};
use super::{JailBackend, LaunchRequest, SignalTarget};
use crate::config::{RuntimeConfig, ToolPaths};
use crate::error::{ContainerError, Result};

/// [`JailBackend`] implemented with `jail`, `jls`, `jexec`, `ps` and `umount`.
#[derive(Debug, Clone)]
pub struct JailCommandBackend {
    tools: ToolPaths,
    launch_timeout: Duration,
    query_timeout: Duration,
    destroy_timeout: Duration,
}

impl JailCommandBackend {
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            tools: config.tools.clone(),
            launch_timeout: config.launch_timeout(),
            query_timeout: config.query_timeout(),
            destroy_timeout: config.destroy_timeout(),
        }
    }

    fn launch_invocation(&self, request: &LaunchRequest) -> Invocation {
        Invocation::new(&self.tools.jail)
            .arg("-J")
            .arg(&request.jid_file)
            .arg("-f")
            .arg(&request.descriptor)
            .arg("-c")
            .arg(&request.name)
            .timeout(self.launch_timeout)
    }

    fn signal_invocation(&self, jail_id: &str, target: SignalTarget, signal: Signal) -> Invocation {
        let target = match target {
            SignalTarget::All => "-1".to_string(),
            SignalTarget::Pid(pid) => pid.to_string(),
        };
        Invocation::new(&self.tools.jexec)
            .args([jail_id, "kill", "-s", signal_name(signal), target.as_str()])
            .timeout(self.query_timeout)
    }
}

impl Default for JailCommandBackend {
    fn default() -> Self {
        Self::new(&RuntimeConfig::default())
    }
}

#[async_trait]
impl JailBackend for JailCommandBackend {
    async fn create(&self, request: &LaunchRequest) -> Result<LaunchHandle> {
        self.launch_invocation(request).spawn()
    }

    async fn resolve_jail_id(&self, name: &str) -> Result<Option<String>> {
        let output = Invocation::new(&self.tools.jls)
            .args(["name", "jid"])
            .timeout(self.query_timeout)
            .output()
            .await?;
        Ok(parse_jls_listing(&output.stdout_text(), name))
    }

    async fn resolve_init_pid(&self, jail_id: &str) -> Result<i32> {
        let outcome = Invocation::new(&self.tools.jexec)
            .args([jail_id, "cat", INIT_PID_FILE])
            .timeout(self.query_timeout)
            .run()
            .await?;

        match outcome {
            Outcome::Success(output) => {
                let text = output.stdout_text();
                text.parse().map_err(|_| {
                    ContainerError::Runtime(format!("invalid init pid {text:?} in jail {jail_id}"))
                })
            }
            Outcome::Failed(output) => {
                debug!(jail_id, stderr = %output.stderr_text(), "init pid lookup failed");
                Err(ContainerError::InstanceGone(jail_id.to_string()))
            }
        }
    }

    async fn resolve_start_time(&self, pid: i32) -> Result<String> {
        let outcome = Invocation::new(&self.tools.ps)
            .args(["-o", "lstart=", "-p"])
            .arg(pid.to_string())
            .timeout(self.query_timeout)
            .run()
            .await?;

        match outcome {
            Outcome::Success(output) if !output.stdout_text().is_empty() => {
                Ok(output.stdout_text())
            }
            _ => Err(ContainerError::ProcessNotFound(pid)),
        }
    }

    async fn destroy(&self, jail_id: &str) -> Result<()> {
        Invocation::new(&self.tools.jail)
            .args(["-r", jail_id])
            .timeout(self.destroy_timeout)
            .output()
            .await?;
        Ok(())
    }

    async fn signal(&self, jail_id: &str, target: SignalTarget, signal: Signal) -> Result<()> {
        self.signal_invocation(jail_id, target, signal)
            .output()
            .await?;
        Ok(())
    }

    async fn unmount(&self, path: &Path) -> Result<()> {
        Invocation::new(&self.tools.umount)
            .arg("-f")
            .arg(path)
            .timeout(self.query_timeout)
            .output()
            .await?;
        Ok(())
    }
}

/// Finds the jid of `name` in `jls name jid` output.
#[must_use]
pub fn parse_jls_listing(listing: &str, name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(n), Some(jid)) if n == name => Some(jid.to_string()),
            _ => None,
        }
    })
}

/// Extracts the jid from a `jail -J` parameter file.
#[must_use]
pub fn parse_jid_file(contents: &str) -> Option<String> {
    contents
        .split_whitespace()
        .find_map(|field| field.strip_prefix("jid="))
        .filter(|jid| !jid.is_empty() && jid.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
}

/// Signal name as `kill -s` expects it.
#[must_use]
pub fn signal_name(signal: Signal) -> &'static str {
    let name = signal.as_str();
    name.strip_prefix("SIG").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    #[test]
    fn test_parse_jls_listing() {
        let listing = "web 3\nc1 7\nc10 9\n";
        assert_eq!(parse_jls_listing(listing, "c1"), Some("7".to_string()));
        assert_eq!(parse_jls_listing(listing, "c10"), Some("9".to_string()));
        assert_eq!(parse_jls_listing(listing, "c2"), None);
        assert_eq!(parse_jls_listing("", "c1"), None);
    }

    #[test]
    fn test_parse_jid_file() {
        let contents = "jid=7 name=c1 host.hostname=c1 path=/var/containers/c1/root\n";
        assert_eq!(parse_jid_file(contents), Some("7".to_string()));
        assert_eq!(parse_jid_file("name=c1"), None);
        assert_eq!(parse_jid_file("jid= name=c1"), None);
        assert_eq!(parse_jid_file(""), None);
    }

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(Signal::SIGTERM), "TERM");
        assert_eq!(signal_name(Signal::SIGKILL), "KILL");
    }

    #[test]
    fn test_launch_invocation() {
        let backend = JailCommandBackend::default();
        let request = LaunchRequest {
            name: "c1".to_string(),
            descriptor: PathBuf::from("/var/run/jailbox/c1/jail.conf"),
            jid_file: PathBuf::from("/var/run/jailbox/c1/jid"),
        };

        let invocation = backend.launch_invocation(&request);
        assert_eq!(invocation.program(), Path::new("/usr/sbin/jail"));
        assert_eq!(
            invocation.arguments(),
            [
                "-J",
                "/var/run/jailbox/c1/jid",
                "-f",
                "/var/run/jailbox/c1/jail.conf",
                "-c",
                "c1"
            ]
            .map(OsString::from)
        );
    }

    #[test]
    fn test_signal_invocation() {
        let backend = JailCommandBackend::default();

        let all = backend.signal_invocation("7", SignalTarget::All, Signal::SIGTERM);
        assert_eq!(all.describe(), "/usr/sbin/jexec 7 kill -s TERM -1");

        let init = backend.signal_invocation("7", SignalTarget::Pid(812), Signal::SIGHUP);
        assert_eq!(init.describe(), "/usr/sbin/jexec 7 kill -s HUP 812");
    }
}
