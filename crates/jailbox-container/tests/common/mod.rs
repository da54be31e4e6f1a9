#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use jailbox_container::backend::{CommandOutput, LaunchHandle, Outcome};
use jailbox_container::{
    Config, ContainerError, Factory, IdMap, InitSpec, JailBackend, LaunchRequest, Result, Signal,
    SignalTarget,
};
use tempfile::TempDir;

pub const INIT_PID: i32 = 4242;
pub const INIT_START: &str = "Mon Oct 19 10:02:11 2026";

/// Host view kept by [`MockBackend`].
#[derive(Debug)]
pub struct MockHost {
    /// Live jails, name to jid.
    pub jails: HashMap<String, String>,
    pub next_jid: u32,
    pub init_pid: i32,
    pub init_start: String,
    pub fail_launch: bool,
    /// The jail comes up but the launch reports a timeout.
    pub launch_times_out: bool,
    /// `jail -r` refuses.
    pub fail_destroy: bool,
    /// `jls` fails.
    pub fail_queries: bool,
    /// Fifo the start command writes its marker to before launch returns.
    pub ready_fifo: Option<PathBuf>,
    pub create_calls: usize,
    pub destroy_calls: usize,
    pub signals: Vec<(String, SignalTarget, Signal)>,
    pub unmounts: Vec<PathBuf>,
    pub descriptors: Vec<String>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self {
            jails: HashMap::new(),
            next_jid: 1,
            init_pid: INIT_PID,
            init_start: INIT_START.to_string(),
            fail_launch: false,
            launch_times_out: false,
            fail_destroy: false,
            fail_queries: false,
            ready_fifo: None,
            create_calls: 0,
            destroy_calls: 0,
            signals: Vec::new(),
            unmounts: Vec::new(),
            descriptors: Vec::new(),
        }
    }
}

/// In-memory stand-in for the jail tools.
#[derive(Debug, Default)]
pub struct MockBackend {
    host: Mutex<MockHost>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockHost) -> R) -> R {
        f(&mut self.host.lock().unwrap())
    }
}

#[async_trait]
impl JailBackend for MockBackend {
    async fn create(&self, request: &LaunchRequest) -> Result<LaunchHandle> {
        let descriptor = std::fs::read_to_string(&request.descriptor)?;
        let operation = format!("jail -c {}", request.name);

        let outcome = self.with(|host| {
            host.create_calls += 1;
            host.descriptors.push(descriptor);
            if host.fail_launch {
                return Outcome::Failed(CommandOutput {
                    exit_code: 1,
                    stdout: Vec::new(),
                    stderr: b"jail: exec.prestart failed".to_vec(),
                });
            }
            let jid = host.next_jid.to_string();
            host.next_jid += 1;
            host.jails.insert(request.name.clone(), jid);
            Outcome::Success(CommandOutput::default())
        });

        if let Outcome::Success(_) = outcome {
            let jid = self.with(|host| host.jails[&request.name].clone());
            std::fs::write(
                &request.jid_file,
                format!("jid={jid} name={} persist\n", request.name),
            )?;

            // Like the real start command, the write blocks until a reader
            // opens the fifo, and the launch does not return before it.
            if let Some(fifo) = self.with(|host| host.ready_fifo.clone()) {
                tokio::task::spawn_blocking(move || {
                    let mut file = OpenOptions::new().write(true).open(fifo).unwrap();
                    file.write_all(b"1").unwrap();
                })
                .await
                .unwrap();
            }
        }

        if self.with(|host| host.launch_times_out) {
            return Ok(LaunchHandle::completed(
                operation.clone(),
                Err(ContainerError::Timeout {
                    operation,
                    timeout_ms: 5_000,
                }),
            ));
        }
        Ok(LaunchHandle::completed(operation, Ok(outcome)))
    }

    async fn resolve_jail_id(&self, name: &str) -> Result<Option<String>> {
        self.with(|host| {
            if host.fail_queries {
                return Err(ContainerError::Backend {
                    operation: "jls name jid".to_string(),
                    exit_code: 1,
                    stderr: "jls: kvm busy".to_string(),
                });
            }
            Ok(host.jails.get(name).cloned())
        })
    }

    async fn resolve_init_pid(&self, jail_id: &str) -> Result<i32> {
        self.with(|host| {
            if host.jails.values().any(|jid| jid == jail_id) {
                Ok(host.init_pid)
            } else {
                Err(ContainerError::InstanceGone(jail_id.to_string()))
            }
        })
    }

    async fn resolve_start_time(&self, pid: i32) -> Result<String> {
        self.with(|host| {
            if pid == host.init_pid && !host.init_start.is_empty() {
                Ok(host.init_start.clone())
            } else {
                Err(ContainerError::ProcessNotFound(pid))
            }
        })
    }

    async fn destroy(&self, jail_id: &str) -> Result<()> {
        self.with(|host| {
            host.destroy_calls += 1;
            if host.fail_destroy {
                return Err(ContainerError::Backend {
                    operation: format!("jail -r {jail_id}"),
                    exit_code: 1,
                    stderr: "jail: jail_remove: Operation not permitted".to_string(),
                });
            }
            let before = host.jails.len();
            host.jails.retain(|_, jid| jid != jail_id);
            if host.jails.len() == before {
                return Err(ContainerError::Backend {
                    operation: format!("jail -r {jail_id}"),
                    exit_code: 1,
                    stderr: format!("jail: \"{jail_id}\" not found"),
                });
            }
            Ok(())
        })
    }

    async fn signal(&self, jail_id: &str, target: SignalTarget, signal: Signal) -> Result<()> {
        self.with(|host| host.signals.push((jail_id.to_string(), target, signal)));
        Ok(())
    }

    async fn unmount(&self, path: &Path) -> Result<()> {
        self.with(|host| host.unmounts.push(path.to_path_buf()));
        Ok(())
    }
}

/// A factory rooted in a temp dir with a mock host and one rootfs.
pub struct Fixture {
    pub dir: TempDir,
    pub backend: Arc<MockBackend>,
    pub factory: Factory,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("var/containers/c1/root")).unwrap();

        let backend = MockBackend::new();
        let factory = Factory::new(dir.path().join("run"), backend.clone()).unwrap();
        Self {
            dir,
            backend,
            factory,
        }
    }

    pub fn rootfs(&self) -> PathBuf {
        self.dir.path().join("var/containers/c1/root")
    }

    /// Config whose container root maps to the test user, so the exec fifo
    /// can be chowned without privileges.
    pub fn config(&self) -> Config {
        config_for(self.rootfs())
    }
}

/// Config for `rootfs` whose container root maps to the test user.
pub fn config_for(rootfs: PathBuf) -> Config {
    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();
    let mut config = Config::new(rootfs);
    config.uid_mappings = vec![IdMap {
        container_id: 0,
        host_id: uid,
        size: 1,
    }];
    config.gid_mappings = vec![IdMap {
        container_id: 0,
        host_id: gid,
        size: 1,
    }];
    config
}

pub fn c1_init() -> InitSpec {
    InitSpec::new(["/bin/sh", "-c", "true"])
}

/// Plays the jail's start command: opens the exec fifo for writing, which
/// blocks until a reader arrives, then writes `marker` and closes.
pub fn signal_ready(fifo: &Path, marker: &'static [u8]) -> JoinHandle<()> {
    let path = fifo.to_path_buf();
    std::thread::spawn(move || {
        let mut file = OpenOptions::new().write(true).open(path).unwrap();
        file.write_all(marker).unwrap();
    })
}
