//! Host command invocation.
//!
//! Every host tool call goes through [`Invocation`]. Outcomes are split in
//! three: the tool succeeded, the tool ran and reported failure
//! ([`Outcome::Failed`]), or the tool could not be run to completion at all
//! (spawn error, wait error, deadline), which surfaces as `Err`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ContainerError, Result};

/// How long output is still collected after a command has exited.
///
/// Processes the command left running in the background may hold its pipes
/// open; their output is not waited for.
const OUTPUT_GRACE: Duration = Duration::from_millis(100);

/// Captured result of a finished host command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 if terminated by a signal.
    pub exit_code: i32,
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Standard output as trimmed text.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// Standard error as trimmed text.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// How a host command that ran to completion ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exit status zero.
    Success(CommandOutput),
    /// The tool reported failure.
    Failed(CommandOutput),
}

impl Outcome {
    /// Converts a soft failure into [`ContainerError::Backend`].
    ///
    /// # Errors
    ///
    /// Returns an error if the tool exited non-zero.
    pub fn into_result(self, operation: &str) -> Result<CommandOutput> {
        match self {
            Self::Success(output) => Ok(output),
            Self::Failed(output) => Err(ContainerError::Backend {
                operation: operation.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr_text(),
            }),
        }
    }
}

/// A host command with an optional deadline.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Human-readable command line for logs and errors.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Runs the command to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned or waited on, or
    /// if it exceeds its deadline. A non-zero exit is not an error here.
    pub async fn run(&self) -> Result<Outcome> {
        let operation = self.describe();
        let child = self.spawn_child(&operation)?;
        wait_for(child, &operation, self.timeout).await
    }

    /// Runs the command and treats a non-zero exit as an error.
    ///
    /// # Errors
    ///
    /// Returns an error for hard failures and for non-zero exits.
    pub async fn output(&self) -> Result<CommandOutput> {
        self.run().await?.into_result(&self.describe())
    }

    /// Starts the command and returns a handle that resolves when it ends.
    ///
    /// A background task owns the child; the deadline, if any, is enforced
    /// there.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned.
    pub fn spawn(self) -> Result<LaunchHandle> {
        let operation = self.describe();
        let child = self.spawn_child(&operation)?;
        let pid = child.id();
        let (tx, rx) = oneshot::channel();
        let timeout = self.timeout;
        let watched = operation.clone();

        tokio::spawn(async move {
            let result = wait_for(child, &watched, timeout).await;
            // Nobody waiting is fine; the child has still been reaped.
            let _ = tx.send(result);
        });

        Ok(LaunchHandle {
            operation,
            pid,
            completion: rx,
        })
    }

    fn spawn_child(&self, operation: &str) -> Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|e| ContainerError::system(format!("spawn {operation}"), e))
    }
}

/// Waits for the command itself to exit, then collects what it wrote.
async fn wait_for(mut child: Child, operation: &str, timeout: Option<Duration>) -> Result<Outcome> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let waiting = child.wait();
    let status = match timeout {
        // Returning early drops the child, which kills it.
        Some(limit) => tokio::time::timeout(limit, waiting).await.map_err(|_| {
            ContainerError::Timeout {
                operation: operation.to_string(),
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }
        })?,
        None => waiting.await,
    }
    .map_err(|e| ContainerError::system(format!("wait for {operation}"), e))?;

    let deadline = Instant::now() + OUTPUT_GRACE;
    let output = CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: collect(stdout, deadline).await,
        stderr: collect(stderr, deadline).await,
    };
    debug!(operation, exit_code = output.exit_code, "host command finished");

    if output.exit_code == 0 {
        Ok(Outcome::Success(output))
    } else {
        Ok(Outcome::Failed(output))
    }
}

/// Forwards everything read from a pipe until EOF.
fn drain<R>(pipe: Option<R>) -> mpsc::UnboundedReceiver<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(mut pipe) = pipe {
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match pipe.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
    rx
}

/// Collects drained output until EOF or the deadline, whichever is first.
async fn collect(mut chunks: mpsc::UnboundedReceiver<Vec<u8>>, deadline: Instant) -> Vec<u8> {
    let mut out = Vec::new();
    while let Ok(Some(chunk)) = tokio::time::timeout_at(deadline, chunks.recv()).await {
        out.extend_from_slice(&chunk);
    }
    out
}

/// Completion of a command started with [`Invocation::spawn`].
#[derive(Debug)]
pub struct LaunchHandle {
    operation: String,
    pid: Option<u32>,
    completion: oneshot::Receiver<Result<Outcome>>,
}

impl LaunchHandle {
    /// A handle that is already resolved.
    pub fn completed(operation: impl Into<String>, result: Result<Outcome>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self {
            operation: operation.into(),
            pid: None,
            completion: rx,
        }
    }

    /// Host pid of the launched command, if it is a real process.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Waits for the command to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the command failed, timed out, or its watcher
    /// went away without reporting.
    pub async fn wait(self) -> Result<CommandOutput> {
        let outcome = self.completion.await.map_err(|_| {
            ContainerError::Runtime(format!("{} exited without reporting", self.operation))
        })??;
        outcome.into_result(&self.operation)
    }
}
