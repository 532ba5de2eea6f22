//! External command execution
//!
//! Every producing command, metric command and git invocation goes through
//! [`CommandRunner::run`], so timeouts, output capture and failure reporting
//! behave the same everywhere.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default captured bytes per stream
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// How long to keep reading pipes after a timed-out command is killed
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A command from configuration
///
/// A string runs through `sh -c`; an array is executed directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalCommand {
    Shell(String),
    Argv(Vec<String>),
}

impl ExternalCommand {
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Argv(args.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Shell(script) => script.trim().is_empty(),
            Self::Argv(args) => args.first().is_none_or(|program| program.is_empty()),
        }
    }

    fn to_command(&self) -> Result<Command> {
        match self {
            Self::Shell(script) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                Ok(cmd)
            },
            Self::Argv(args) => {
                let (program, rest) = args
                    .split_first()
                    .ok_or_else(|| EngineError::config("command has no program"))?;
                let mut cmd = Command::new(program);
                cmd.args(rest);
                Ok(cmd)
            },
        }
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(script) => write!(f, "{}", script),
            Self::Argv(args) => write!(f, "{}", args.join(" ")),
        }
    }
}

/// Per-call execution settings
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Variables added on top of the inherited environment
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Result of a command that exited successfully
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// Whether either stream exceeded the capture limit
    pub truncated: bool,
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

type SharedCapture = Arc<Mutex<Captured>>;

/// Runs external commands with bounded output capture and a hard timeout
#[derive(Debug, Clone)]
pub struct CommandRunner {
    output_limit: usize,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LIMIT)
    }
}

impl CommandRunner {
    pub fn new(output_limit: usize) -> Self {
        Self { output_limit }
    }

    pub fn output_limit(&self) -> usize {
        self.output_limit
    }

    /// Run a command to completion
    ///
    /// Exit status 0 is success. A nonzero exit yields [`EngineError::Command`]
    /// and an expired deadline kills the process and yields
    /// [`EngineError::Timeout`]; both carry whatever output was captured.
    pub async fn run(
        &self,
        command: &ExternalCommand,
        invocation: &Invocation,
    ) -> Result<CommandOutput> {
        let shown = command.to_string();
        let mut cmd = command.to_command()?;
        cmd.envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }
        // Own process group, so a timeout also reaches anything the shell started.
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(command = %shown, "Running external command");
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            command: shown.clone(),
            source,
        })?;

        let (stdout, stdout_task) = spawn_capture(child.stdout.take(), self.output_limit);
        let (stderr, stderr_task) = spawn_capture(child.stderr.take(), self.output_limit);

        let status = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(command = %shown, timeout = ?limit, "Command timed out, killing it");
                    kill_process_group(&child);
                    if let Err(e) = child.kill().await {
                        warn!(command = %shown, error = %e, "Failed to kill timed-out command");
                    }
                    // Anything that left the group may still hold the pipes open.
                    drain(stdout_task, DRAIN_GRACE).await;
                    drain(stderr_task, DRAIN_GRACE).await;
                    return Err(EngineError::Timeout {
                        command: shown,
                        timeout: limit,
                        stdout: snapshot(&stdout).text(),
                        stderr: snapshot(&stderr).text(),
                    });
                },
            },
            None => child.wait().await?,
        };

        drain(stdout_task, DRAIN_GRACE).await;
        drain(stderr_task, DRAIN_GRACE).await;
        let stdout = snapshot(&stdout);
        let stderr = snapshot(&stderr);
        let duration = started.elapsed();

        if !status.success() {
            return Err(EngineError::Command {
                command: shown,
                exit_code: status.code(),
                stdout: stdout.text(),
                stderr: stderr.text(),
            });
        }

        debug!(command = %shown, elapsed_ms = duration.as_millis() as u64, "Command finished");
        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: stdout.text(),
            stderr: stderr.text(),
            duration,
            truncated: stdout.truncated || stderr.truncated,
        })
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) has no memory preconditions; a negative pid addresses
    // the group created by `process_group(0)` at spawn.
    if unsafe { libc::kill(-pid, libc::SIGKILL) } != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn spawn_capture<R>(reader: Option<R>, limit: usize) -> (SharedCapture, Option<JoinHandle<()>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let shared = SharedCapture::default();
    let task = reader.map(|reader| tokio::spawn(read_bounded(reader, limit, Arc::clone(&shared))));
    (shared, task)
}

/// Keep the first `limit` bytes and discard the rest so the child never
/// blocks on a full pipe
async fn read_bounded<R>(mut reader: R, limit: usize, shared: SharedCapture)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut captured = shared.lock().unwrap_or_else(|e| e.into_inner());
        let room = limit.saturating_sub(captured.bytes.len());
        if n > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&buf[..n.min(room)]);
    }
}

async fn drain(task: Option<JoinHandle<()>>, grace: Duration) {
    if let Some(mut task) = task {
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            task.abort();
        }
    }
}

fn snapshot(shared: &SharedCapture) -> Captured {
    let captured = shared.lock().unwrap_or_else(|e| e.into_inner());
    Captured {
        bytes: captured.bytes.clone(),
        truncated: captured.truncated,
    }
}
