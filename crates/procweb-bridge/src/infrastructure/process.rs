//! Process runner: launches the interpreter on the staged program and wires
//! its standard streams to the pipe adapters.
//!
//! The runner owns the child process exclusively.  It spawns one input adapter
//! and two output adapters on the session context (so the bridge's final wait
//! covers them), then blocks until the child exits or the session is
//! cancelled.  On cancellation the child is killed and reaped.
//!
//! A non-zero exit is an ordinary outcome: it is logged and reported, but the
//! session is not cancelled, because output the program already produced must
//! still reach the client.  Failing to launch the child is fatal.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use procweb_core::{CategorizedMessage, OutputStream};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::BridgeConfig;
use crate::infrastructure::context::SessionContext;
use crate::infrastructure::pipes::{run_input_adapter, run_output_adapter};

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited on its own with this status code.
    Exited { code: i32 },
    /// The process was terminated by a signal it did not get from us.
    Signalled { signal: Option<i32> },
    /// The session was cancelled and the runner killed the process.
    Killed,
    /// The process could not be started.
    LaunchFailed,
    /// The session was cancelled before the process was launched.
    NotStarted,
    /// Waiting for the process failed.
    WaitFailed,
}

impl ProcessOutcome {
    /// Returns `true` for a zero exit status.
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { code: 0 })
    }

    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ProcessOutcome::Exited { code },
            None => ProcessOutcome::Signalled {
                signal: exit_signal(&status),
            },
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Exited { code } => write!(f, "exited with status {code}"),
            ProcessOutcome::Signalled { signal: Some(sig) } => write!(f, "terminated by signal {sig}"),
            ProcessOutcome::Signalled { signal: None } => f.write_str("terminated by a signal"),
            ProcessOutcome::Killed => f.write_str("killed"),
            ProcessOutcome::LaunchFailed => f.write_str("failed to launch"),
            ProcessOutcome::NotStarted => f.write_str("not started"),
            ProcessOutcome::WaitFailed => f.write_str("wait failed"),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// The three channels connecting a process to the rest of the session.
#[derive(Debug)]
pub struct ProcessChannels {
    /// Chunks for the program's stdin; closed by the router on end of input.
    pub stdin: mpsc::Receiver<Vec<u8>>,
    /// Destination of stdout messages.
    pub stdout: mpsc::Sender<CategorizedMessage>,
    /// Destination of stderr messages.
    pub stderr: mpsc::Sender<CategorizedMessage>,
}

/// Launches `interpreter [args...] <program>` with piped stdio.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: PathBuf,
    interpreter_args: Vec<String>,
    working_dir: Option<PathBuf>,
    read_chunk_size: usize,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            interpreter_args: Vec::new(),
            working_dir: None,
            read_chunk_size: crate::domain::config::DEFAULT_READ_CHUNK_SIZE,
        }
    }

    /// Builds a runner from the process-related configuration fields.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            interpreter_args: config.interpreter_args.clone(),
            working_dir: config.working_dir.clone(),
            read_chunk_size: config.read_chunk_size,
        }
    }

    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.interpreter_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.interpreter_args)
            .arg(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Runs `program` to completion.
    ///
    /// Adapter tasks are spawned on `ctx` and may outlive this call briefly
    /// while they drain the last output; the bridge waits for them.
    pub async fn run(
        &self,
        ctx: SessionContext,
        program: &Path,
        channels: ProcessChannels,
    ) -> ProcessOutcome {
        let session = ctx.id();
        let interpreter = self.interpreter.display();

        let mut child = match self.command(program).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("session {session}: failed to start {interpreter}: {e}");
                ctx.cancel();
                return ProcessOutcome::LaunchFailed;
            }
        };

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            error!("session {session}: {interpreter} started without piped stdio");
            ctx.cancel();
            if let Err(e) = child.kill().await {
                debug!("session {session}: killing child: {e}");
            }
            return ProcessOutcome::LaunchFailed;
        };

        info!(
            "session {session}: started {interpreter} {} (pid {})",
            program.display(),
            child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );

        let ProcessChannels {
            stdin: stdin_rx,
            stdout: stdout_tx,
            stderr: stderr_tx,
        } = channels;
        ctx.spawn(run_input_adapter(ctx.clone(), stdin, stdin_rx));
        ctx.spawn(run_output_adapter(
            ctx.clone(),
            stdout,
            OutputStream::Stdout,
            stdout_tx,
            self.read_chunk_size,
        ));
        ctx.spawn(run_output_adapter(
            ctx.clone(),
            stderr,
            OutputStream::Stderr,
            stderr_tx,
            self.read_chunk_size,
        ));

        let waited = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            status = child.wait() => Some(status),
        };

        let outcome = match waited {
            Some(Ok(status)) => ProcessOutcome::from_status(status),
            Some(Err(e)) => {
                error!("session {session}: waiting for child failed: {e}");
                ctx.cancel();
                ProcessOutcome::WaitFailed
            }
            None => {
                // start_kill + wait; an already-exited child is reaped the same way.
                if let Err(e) = child.kill().await {
                    warn!("session {session}: killing child failed: {e}");
                }
                ProcessOutcome::Killed
            }
        };

        match outcome {
            ProcessOutcome::Exited { code: 0 } => info!("session {session}: program {outcome}"),
            ProcessOutcome::Killed => info!("session {session}: program killed on cancellation"),
            _ => warn!("session {session}: program {outcome}"),
        }
        outcome
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
