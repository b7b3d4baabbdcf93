//! Helpers for running child processes with timeouts and bounded output.
//!
//! Linters, the shell tool, `patch`, and the `gh` CLI all go through
//! [`run_command_with_timeout`] so none of them can stall a run.

use std::io::{ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Exit code, or `-1` when the process was killed by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// stdout then stderr, separated by a newline and trimmed.
    pub fn combined_text(&self) -> String {
        format!("{}\n{}", self.stdout_text(), self.stderr_text())
            .trim()
            .to_string()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// On Unix the child leads its own process group so a timeout also kills anything it spawned.
///
/// One deadline covers both the child and the draining of its pipes: a background process that
/// keeps stdout or stderr open past the deadline is killed with the group and the run reports
/// `timed_out` with whatever output arrived so far.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!(program = ?cmd.get_program(), "spawning child process");
    let deadline = Instant::now() + timeout;
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_capture = spawn_reader(stderr, output_limit_bytes, done_tx);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_group(&child);
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let mut open_readers = 2;
    if !timed_out {
        open_readers = wait_for_readers(&done_rx, open_readers, deadline);
        if open_readers > 0 {
            warn!(
                timeout_secs = timeout.as_secs(),
                "output still open at deadline, killing process group"
            );
            timed_out = true;
            kill_process_group(&child);
        }
    }
    if open_readers > 0 {
        wait_for_readers(&done_rx, open_readers, Instant::now() + DRAIN_GRACE);
    }

    let (stdout, stdout_truncated) = take_capture(&stdout_capture);
    let (stderr, stderr_truncated) = take_capture(&stderr_capture);

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// How long killed readers get to hand over their last bytes.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Default)]
struct Capture {
    buf: Vec<u8>,
    truncated: usize,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Drain `reader` on its own thread into a shared buffer; signal `done` at EOF.
fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    limit: usize,
    done: Sender<()>,
) -> SharedCapture {
    let capture = SharedCapture::default();
    let shared = Arc::clone(&capture);
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(err = %err, "read output failed");
                    break;
                }
            };
            let mut capture = shared.lock().unwrap_or_else(PoisonError::into_inner);
            let remaining = limit.saturating_sub(capture.buf.len());
            let keep = n.min(remaining);
            capture.buf.extend_from_slice(&chunk[..keep]);
            capture.truncated += n - keep;
        }
        // The receiver is gone once the caller stopped waiting.
        let _ = done.send(());
    });
    capture
}

/// Wait until `open` readers reported EOF or `until` passes. Returns the readers still open.
fn wait_for_readers(done: &Receiver<()>, mut open: usize, until: Instant) -> usize {
    while open > 0 {
        let remaining = until.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(()) => open -= 1,
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => return 0,
        }
    }
    open
}

fn take_capture(capture: &SharedCapture) -> (Vec<u8>, usize) {
    let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
    (std::mem::take(&mut capture.buf), capture.truncated)
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let group = format!("-{}", child.id());
    if let Err(err) = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        debug!(err = %err, "process group kill failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
