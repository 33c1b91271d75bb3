//! Child process execution with line streaming, timeouts and cancellation.
//!
//! stdout is read line by line on its own thread with a growable buffer, so a
//! single line may be arbitrarily long. stderr drains concurrently on a second
//! thread. The calling thread consumes stdout lines as they arrive and polls
//! for cancellation and the deadline in between; it never blocks on a read
//! that cannot be interrupted.
//!
//! On unix the child leads its own process group and the whole group is
//! killed on timeout or cancellation, so processes started by a wrapper
//! command do not outlive it.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::cancel::CancelToken;

/// How often the wait loop re-checks cancellation and the deadline.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for reader threads after the child has been killed.
const KILL_GRACE: Duration = Duration::from_millis(200);

/// Starts child processes. Tests substitute counting or failing launchers.
pub trait Launcher: Send + Sync {
    fn launch(&self, cmd: &mut Command) -> io::Result<Child>;
}

/// Launcher that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, cmd: &mut Command) -> io::Result<Child> {
        cmd.spawn()
    }
}

/// Why the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(ExitStatus),
    TimedOut(Duration),
    Cancelled,
}

/// Everything observed from a finished child, besides the streamed stdout.
#[derive(Debug)]
pub struct ProcessOutput {
    pub termination: Termination,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| ProcessError::Io { context, source }
    }
}

/// Run `cmd`, handing each stdout line (including its newline, if any) to
/// `on_line` on the calling thread.
///
/// On timeout or cancellation the child is killed, lines already read are
/// still delivered, and the termination records why it stopped.
#[instrument(skip_all, fields(program = ?cmd.get_program(), ?timeout))]
pub fn run_streaming<F: FnMut(&[u8])>(
    launcher: &dyn Launcher,
    mut cmd: Command,
    timeout: Option<Duration>,
    cancel: &CancelToken,
    mut on_line: F,
) -> Result<ProcessOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    debug!("spawning child process");
    let mut child = launcher.launch(&mut cmd).map_err(|source| {
        error!(err = %source, "failed to spawn command");
        ProcessError::Spawn {
            program: cmd.get_program().to_string_lossy().into_owned(),
            source,
        }
    })?;
    let deadline = timeout.map(|t| Instant::now() + t);

    let stdout = child.stdout.take().ok_or_else(|| ProcessError::Io {
        context: "stdout was not piped",
        source: io::Error::other("missing stdout handle"),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| ProcessError::Io {
        context: "stderr was not piped",
        source: io::Error::other("missing stderr handle"),
    })?;

    let (line_tx, line_rx) = mpsc::channel::<io::Result<Vec<u8>>>();
    thread::spawn(move || read_lines(stdout, line_tx));

    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let (stderr_done_tx, stderr_done_rx) = mpsc::channel::<()>();
    {
        let stderr_buf = Arc::clone(&stderr_buf);
        thread::spawn(move || {
            drain(stderr, &stderr_buf);
            let _ = stderr_done_tx.send(());
        });
    }

    // Phase 1: consume stdout until EOF, cancellation or deadline.
    let mut stop = None;
    loop {
        if let Some(reason) = stop_reason(cancel, deadline, timeout) {
            stop = Some(reason);
            break;
        }
        match line_rx.recv_timeout(poll_slice(deadline)) {
            Ok(Ok(line)) => on_line(&line),
            Ok(Err(err)) => {
                warn!(err = %err, "stdout read failed; treating as end of stream");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Phase 2: stdout closed, wait for the exit status.
    if stop.is_none() {
        loop {
            if let Some(reason) = stop_reason(cancel, deadline, timeout) {
                stop = Some(reason);
                break;
            }
            match child
                .wait_timeout(poll_slice(deadline))
                .map_err(ProcessError::io("wait for child"))?
            {
                Some(status) => {
                    // The pipe is closed once the child exits unless a
                    // grandchild inherited it, so bound the wait.
                    let _ = stderr_done_rx.recv_timeout(KILL_GRACE * 5);
                    debug!(exit_code = ?status.code(), "child exited");
                    return Ok(ProcessOutput {
                        termination: Termination::Exited(status),
                        stderr: take_buffer(&stderr_buf),
                    });
                }
                None => continue,
            }
        }
    }

    let termination = stop.unwrap_or(Termination::Cancelled);
    warn!(?termination, "stopping child process");
    kill(&mut child)?;

    // Deliver whatever stdout was already read, without waiting on readers
    // that may be held open by orphaned grandchildren.
    let grace_end = Instant::now() + KILL_GRACE;
    loop {
        let remaining = grace_end.saturating_duration_since(Instant::now());
        match line_rx.recv_timeout(remaining) {
            Ok(Ok(line)) => on_line(&line),
            Ok(Err(_)) | Err(_) => break,
        }
    }
    let _ = stderr_done_rx.recv_timeout(KILL_GRACE);

    Ok(ProcessOutput {
        termination,
        stderr: take_buffer(&stderr_buf),
    })
}

fn stop_reason(
    cancel: &CancelToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
) -> Option<Termination> {
    if cancel.is_cancelled() {
        return Some(Termination::Cancelled);
    }
    match (deadline, timeout) {
        (Some(deadline), Some(timeout)) if Instant::now() >= deadline => {
            Some(Termination::TimedOut(timeout))
        }
        _ => None,
    }
}

fn poll_slice(deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => deadline
            .saturating_duration_since(Instant::now())
            .min(POLL_INTERVAL),
        None => POLL_INTERVAL,
    }
}

fn kill(child: &mut Child) -> Result<(), ProcessError> {
    #[cfg(unix)]
    kill_group(child);
    match child.kill() {
        Ok(()) => {}
        // Already exited between the last poll and the kill.
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
        Err(source) => {
            return Err(ProcessError::Io {
                context: "kill child",
                source,
            });
        }
    }
    child.wait().map_err(ProcessError::io("wait child after kill"))?;
    Ok(())
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(%err, "process group already gone");
    }
}

/// Read `reader` line by line with no upper bound on line length.
fn read_lines<R: Read>(reader: R, tx: mpsc::Sender<io::Result<Vec<u8>>>) {
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = tx.send(Err(err));
                break;
            }
        }
    }
}

fn drain<R: Read>(mut reader: R, buf: &Mutex<Vec<u8>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if let Ok(mut guard) = buf.lock() {
                    guard.extend_from_slice(&chunk[..n]);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(err = %err, "stderr read failed");
                break;
            }
        }
    }
}

fn take_buffer(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    match buf.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}
