//! Child process runner: live output, bounded tail, cancellation.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::signals::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Kill the child after this long. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Bytes of combined stdout/stderr kept for error reports.
    pub tail_bytes: usize,
    /// Time allowed for a graceful stop before the child is killed.
    pub stop_grace: Duration,
    /// Copy child output to our own stdout/stderr as it arrives.
    pub echo: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            tail_bytes: 4000,
            stop_grace: Duration::from_secs(10),
            echo: true,
        }
    }
}

/// Outcome of a finished child.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    /// Last `tail_bytes` of interleaved stdout/stderr.
    pub tail: Vec<u8>,
    /// Bytes dropped from the front of `tail`.
    pub truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn tail_text(&self) -> String {
        let text = String::from_utf8_lossy(&self.tail);
        if self.truncated > 0 {
            format!("[{} earlier bytes omitted]\n{text}", self.truncated)
        } else {
            text.into_owned()
        }
    }
}

/// Keeps the most recent `limit` bytes written to it.
#[derive(Debug)]
struct TailBuffer {
    buf: VecDeque<u8>,
    limit: usize,
    dropped: usize,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(limit.min(64 * 1024)),
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
        let excess = self.buf.len().saturating_sub(self.limit);
        if excess > 0 {
            self.buf.drain(..excess);
            self.dropped += excess;
        }
    }

    fn into_parts(self) -> (Vec<u8>, usize) {
        (self.buf.into_iter().collect(), self.dropped)
    }
}

#[derive(Debug, Clone, Copy)]
enum Sink {
    Stdout,
    Stderr,
}

/// Run `cmd` to completion, streaming its output and keeping a bounded tail.
///
/// The child leads its own process group, tracked on `cancel` while it runs.
/// When `cancel` fires or the timeout elapses, `stop` (if any) is run to ask
/// the workload to exit; without one the group gets SIGTERM. Whatever is
/// still alive after the grace period is killed with the whole group.
#[instrument(skip_all, fields(program = ?cmd.get_program(), tail_bytes = options.tail_bytes))]
pub fn run_streaming(
    mut cmd: Command,
    options: &ProcessOptions,
    cancel: &CancelToken,
    mut stop: Option<Command>,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let _tracked = cancel.track(child.id());

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let tail = Arc::new(Mutex::new(TailBuffer::new(options.tail_bytes)));
    let stdout_handle = spawn_reader(stdout, Sink::Stdout, options.echo, Arc::clone(&tail));
    let stderr_handle = spawn_reader(stderr, Sink::Stderr, options.echo, Arc::clone(&tail));

    let started = Instant::now();
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        if let Some(status) = child.wait_timeout(POLL_INTERVAL).context("wait for command")? {
            break status;
        }
        if cancel.is_cancelled() {
            warn!("cancellation requested, stopping child");
            cancelled = true;
            break stop_child(&mut child, stop.take(), options.stop_grace)?;
        }
        if let Some(limit) = options.timeout
            && started.elapsed() >= limit
        {
            warn!(timeout_secs = limit.as_secs(), "command timed out, stopping");
            timed_out = true;
            break stop_child(&mut child, stop.take(), options.stop_grace)?;
        }
    };

    join_reader(stdout_handle).context("join stdout")?;
    join_reader(stderr_handle).context("join stderr")?;

    let (tail, truncated) = match Arc::try_unwrap(tail) {
        Ok(mutex) => mutex
            .into_inner()
            .map_err(|_| anyhow!("output buffer poisoned"))?
            .into_parts(),
        Err(_) => return Err(anyhow!("output buffer still shared")),
    };

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        tail,
        truncated,
        timed_out,
        cancelled,
    })
}

fn stop_child(child: &mut Child, stop: Option<Command>, grace: Duration) -> Result<ExitStatus> {
    let pgid = child.id();
    match stop {
        Some(mut stop) => match stop.stdout(Stdio::null()).stderr(Stdio::null()).status() {
            Ok(status) if status.success() => debug!("graceful stop issued"),
            Ok(status) => warn!(exit_code = ?status.code(), "graceful stop failed"),
            Err(err) => warn!(%err, "graceful stop could not be spawned"),
        },
        None => terminate_group(pgid),
    }
    let status = match child.wait_timeout(grace).context("wait after stop")? {
        Some(status) => status,
        None => {
            warn!(grace_secs = grace.as_secs(), "child still running after grace period");
            kill_group(pgid);
            if let Err(err) = child.kill() {
                debug!(%err, "child already gone");
            }
            child.wait().context("wait command after kill")?
        }
    };
    // Leftover members of the group still hold the output pipes.
    kill_group(pgid);
    Ok(status)
}

/// Ask every process in the group led by `pgid` to exit.
#[cfg(unix)]
fn terminate_group(pgid: u32) {
    signal_group(pgid, nix::sys::signal::Signal::SIGTERM);
}

/// SIGKILL every process in the group led by `pgid`.
#[cfg(unix)]
pub fn kill_group(pgid: u32) {
    signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        warn!(pgid, "process group id out of range");
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => debug!(pgid, ?signal, "signalled process group"),
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(pgid, ?signal, %err, "failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn terminate_group(_pgid: u32) {}

#[cfg(not(unix))]
pub fn kill_group(_pgid: u32) {}

fn spawn_reader<R>(
    reader: R,
    sink: Sink,
    echo: bool,
    tail: Arc<Mutex<TailBuffer>>,
) -> thread::JoinHandle<Result<()>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || pump(reader, sink, echo, &tail))
}

fn pump<R: Read>(mut reader: R, sink: Sink, echo: bool, tail: &Mutex<TailBuffer>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        if echo {
            let written = match sink {
                Sink::Stdout => {
                    let mut out = std::io::stdout().lock();
                    out.write_all(&chunk[..n]).and_then(|()| out.flush())
                }
                Sink::Stderr => std::io::stderr().lock().write_all(&chunk[..n]),
            };
            if let Err(e) = written {
                warn!(err = %e, "failed to echo child output");
            }
        }
        match tail.lock() {
            Ok(mut buf) => buf.push(&chunk[..n]),
            Err(_) => return Err(anyhow!("output buffer poisoned")),
        }
    }
    Ok(())
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> ProcessOptions {
        ProcessOptions {
            echo: false,
            ..ProcessOptions::default()
        }
    }

    #[test]
    fn tail_buffer_keeps_latest_bytes() {
        let mut buf = TailBuffer::new(4);
        buf.push(b"abc");
        buf.push(b"defg");
        let (tail, dropped) = buf.into_parts();
        assert_eq!(tail, b"defg");
        assert_eq!(dropped, 3);
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_code_and_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let out = run_streaming(cmd, &quiet(), &CancelToken::new(), None).expect("run");
        assert_eq!(out.status.code(), Some(3));
        let text = out.tail_text();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
        assert!(!out.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn tail_is_bounded() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "i=0; while [ $i -lt 500 ]; do echo line$i; i=$((i+1)); done"]);
        let options = ProcessOptions {
            tail_bytes: 64,
            ..quiet()
        };
        let out = run_streaming(cmd, &options, &CancelToken::new(), None).expect("run");
        assert!(out.status.success());
        assert_eq!(out.tail.len(), 64);
        assert!(out.truncated > 0);
        assert!(out.tail_text().trim_end().ends_with("line499"));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let options = ProcessOptions {
            timeout: Some(Duration::from_millis(200)),
            ..quiet()
        };
        let out = run_streaming(cmd, &options, &CancelToken::new(), None).expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
    }

    #[cfg(unix)]
    #[test]
    fn timeout_stops_grandchildren() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 8; echo after"]);
        let options = ProcessOptions {
            timeout: Some(Duration::from_millis(300)),
            stop_grace: Duration::from_secs(1),
            ..quiet()
        };
        let started = Instant::now();
        let out = run_streaming(cmd, &options, &CancelToken::new(), None).expect("run");
        assert!(out.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "returned after {:?}",
            started.elapsed()
        );
        assert!(!out.tail_text().contains("after"));
    }

    #[cfg(unix)]
    #[test]
    fn group_ignoring_sigterm_is_killed_after_grace() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "trap '' TERM; sleep 8"]);
        let options = ProcessOptions {
            timeout: Some(Duration::from_millis(200)),
            stop_grace: Duration::from_millis(300),
            ..quiet()
        };
        let token = CancelToken::new();
        let started = Instant::now();
        let out = run_streaming(cmd, &options, &token, None).expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(token.tracked().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_token_stops_child() {
        let token = CancelToken::new();
        token.cancel();
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let out = run_streaming(cmd, &quiet(), &token, None).expect("run");
        assert!(out.cancelled);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
