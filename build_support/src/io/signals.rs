//! Cancellation on SIGINT/SIGTERM.
//!
//! Signals are awaited on a dedicated thread running a current-thread tokio
//! runtime. The first signal sets the shared [`CancelToken`]; the executor and
//! the process runner poll it. A second signal kills every tracked child
//! process group and exits immediately.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use tracing::{error, warn};

use crate::exit_codes;
use crate::io::process;

/// Shared flag set once an abort was requested, plus the process groups of
/// children still running.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    children: Arc<Mutex<BTreeSet<u32>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Track a child that leads its own process group until the guard drops.
    pub fn track(&self, pgid: u32) -> TrackedChild<'_> {
        if let Ok(mut children) = self.children.lock() {
            children.insert(pgid);
        }
        TrackedChild { token: self, pgid }
    }

    /// Process groups currently tracked.
    pub fn tracked(&self) -> Vec<u32> {
        match self.children.lock() {
            Ok(children) => children.iter().copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// SIGKILL every tracked process group.
    pub fn kill_children(&self) {
        for pgid in self.tracked() {
            process::kill_group(pgid);
        }
    }

    fn untrack(&self, pgid: u32) {
        if let Ok(mut children) = self.children.lock() {
            children.remove(&pgid);
        }
    }
}

/// Removes its process group from the token when dropped.
#[derive(Debug)]
pub struct TrackedChild<'a> {
    token: &'a CancelToken,
    pgid: u32,
}

impl Drop for TrackedChild<'_> {
    fn drop(&mut self) {
        self.token.untrack(self.pgid);
    }
}

/// Install signal handlers that cancel `token`.
///
/// The handlers are registered before this returns, so a signal arriving
/// right after it cancels the run instead of terminating the process.
pub fn install(token: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    let mut listener = {
        let _entered = runtime.enter();
        Listener::register()?
    };

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                listener.recv().await;
                warn!("interrupt received, stopping after the current task");
                token.cancel();
                listener.recv().await;
                error!("second interrupt received, exiting");
                token.kill_children();
                std::process::exit(exit_codes::CANCELLED);
            });
        })
        .context("spawn signal thread")?;
    Ok(())
}

#[cfg(unix)]
struct Listener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Listener {
    fn register() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("register SIGINT handler")?,
            terminate: signal(SignalKind::terminate()).context("register SIGTERM handler")?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(windows)]
struct Listener {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl Listener {
    fn register() -> Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c().context("register ctrl-c handler")?,
        })
    }

    async fn recv(&mut self) {
        self.ctrl_c.recv().await;
    }
}
