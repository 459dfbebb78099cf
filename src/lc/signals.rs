//! # Process interrupt handling.
//!
//! [`Interrupt`] is a sticky flag polled at every blocking wait point of the
//! lifecycle manager; a raised flag turns into a forced stop.
//!
//! [`SignalWatcher`] raises it on a termination signal. It runs a
//! current-thread tokio runtime on a dedicated thread.
//!
//! ## Signals
//! **Unix platforms:**
//! - `SIGINT` (Ctrl-C in terminal)
//! - `SIGTERM` (default kill signal, used by systemd/Kubernetes)
//! - `SIGQUIT`
//!
//! **Windows platforms:**
//! - `Ctrl-C` via [`tokio::signal::ctrl_c`]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tokio::sync::oneshot;

use crate::lc::monitor::LcMonitor;
use crate::logif::{log_error, log_info};

/// Sticky process interrupt flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Waits for a termination signal.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Thread translating termination signals into an [`Interrupt`].
pub struct SignalWatcher {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SignalWatcher {
    pub fn spawn(interrupt: Interrupt, monitor: Arc<LcMonitor>) -> io::Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, rx) = oneshot::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("lc-signals".into())
            .spawn(move || {
                rt.block_on(async move {
                    tokio::select! {
                        res = wait_for_shutdown_signal() => match res {
                            Ok(()) => {
                                log_info!(2401, "termination signal received");
                                interrupt.raise();
                                monitor.notify();
                            }
                            Err(err) => log_error!(2402, error = %err, "signal registration failed"),
                        },
                        _ = rx => {}
                    }
                });
            })?;

        Ok(Self {
            stop: Some(tx),
            handle: Some(handle),
        })
    }

    /// Stops watching and joins the thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
