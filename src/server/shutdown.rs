//! Graceful shutdown handling
//!
//! SIGTERM or SIGINT flips a watch channel. The controller stops picking up
//! new keys and lets in-flight reconciles finish, the health server drains.

use tokio::sync::watch;
use tracing::info;

/// Receiving side of the shutdown channel, cheap to clone
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown was triggered
    pub async fn wait(mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // Sender dropped, treat as shutdown
                break;
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn shutdown(&self) {
        let _ = self.sender.send(true);
        info!("Shutdown signal sent");
    }
}

/// Create a new shutdown pair
///
/// The signal is cloned into every component that has to stop on shutdown.
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Wait for SIGTERM or SIGINT, returning the name of the signal received
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = name, "Received termination signal");
    Ok(name)
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok("CTRL_C")
}
