//! Termination signals

use crate::error::Result;

/// What asked for the shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// The bounded idle wait ran out
    Deadline,
    /// The container's log stream closed on its own
    StreamEnded,
    /// Following the container failed, normally because the runtime went away
    Error,
}

impl std::fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownTrigger::Interrupt => write!(f, "interrupt"),
            ShutdownTrigger::Terminate => write!(f, "terminate"),
            ShutdownTrigger::Deadline => write!(f, "deadline"),
            ShutdownTrigger::StreamEnded => write!(f, "stream ended"),
            ShutdownTrigger::Error => write!(f, "error"),
        }
    }
}

/// Process signal handlers, installed as soon as this is created
#[cfg(unix)]
pub struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    /// Install handlers for SIGINT and SIGTERM
    pub fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next termination signal
    pub async fn recv(&mut self) -> ShutdownTrigger {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownTrigger::Interrupt,
            _ = self.terminate.recv() => ShutdownTrigger::Terminate,
        }
    }
}

#[cfg(not(unix))]
pub struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    pub fn install() -> Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> ShutdownTrigger {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownTrigger::Interrupt,
            // Without a working handler the only way out is another trigger.
            Err(_) => std::future::pending().await,
        }
    }
}
