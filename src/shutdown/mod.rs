//! Shutdown coordination
//!
//! The container must be stopped exactly once, whatever ends the run: a
//! signal, the idle wait running out, the container exiting by itself or an
//! error. Every path calls [`ShutdownCoordinator::trigger`]; a one-shot
//! [`ShutdownToken`] lets only the first caller through to the runtime.

pub mod signal;

pub use signal::{ShutdownTrigger, SignalListener};

use crate::container::{ContainerHandle, LifecycleManager};
use crate::error::DockhandError;
use crate::logs::LogStreamTask;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Single-use capability. Clones share the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    used: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the token. Returns `true` for exactly one caller, however
    /// many race for it.
    pub fn consume(&self) -> bool {
        self.used
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the token has been consumed
    pub fn is_consumed(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }
}

/// Result of a call to [`ShutdownCoordinator::trigger`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// This call stopped the container
    Stopped,
    /// This call tried to stop the container and the runtime refused
    StopFailed(String),
    /// The stop call did not return in time
    TimedOut,
    /// Another path already ran the shutdown
    AlreadyTriggered,
}

/// Stops the container once, from whichever path gets there first.
///
/// Holds the container handle by reference only; the stop itself goes through
/// the [`LifecycleManager`].
pub struct ShutdownCoordinator {
    lifecycle: Arc<LifecycleManager>,
    handle: ContainerHandle,
    token: ShutdownToken,
    stop_timeout: Duration,
    requested: CancellationToken,
    completed: CancellationToken,
    log_task: Mutex<Option<LogStreamTask>>,
    trigger: Mutex<Option<ShutdownTrigger>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator for `handle`. `stop_timeout` bounds how long a
    /// shutdown waits for the runtime before giving up.
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        handle: ContainerHandle,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            handle,
            token: ShutdownToken::new(),
            stop_timeout,
            requested: CancellationToken::new(),
            completed: CancellationToken::new(),
            log_task: Mutex::new(None),
            trigger: Mutex::new(None),
        }
    }

    /// Hand over the log task so the shutdown path cancels it.
    pub fn attach_log_task(&self, task: LogStreamTask) {
        let previous = self
            .log_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.cancel();
        }
        if self.token.is_consumed() {
            self.cancel_log_task();
        }
    }

    /// What started the shutdown, once one has started
    pub fn triggered_by(&self) -> Option<ShutdownTrigger> {
        *self.trigger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolves as soon as any path has started the shutdown
    pub async fn requested(&self) {
        self.requested.cancelled().await
    }

    /// Resolves once the shutdown path has finished
    pub async fn completed(&self) {
        self.completed.cancelled().await
    }

    /// Register the termination handler: once `interrupt` resolves, the
    /// shutdown path runs. The handler retires without firing if another path
    /// completes the shutdown first.
    pub fn register_handler<F>(self: &Arc<Self>, interrupt: F) -> JoinHandle<ShutdownOutcome>
    where
        F: Future<Output = ShutdownTrigger> + Send + 'static,
    {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                trigger = interrupt => coordinator.trigger(trigger).await,
                _ = coordinator.completed() => ShutdownOutcome::AlreadyTriggered,
            }
        })
    }

    /// Run the shutdown path. Only the first call reaches the runtime; later
    /// or concurrent calls wait for it to finish and return
    /// [`ShutdownOutcome::AlreadyTriggered`].
    ///
    /// Never panics and never waits longer than the stop timeout.
    pub async fn trigger(&self, trigger: ShutdownTrigger) -> ShutdownOutcome {
        if !self.token.consume() {
            debug!(%trigger, "Shutdown already triggered");
            self.completed().await;
            return ShutdownOutcome::AlreadyTriggered;
        }

        *self.trigger.lock().unwrap_or_else(|e| e.into_inner()) = Some(trigger);
        self.requested.cancel();
        info!(%trigger, container = %self.handle.short(), "Shutting down");

        self.cancel_log_task();

        println!("\nStopping container...");
        let outcome =
            match tokio::time::timeout(self.stop_timeout, self.lifecycle.stop(&self.handle)).await
            {
                Ok(Ok(())) => {
                    println!("Container stopped successfully.");
                    ShutdownOutcome::Stopped
                }
                Ok(Err(e)) => {
                    eprintln!("Error stopping container: {}", e);
                    error!("Failed to stop container {}: {}", self.handle.short(), e);
                    ShutdownOutcome::StopFailed(stop_message(e))
                }
                Err(_) => {
                    eprintln!(
                        "Error stopping container: no answer within {}s",
                        self.stop_timeout.as_secs()
                    );
                    warn!(
                        container = %self.handle.short(),
                        "Stop did not complete within {:?}",
                        self.stop_timeout
                    );
                    ShutdownOutcome::TimedOut
                }
            };

        self.completed.cancel();
        outcome
    }

    /// Cancel the attached log task, if any, and wait briefly for it to let go
    /// of its connection.
    pub async fn drain_log_task(&self) {
        let task = self
            .log_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            match tokio::time::timeout(Duration::from_secs(5), task.shutdown()).await {
                Ok(Ok(summary)) => debug!(lines = summary.lines, "Log task finished"),
                Ok(Err(e)) => warn!("Log task ended with error: {}", e),
                Err(_) => warn!("Log task did not finish in time"),
            }
        }
    }

    fn cancel_log_task(&self) {
        if let Some(task) = self
            .log_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            task.cancel();
        }
    }
}

fn stop_message(err: DockhandError) -> String {
    match err {
        DockhandError::Stop { message, .. } => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerSpec, LifecycleState};
    use crate::logs::{LogLine, LogOptions, LogStreamer, MemorySink};
    use crate::runtime::mock::Operation;
    use crate::runtime::MockRuntime;

    async fn running(runtime: &MockRuntime) -> (Arc<LifecycleManager>, ContainerHandle) {
        let lifecycle = Arc::new(LifecycleManager::new(Arc::new(runtime.clone())));
        let spec = ContainerSpec::default();
        lifecycle.pull(&spec.image_reference().unwrap()).await.unwrap();
        let handle = lifecycle.create(&spec).await.unwrap();
        lifecycle.start(&handle).await.unwrap();
        (lifecycle, handle)
    }

    #[test]
    fn test_token_single_use() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!token.is_consumed());
        assert!(clone.consume());
        assert!(!token.consume());
        assert!(token.is_consumed());
    }

    #[tokio::test]
    async fn test_trigger_stops_once() {
        let runtime = MockRuntime::new().with_container_id("abc123");
        let (lifecycle, handle) = running(&runtime).await;
        let coordinator = ShutdownCoordinator::new(lifecycle.clone(), handle, Duration::from_secs(5));

        assert_eq!(
            coordinator.trigger(ShutdownTrigger::Deadline).await,
            ShutdownOutcome::Stopped
        );
        assert_eq!(
            coordinator.trigger(ShutdownTrigger::Interrupt).await,
            ShutdownOutcome::AlreadyTriggered
        );
        assert_eq!(runtime.stop_count(), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert_eq!(coordinator.triggered_by(), Some(ShutdownTrigger::Deadline));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_stop_once() {
        let runtime = MockRuntime::new()
            .with_container_id("abc123")
            .with_delay(Operation::Stop, Duration::from_millis(50));
        let (lifecycle, handle) = running(&runtime).await;
        let coordinator = Arc::new(ShutdownCoordinator::new(
            lifecycle,
            handle,
            Duration::from_secs(5),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = coordinator.clone();
                let trigger = if i % 2 == 0 {
                    ShutdownTrigger::Interrupt
                } else {
                    ShutdownTrigger::Deadline
                };
                tokio::spawn(async move { coordinator.trigger(trigger).await })
            })
            .collect();

        let mut stopped = 0;
        for task in tasks {
            match task.await.unwrap() {
                ShutdownOutcome::Stopped => stopped += 1,
                ShutdownOutcome::AlreadyTriggered => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(stopped, 1);
        assert_eq!(runtime.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_handler_and_fall_through_stop_once() {
        let runtime = MockRuntime::new().with_container_id("abc123");
        let (lifecycle, handle) = running(&runtime).await;
        let coordinator = Arc::new(ShutdownCoordinator::new(
            lifecycle,
            handle,
            Duration::from_secs(5),
        ));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handler = coordinator.register_handler(async move {
            let _ = rx.await;
            ShutdownTrigger::Interrupt
        });

        tx.send(()).unwrap();
        let fall_through = coordinator.trigger(ShutdownTrigger::Deadline).await;
        let from_handler = handler.await.unwrap();

        let outcomes = [fall_through, from_handler];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == ShutdownOutcome::Stopped)
                .count(),
            1
        );
        assert_eq!(runtime.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_handler_retires_after_shutdown() {
        let runtime = MockRuntime::new().with_container_id("abc123");
        let (lifecycle, handle) = running(&runtime).await;
        let coordinator = Arc::new(ShutdownCoordinator::new(
            lifecycle,
            handle,
            Duration::from_secs(5),
        ));

        let handler = coordinator.register_handler(std::future::pending());
        coordinator.trigger(ShutdownTrigger::Deadline).await;

        let outcome = tokio::time::timeout(Duration::from_secs(1), handler)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ShutdownOutcome::AlreadyTriggered);
    }

    #[tokio::test]
    async fn test_stop_failure_is_reported_not_raised() {
        let runtime = MockRuntime::new()
            .with_container_id("abc123")
            .failing(Operation::Stop);
        let (lifecycle, handle) = running(&runtime).await;
        let coordinator = ShutdownCoordinator::new(lifecycle, handle, Duration::from_secs(5));

        let outcome = coordinator.trigger(ShutdownTrigger::Interrupt).await;
        assert!(matches!(outcome, ShutdownOutcome::StopFailed(_)));
        // The completion signal still fires so the process can exit.
        tokio::time::timeout(Duration::from_secs(1), coordinator.completed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_slow_stop_times_out() {
        let runtime = MockRuntime::new()
            .with_container_id("abc123")
            .with_delay(Operation::Stop, Duration::from_secs(30));
        let (lifecycle, handle) = running(&runtime).await;
        let coordinator =
            ShutdownCoordinator::new(lifecycle, handle, Duration::from_millis(50));

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.trigger(ShutdownTrigger::Interrupt),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ShutdownOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_trigger_cancels_log_task() {
        let runtime = MockRuntime::new()
            .with_container_id("abc123")
            .with_logs(vec![LogLine::stdout("ready\n")])
            .follow_forever();
        let (lifecycle, handle) = running(&runtime).await;
        let coordinator =
            ShutdownCoordinator::new(lifecycle, handle.clone(), Duration::from_secs(5));

        let streamer = LogStreamer::new(Arc::new(runtime.clone()));
        let task = streamer.spawn(
            handle,
            LogOptions::default(),
            Box::new(MemorySink::new()),
            CancellationToken::new(),
        );
        coordinator.attach_log_task(task);

        coordinator.trigger(ShutdownTrigger::Interrupt).await;
        tokio::time::timeout(Duration::from_secs(5), coordinator.drain_log_task())
            .await
            .unwrap();
    }
}
