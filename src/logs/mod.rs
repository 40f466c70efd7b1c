//! Container log streaming
//!
//! A [`LogStreamer`] attaches to a container's combined stdout/stderr with
//! follow semantics and forwards each frame to a [`LogSink`] from its own
//! task, so the rest of the supervisor never waits on output.

pub mod line;

pub use line::{LogLine, LogOptions, LogSource};

use crate::container::ContainerHandle;
use crate::error::{DockhandError, Result};
use crate::runtime::ContainerRuntime;
use futures::StreamExt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Prefix for the container's own output
pub const CONTAINER_LOG_PREFIX: &str = "[CONTAINER LOG]";

/// Prefix for output of commands run inside the container
pub const COMMAND_LOG_PREFIX: &str = "[CONTAINER LOG COMMAND]";

/// Destination for forwarded log frames
pub trait LogSink: Send {
    fn write_line(&mut self, line: &LogLine);
}

impl<F> LogSink for F
where
    F: FnMut(&LogLine) + Send,
{
    fn write_line(&mut self, line: &LogLine) {
        self(line)
    }
}

/// Writes frames to the host's stdout behind a fixed prefix
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    prefix: &'static str,
}

impl ConsoleSink {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }

    /// Sink for the container's main log
    pub fn container() -> Self {
        Self::new(CONTAINER_LOG_PREFIX)
    }

    /// Sink for exec output
    pub fn command() -> Self {
        Self::new(COMMAND_LOG_PREFIX)
    }
}

impl LogSink for ConsoleSink {
    fn write_line(&mut self, line: &LogLine) {
        let mut out = std::io::stdout().lock();
        // A closed stdout must not take the supervisor down with it.
        let _ = writeln!(out, "{} {}", self.prefix, line);
    }
}

/// Collects frames in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames received so far
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn write_line(&mut self, line: &LogLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.clone());
        }
    }
}

/// How a log stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The runtime closed the stream, normally because the container stopped
    Closed,
    /// The stream was cancelled from the shutdown path
    Cancelled,
}

/// Summary returned by a finished log task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub lines: usize,
    pub end: StreamEnd,
}

/// Spawns log-following tasks against a runtime
#[derive(Clone)]
pub struct LogStreamer {
    runtime: Arc<dyn ContainerRuntime>,
}

impl LogStreamer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Follow a container's output on a dedicated task until the stream
    /// closes or `cancel` fires.
    pub fn spawn(
        &self,
        handle: ContainerHandle,
        options: LogOptions,
        mut sink: Box<dyn LogSink>,
        cancel: CancellationToken,
    ) -> LogStreamTask {
        let runtime = self.runtime.clone();
        let closed = CancellationToken::new();
        let failed = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_closed = closed.clone();
        let task_failed = failed.clone();

        let join = tokio::spawn(async move {
            let summary =
                follow(runtime.as_ref(), &handle, options, sink.as_mut(), &task_cancel).await;
            match &summary {
                Ok(StreamSummary { end: StreamEnd::Closed, .. }) => task_closed.cancel(),
                Ok(_) => {}
                Err(e) => {
                    error!(container = %handle.short(), "Lost container output: {}", e);
                    task_failed.cancel();
                }
            }
            summary
        });

        LogStreamTask {
            join,
            cancel,
            closed,
            failed,
        }
    }
}

async fn follow(
    runtime: &dyn ContainerRuntime,
    handle: &ContainerHandle,
    options: LogOptions,
    sink: &mut dyn LogSink,
    cancel: &CancellationToken,
) -> Result<StreamSummary> {
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Ok(StreamSummary { lines: 0, end: StreamEnd::Cancelled });
        }
        attached = runtime.stream_logs(handle, options) => attached?,
    };
    debug!(container = %handle.short(), "Attached to container logs");

    let mut lines = 0;
    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            next = stream.next() => match next {
                Some(Ok(line)) => {
                    sink.write_line(&line);
                    lines += 1;
                }
                Some(Err(e)) => return Err(e),
                None => break StreamEnd::Closed,
            },
        }
    };

    // Dropping the stream closes the underlying connection.
    drop(stream);
    debug!(container = %handle.short(), lines, ?end, "Log stream finished");
    Ok(StreamSummary { lines, end })
}

/// A running log-following task
#[derive(Debug)]
pub struct LogStreamTask {
    join: JoinHandle<Result<StreamSummary>>,
    cancel: CancellationToken,
    closed: CancellationToken,
    failed: CancellationToken,
}

impl LogStreamTask {
    /// Ask the task to stop following
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the task has returned
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Token cancelled when the runtime closes the stream, which normally
    /// means the container has stopped. Cancellation and errors leave it
    /// untouched.
    pub fn closed_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Token cancelled when attaching or reading fails
    pub fn failed_signal(&self) -> CancellationToken {
        self.failed.clone()
    }

    /// Wait for the task to return
    pub async fn join(self) -> Result<StreamSummary> {
        self.join
            .await
            .map_err(|e| DockhandError::LogStream(format!("log task failed: {}", e)))?
    }

    /// Cancel the task and wait for it to return
    pub async fn shutdown(self) -> Result<StreamSummary> {
        self.cancel();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::Operation;
    use crate::runtime::MockRuntime;
    use std::time::Duration;

    fn lines(n: usize) -> Vec<LogLine> {
        (0..n).map(|i| LogLine::stdout(format!("line {}\n", i))).collect()
    }

    #[tokio::test]
    async fn test_delivers_lines_in_order() {
        let runtime = MockRuntime::new().with_logs(lines(50));
        let streamer = LogStreamer::new(Arc::new(runtime));
        let sink = MemorySink::new();

        let task = streamer.spawn(
            ContainerHandle::new("abc123"),
            LogOptions::default(),
            Box::new(sink.clone()),
            CancellationToken::new(),
        );
        let closed = task.closed_signal();
        let summary = task.join().await.unwrap();

        assert_eq!(summary, StreamSummary { lines: 50, end: StreamEnd::Closed });
        assert!(closed.is_cancelled());
        let received = sink.lines();
        assert_eq!(received, lines(50));
    }

    #[tokio::test]
    async fn test_cancel_stops_followed_stream() {
        let runtime = MockRuntime::new().with_logs(lines(3)).follow_forever();
        let streamer = LogStreamer::new(Arc::new(runtime));
        let sink = MemorySink::new();

        let task = streamer.spawn(
            ContainerHandle::new("abc123"),
            LogOptions::default(),
            Box::new(sink.clone()),
            CancellationToken::new(),
        );

        // Let the task drain the scripted lines before cancelling.
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.lines().len() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!task.is_finished());

        let summary = tokio::time::timeout(Duration::from_secs(5), task.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.end, StreamEnd::Cancelled);
        assert_eq!(summary.lines, 3);
    }

    #[tokio::test]
    async fn test_cancel_before_attach() {
        let runtime = MockRuntime::new();
        let streamer = LogStreamer::new(Arc::new(runtime.clone()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task = streamer.spawn(
            ContainerHandle::new("abc123"),
            LogOptions::default(),
            Box::new(MemorySink::new()),
            cancel,
        );
        let summary = task.join().await.unwrap();
        assert_eq!(summary.end, StreamEnd::Cancelled);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_attach_failure_is_reported() {
        let runtime = MockRuntime::new().failing(Operation::Logs);
        let streamer = LogStreamer::new(Arc::new(runtime));
        let task = streamer.spawn(
            ContainerHandle::new("abc123"),
            LogOptions::default(),
            Box::new(MemorySink::new()),
            CancellationToken::new(),
        );
        let closed = task.closed_signal();
        let failed = task.failed_signal();
        assert!(matches!(task.join().await, Err(DockhandError::LogStream(_))));
        assert!(!closed.is_cancelled());
        assert!(failed.is_cancelled());
    }

    #[tokio::test]
    async fn test_closure_sink() {
        let runtime = MockRuntime::new().with_logs(lines(2));
        let streamer = LogStreamer::new(Arc::new(runtime));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let task = streamer.spawn(
            ContainerHandle::new("abc123"),
            LogOptions::default(),
            Box::new(move |line: &LogLine| {
                let _ = tx.send(line.text());
            }),
            CancellationToken::new(),
        );
        task.join().await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("line 0"));
        assert_eq!(rx.recv().await.as_deref(), Some("line 1"));
    }
}
