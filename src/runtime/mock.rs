//! Mock container runtime for testing.
//!
//! Records every call in order and can be scripted to fail any operation or
//! to emit fixed output, without touching a real engine.

use super::{ContainerRuntime, LogStream};
use crate::container::{ContainerHandle, ContainerSpec, ExecHandle, ExecRequest};
use crate::error::{DockhandError, Result};
use crate::image::ImageReference;
use crate::logs::{LogLine, LogOptions};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// A call received by the mock runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Pull(String),
    Create(String),
    Start(String),
    Stop(String),
    ExecCreate(String, Vec<String>),
    ExecStart(String),
    Logs(String),
}

/// Operations that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Pull,
    Create,
    Start,
    Stop,
    ExecCreate,
    ExecStart,
    Logs,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<RuntimeCall>,
    failures: HashSet<Operation>,
    next_id: usize,
}

/// In-memory runtime that records the calls made against it.
#[derive(Debug, Clone)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
    container_id: Option<String>,
    log_lines: Vec<LogLine>,
    exec_lines: Vec<LogLine>,
    /// Keep the log stream open after the scripted lines
    follow_forever: bool,
    delays: HashMap<Operation, Duration>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Create a new mock runtime instance.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            container_id: None,
            log_lines: Vec::new(),
            exec_lines: Vec::new(),
            follow_forever: false,
            delays: HashMap::new(),
        }
    }

    /// Return this ID from `create_container` instead of a generated one.
    pub fn with_container_id(mut self, id: &str) -> Self {
        self.container_id = Some(id.to_string());
        self
    }

    /// Make an operation fail.
    pub fn failing(self, operation: Operation) -> Self {
        self.lock().failures.insert(operation);
        self
    }

    /// Lines emitted by `stream_logs`.
    pub fn with_logs(mut self, lines: Vec<LogLine>) -> Self {
        self.log_lines = lines;
        self
    }

    /// Lines emitted by `exec_start`.
    pub fn with_exec_output(mut self, lines: Vec<LogLine>) -> Self {
        self.exec_lines = lines;
        self
    }

    /// Keep the log stream pending after its scripted lines, like a followed
    /// container that is still running.
    pub fn follow_forever(mut self) -> Self {
        self.follow_forever = true;
        self
    }

    /// Delay every call of an operation.
    pub fn with_delay(mut self, operation: Operation, delay: Duration) -> Self {
        self.delays.insert(operation, delay);
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Number of `stop_container` calls received.
    pub fn stop_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Stop(_)))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the calls recorded so far.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a call, apply its delay and report whether it should fail.
    async fn record(&self, call: RuntimeCall, operation: Operation) -> bool {
        debug!("MockRuntime: {:?}", call);
        let fail = {
            let mut state = self.lock();
            state.calls.push(call);
            state.failures.contains(&operation)
        };
        if let Some(delay) = self.delays.get(&operation) {
            tokio::time::sleep(*delay).await;
        }
        fail
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn pull_image(&self, image: &ImageReference) -> Result<()> {
        if self.record(RuntimeCall::Pull(image.to_string()), Operation::Pull).await {
            return Err(DockhandError::Pull {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            });
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        if self.record(RuntimeCall::Create(spec.name.clone()), Operation::Create).await {
            return Err(DockhandError::Create {
                name: spec.name.clone(),
                message: "name already in use".to_string(),
            });
        }
        let id = match &self.container_id {
            Some(id) => id.clone(),
            None => {
                let mut state = self.lock();
                state.next_id += 1;
                format!("mock-container-{}", state.next_id)
            }
        };
        Ok(ContainerHandle::new(id))
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<()> {
        if self.record(RuntimeCall::Start(handle.to_string()), Operation::Start).await {
            return Err(DockhandError::Start {
                container: handle.to_string(),
                message: "port is already allocated".to_string(),
            });
        }
        Ok(())
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()> {
        if self
            .record(RuntimeCall::Stop(handle.to_string()), Operation::Stop)
            .await
        {
            return Err(DockhandError::Stop {
                container: handle.to_string(),
                message: "engine refused to stop container".to_string(),
            });
        }
        Ok(())
    }

    async fn exec_create(
        &self,
        handle: &ContainerHandle,
        request: &ExecRequest,
    ) -> Result<ExecHandle> {
        let call = RuntimeCall::ExecCreate(handle.to_string(), request.cmd.clone());
        if self.record(call, Operation::ExecCreate).await {
            return Err(DockhandError::Exec {
                container: handle.to_string(),
                message: "container is not running".to_string(),
            });
        }
        Ok(ExecHandle::new(format!("exec-{}", handle)))
    }

    async fn exec_start(&self, exec: &ExecHandle) -> Result<LogStream> {
        if self.record(RuntimeCall::ExecStart(exec.to_string()), Operation::ExecStart).await {
            return Err(DockhandError::Exec {
                container: exec.to_string(),
                message: "exec start failed".to_string(),
            });
        }
        let lines = self.exec_lines.clone();
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    async fn stream_logs(
        &self,
        handle: &ContainerHandle,
        _options: LogOptions,
    ) -> Result<LogStream> {
        if self.record(RuntimeCall::Logs(handle.to_string()), Operation::Logs).await {
            return Err(DockhandError::LogStream(format!(
                "cannot attach to {}",
                handle
            )));
        }
        let lines = futures::stream::iter(self.log_lines.clone().into_iter().map(Ok));
        if self.follow_forever {
            Ok(lines.chain(futures::stream::pending()).boxed())
        } else {
            Ok(lines.boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let runtime = MockRuntime::new().with_container_id("abc123");
        let image = ImageReference::parse("ollama/ollama").unwrap();

        runtime.pull_image(&image).await.unwrap();
        let handle = runtime
            .create_container(&ContainerSpec::default())
            .await
            .unwrap();
        runtime.start_container(&handle).await.unwrap();
        runtime.stop_container(&handle).await.unwrap();

        assert_eq!(
            runtime.calls(),
            vec![
                RuntimeCall::Pull("ollama/ollama:latest".to_string()),
                RuntimeCall::Create("ollama-dockhand".to_string()),
                RuntimeCall::Start("abc123".to_string()),
                RuntimeCall::Stop("abc123".to_string()),
            ]
        );
        assert_eq!(runtime.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let runtime = MockRuntime::new().failing(Operation::Create);
        let result = runtime.create_container(&ContainerSpec::default()).await;
        assert!(matches!(result, Err(DockhandError::Create { .. })));
    }

    #[tokio::test]
    async fn test_generated_ids_are_unique() {
        let runtime = MockRuntime::new();
        let spec = ContainerSpec::default();
        let a = runtime.create_container(&spec).await.unwrap();
        let b = runtime.create_container(&spec).await.unwrap();
        assert_ne!(a, b);
    }
}
