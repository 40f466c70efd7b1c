//! One-shot commands inside the running container

use crate::container::{ContainerHandle, ExecRequest, ExecResult};
use crate::error::{DockhandError, Result};
use crate::logs::LogSink;
use crate::runtime::ContainerRuntime;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs a command inside a container and waits for it to finish
#[derive(Clone)]
pub struct ExecRunner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ExecRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Create and start an exec context, forwarding its output to `sink`
    /// until the command's output stream ends.
    ///
    /// Errors leave the container itself untouched.
    pub async fn run(
        &self,
        handle: &ContainerHandle,
        request: &ExecRequest,
        sink: &mut dyn LogSink,
    ) -> Result<ExecResult> {
        if request.cmd.is_empty() {
            return Err(DockhandError::Exec {
                container: handle.to_string(),
                message: "empty command".to_string(),
            });
        }

        info!(container = %handle.short(), "Running {}", request.cmd.join(" "));
        let exec_id = self
            .runtime
            .exec_create(handle, request)
            .await
            .map_err(|e| exec_error(handle, e))?;
        debug!(exec = %exec_id, "Exec context created");

        let mut output = self
            .runtime
            .exec_start(&exec_id)
            .await
            .map_err(|e| exec_error(handle, e))?;
        let mut frames = 0;
        while let Some(frame) = output.next().await {
            let line = frame.map_err(|e| exec_error(handle, e))?;
            sink.write_line(&line);
            frames += 1;
        }

        info!(container = %handle.short(), frames, "Command finished");
        Ok(ExecResult {
            exec_id,
            frames,
            completed: true,
        })
    }
}

/// Any failure while running a command is reported as an exec error.
fn exec_error(handle: &ContainerHandle, err: DockhandError) -> DockhandError {
    match err {
        DockhandError::Exec { .. } => err,
        other => DockhandError::Exec {
            container: handle.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{LogLine, MemorySink};
    use crate::runtime::mock::Operation;
    use crate::runtime::{MockRuntime, RuntimeCall};

    #[tokio::test]
    async fn test_run_forwards_output() {
        let output = vec![
            LogLine::stdout("pulling manifest\n"),
            LogLine::stderr("pulling 7f4030143c1c: 100%\n"),
            LogLine::stdout("success\n"),
        ];
        let runtime = MockRuntime::new().with_exec_output(output.clone());
        let runner = ExecRunner::new(Arc::new(runtime.clone()));
        let mut sink = MemorySink::new();

        let handle = ContainerHandle::new("abc123");
        let request = ExecRequest::pull_model("qwen3:0.6b");
        let result = runner.run(&handle, &request, &mut sink).await.unwrap();

        assert!(result.completed);
        assert_eq!(result.frames, 3);
        assert_eq!(sink.lines(), output);
        assert_eq!(
            runtime.calls(),
            vec![
                RuntimeCall::ExecCreate(
                    "abc123".to_string(),
                    vec!["ollama".into(), "pull".into(), "qwen3:0.6b".into()]
                ),
                RuntimeCall::ExecStart(result.exec_id.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_failure_surfaces() {
        let runtime = MockRuntime::new().failing(Operation::ExecCreate);
        let runner = ExecRunner::new(Arc::new(runtime.clone()));

        let result = runner
            .run(
                &ContainerHandle::new("abc123"),
                &ExecRequest::pull_model("qwen3:0.6b"),
                &mut MemorySink::new(),
            )
            .await;
        assert!(matches!(result, Err(DockhandError::Exec { .. })));
        assert_eq!(runtime.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let runtime = MockRuntime::new();
        let runner = ExecRunner::new(Arc::new(runtime.clone()));

        let request = ExecRequest::new(Vec::<String>::new());
        let result = runner
            .run(&ContainerHandle::new("abc123"), &request, &mut MemorySink::new())
            .await;
        assert!(result.is_err());
        assert!(runtime.calls().is_empty());
    }
}
