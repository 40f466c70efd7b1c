//! Container runtime boundary
//!
//! Every primitive the supervisor needs from a container engine goes through
//! [`ContainerRuntime`]. [`DockerRuntime`] talks to a Docker-compatible engine;
//! [`MockRuntime`] records calls in memory for tests.

pub mod docker;
pub mod mock;

pub use docker::{DockerConfig, DockerRuntime};
pub use mock::{MockRuntime, RuntimeCall};

use crate::container::{ContainerHandle, ContainerSpec, ExecHandle, ExecRequest};
use crate::error::Result;
use crate::image::ImageReference;
use crate::logs::{LogLine, LogOptions};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Ordered output frames. The stream ending is the completion signal.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogLine>> + Send>>;

/// Primitive operations of a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image, resolving once the pull has completed
    async fn pull_image(&self, image: &ImageReference) -> Result<()>;

    /// Create a container, returning its runtime handle
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Start a created container
    async fn start_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Stop a container. Stopping an already stopped (or auto-removed)
    /// container succeeds.
    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Create an exec context inside a running container
    async fn exec_create(
        &self,
        handle: &ContainerHandle,
        request: &ExecRequest,
    ) -> Result<ExecHandle>;

    /// Start an exec context with its output attached
    async fn exec_start(&self, exec: &ExecHandle) -> Result<LogStream>;

    /// Attach to a container's output
    async fn stream_logs(&self, handle: &ContainerHandle, options: LogOptions)
        -> Result<LogStream>;
}
