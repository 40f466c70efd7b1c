//! Container lifecycle management

use super::config::{ContainerHandle, ContainerSpec};
use crate::error::{DockhandError, Result};
use crate::image::{ImageFetcher, ImageReference};
use crate::runtime::ContainerRuntime;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Lifecycle state of the supervised container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing has happened yet
    Unstarted,
    /// Image pull in progress
    Pulling,
    /// Image is present, container creation pending
    Creating,
    /// Container exists but is not running
    Created,
    /// Container process is running
    Running,
    /// Stop requested
    Stopping,
    /// Container has stopped
    Stopped,
    /// A step failed; nothing further runs
    Failed,
}

impl LifecycleState {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Unstarted => write!(f, "unstarted"),
            LifecycleState::Pulling => write!(f, "pulling"),
            LifecycleState::Creating => write!(f, "creating"),
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: LifecycleState,
    handle: Option<ContainerHandle>,
}

/// Owns the create/start/stop state machine of exactly one container.
///
/// Only this type issues start and stop calls against the handle. State is
/// updated under a lock that is never held across a runtime call.
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    fetcher: ImageFetcher,
    lifecycle: RwLock<Lifecycle>,
}

impl LifecycleManager {
    /// Create a new lifecycle manager
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            fetcher: ImageFetcher::new(runtime.clone()),
            runtime,
            lifecycle: RwLock::new(Lifecycle {
                state: LifecycleState::Unstarted,
                handle: None,
            }),
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.read().state
    }

    /// Handle of the container, once created
    pub fn handle(&self) -> Option<ContainerHandle> {
        self.read().handle.clone()
    }

    /// Pull an image ahead of creation
    pub async fn pull(&self, image: &ImageReference) -> Result<()> {
        self.transition("pull", &[LifecycleState::Unstarted], LifecycleState::Pulling)?;

        match self.fetcher.fetch(image).await {
            Ok(()) => {
                self.set_state(LifecycleState::Creating);
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    /// Create the container. The image must have been pulled.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.check("create", &[LifecycleState::Creating])?;

        info!("Creating container {} from {}", spec.name, spec.image);
        match self.runtime.create_container(spec).await {
            Ok(handle) => {
                let mut lifecycle = self.write();
                lifecycle.state = LifecycleState::Created;
                lifecycle.handle = Some(handle.clone());
                info!(container = %handle.short(), "Container {} created", spec.name);
                Ok(handle)
            }
            Err(e) => {
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    /// Start the created container
    pub async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        self.check_handle(handle)?;
        self.check("start", &[LifecycleState::Created])?;

        info!(container = %handle.short(), "Starting container");
        match self.runtime.start_container(handle).await {
            Ok(()) => {
                self.set_state(LifecycleState::Running);
                Ok(())
            }
            Err(e) => {
                // The handle stays recorded for diagnostics.
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    /// Stop the container.
    ///
    /// Stopping a container that is already stopped, or being stopped, is a
    /// successful no-op that never reaches the runtime.
    pub async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        self.check_handle(handle)?;

        {
            let mut lifecycle = self.write();
            match lifecycle.state {
                LifecycleState::Created | LifecycleState::Running => {
                    lifecycle.state = LifecycleState::Stopping;
                }
                state => {
                    debug!(container = %handle.short(), %state, "Nothing to stop");
                    return Ok(());
                }
            }
        }

        info!(container = %handle.short(), "Stopping container");
        match self.runtime.stop_container(handle).await {
            Ok(()) => {
                self.set_state(LifecycleState::Stopped);
                Ok(())
            }
            Err(e) => {
                warn!(container = %handle.short(), "Stop failed: {}", e);
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    /// Give up on a run that has not created a container yet, e.g. when the
    /// pull was interrupted. Returns whether the run was abandoned.
    pub fn abandon(&self) -> bool {
        let mut lifecycle = self.write();
        match lifecycle.state {
            LifecycleState::Unstarted | LifecycleState::Pulling | LifecycleState::Creating => {
                lifecycle.state = LifecycleState::Failed;
                true
            }
            _ => false,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Lifecycle> {
        // State writes are single assignments, so a poisoned lock still holds
        // a consistent value.
        self.lifecycle.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: LifecycleState) {
        let mut lifecycle = self.write();
        debug!(from = %lifecycle.state, to = %state, "Lifecycle transition");
        lifecycle.state = state;
    }

    fn check(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<()> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(DockhandError::InvalidState {
                operation,
                state: state.to_string(),
            })
        }
    }

    fn transition(
        &self,
        operation: &'static str,
        allowed: &[LifecycleState],
        to: LifecycleState,
    ) -> Result<()> {
        let mut lifecycle = self.write();
        if !allowed.contains(&lifecycle.state) {
            return Err(DockhandError::InvalidState {
                operation,
                state: lifecycle.state.to_string(),
            });
        }
        debug!(from = %lifecycle.state, to = %to, "Lifecycle transition");
        lifecycle.state = to;
        Ok(())
    }

    fn check_handle(&self, handle: &ContainerHandle) -> Result<()> {
        let lifecycle = self.read();
        match &lifecycle.handle {
            Some(owned) if owned == handle => Ok(()),
            _ => Err(DockhandError::InvalidState {
                operation: "use a foreign container handle",
                state: lifecycle.state.to_string(),
            }),
        }
    }
}
