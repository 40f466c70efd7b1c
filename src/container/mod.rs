//! Container management module
//!
//! Describes the supervised container and drives it through its lifecycle.

pub mod config;
pub mod lifecycle;

pub use config::{
    ContainerHandle, ContainerSpec, ExecHandle, ExecRequest, ExecResult, PortMapping, Protocol,
};
pub use lifecycle::{LifecycleManager, LifecycleState};
