//! Dockhand - single-container session supervisor
//!
//! Dockhand runs one container against a Docker-compatible engine for the
//! length of a session:
//!
//! - Image pull and container creation with published ports
//! - Log following and a one-shot setup command inside the container
//! - Stop-exactly-once shutdown on Ctrl+C, SIGTERM or a deadline

pub mod container;
pub mod error;
pub mod exec;
pub mod image;
pub mod logs;
pub mod runtime;
pub mod shutdown;
pub mod supervisor;

pub use error::{DockhandError, Result};
