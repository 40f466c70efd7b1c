//! Container configuration

use crate::error::{DockhandError, Result};
use crate::image::ImageReference;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Image served by default
pub const DEFAULT_IMAGE: &str = "ollama/ollama:latest";

/// Container name used when none is given
pub const DEFAULT_CONTAINER_NAME: &str = "ollama-dockhand";

/// Port the model server listens on inside the container
pub const DEFAULT_PORT: u16 = 11434;

/// Model pulled by the setup command
pub const DEFAULT_MODEL: &str = "qwen3:0.6b";

/// Specification of the single container supervised per run.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image reference
    pub image: String,
    /// Container name, unique per run
    pub name: String,
    /// Exposed ports with their optional host bindings
    pub ports: Vec<PortMapping>,
    /// Let the runtime delete the container once it stops
    pub auto_remove: bool,
}

impl ContainerSpec {
    /// Create a new container specification
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            image: image.to_string(),
            name: name.to_string(),
            ports: Vec::new(),
            auto_remove: true,
        }
    }

    /// Expose a container port and publish it on the host
    pub fn port(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push(PortMapping {
            container_port,
            host_port: Some(host_port),
            protocol: Protocol::Tcp,
        });
        self
    }

    /// Expose a container port without publishing it
    pub fn expose(mut self, container_port: u16) -> Self {
        self.ports.push(PortMapping {
            container_port,
            host_port: None,
            protocol: Protocol::Tcp,
        });
        self
    }

    /// Set the auto-remove flag
    pub fn auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }

    /// Parsed image reference
    pub fn image_reference(&self) -> Result<ImageReference> {
        ImageReference::parse(&self.image)
    }

    /// Ports that are published on the host
    pub fn published(&self) -> impl Iterator<Item = &PortMapping> {
        self.ports.iter().filter(|p| p.host_port.is_some())
    }

    /// Check the specification before it reaches the runtime.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DockhandError::InvalidConfig(
                "container name must not be empty".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(DockhandError::InvalidConfig(format!(
                "invalid container name: {}",
                self.name
            )));
        }

        self.image_reference()?;

        // One entry per exposed port, so each has exactly one binding or none.
        let mut seen = HashSet::new();
        for mapping in &self.ports {
            if mapping.container_port == 0 || mapping.host_port == Some(0) {
                return Err(DockhandError::InvalidConfig(format!(
                    "port 0 is not a valid binding ({})",
                    mapping
                )));
            }
            if !seen.insert((mapping.container_port, mapping.protocol)) {
                return Err(DockhandError::InvalidConfig(format!(
                    "port {} is exposed more than once",
                    mapping.port_key()
                )));
            }
        }

        let mut host_ports = HashSet::new();
        for mapping in self.published() {
            if let Some(host_port) = mapping.host_port {
                if !host_ports.insert((host_port, mapping.protocol)) {
                    return Err(DockhandError::InvalidConfig(format!(
                        "host port {} is bound more than once",
                        host_port
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self::new(DEFAULT_CONTAINER_NAME, DEFAULT_IMAGE).port(DEFAULT_PORT, DEFAULT_PORT)
    }
}

/// Port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Runtime key for this port, e.g. `11434/tcp`
    pub fn port_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.host_port {
            Some(host) => write!(f, "{}:{}", host, self.port_key()),
            None => write!(f, "{}", self.port_key()),
        }
    }
}

/// Network protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Runtime-assigned container identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated ID for display
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime-assigned exec context identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecHandle(String);

impl ExecHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One-shot command to run inside the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Argument vector
    pub cmd: Vec<String>,
    /// Attach standard output
    pub attach_stdout: bool,
    /// Attach standard error
    pub attach_stderr: bool,
}

impl ExecRequest {
    /// Create an exec request with both output streams attached
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            attach_stdout: true,
            attach_stderr: true,
        }
    }

    /// `ollama pull <model>`
    pub fn pull_model(model: &str) -> Self {
        Self::new(["ollama", "pull", model])
    }
}

/// Outcome of a finished exec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exec_id: ExecHandle,
    /// Number of output frames forwarded to the sink
    pub frames: usize,
    /// The command's output stream ran to its end
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec() {
        let spec = ContainerSpec::default();
        assert_eq!(spec.image, DEFAULT_IMAGE);
        assert_eq!(spec.name, DEFAULT_CONTAINER_NAME);
        assert!(spec.auto_remove);
        assert_eq!(spec.ports.len(), 1);
        assert_eq!(spec.ports[0].host_port, Some(11434));
        assert_eq!(spec.ports[0].port_key(), "11434/tcp");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_duplicate_exposed_port_rejected() {
        let spec = ContainerSpec::new("svc", "nginx").port(8080, 80).port(8081, 80);
        assert!(matches!(
            spec.validate(),
            Err(DockhandError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_duplicate_host_port_rejected() {
        let spec = ContainerSpec::new("svc", "nginx").port(8080, 80).port(8080, 81);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_unbound_port_is_valid() {
        let spec = ContainerSpec::new("svc", "nginx").port(8080, 80).expose(9000);
        assert!(spec.validate().is_ok());
        assert_eq!(spec.published().count(), 1);
    }

    #[test]
    fn test_invalid_name_rejected() {
        assert!(ContainerSpec::new("", "nginx").validate().is_err());
        assert!(ContainerSpec::new("bad name", "nginx").validate().is_err());
    }

    #[test]
    fn test_pull_model_request() {
        let req = ExecRequest::pull_model(DEFAULT_MODEL);
        assert_eq!(req.cmd, vec!["ollama", "pull", "qwen3:0.6b"]);
        assert!(req.attach_stdout && req.attach_stderr);
    }

    #[test]
    fn test_handle_short() {
        let handle = ContainerHandle::new("0123456789abcdef0123");
        assert_eq!(handle.short(), "0123456789ab");
        assert_eq!(ContainerHandle::new("abc123").short(), "abc123");
    }

    #[test]
    fn test_spec_serialization() {
        let json = serde_json::to_string(&ContainerSpec::default()).unwrap();
        assert!(json.contains("\"protocol\":\"tcp\""));
        assert!(json.contains("\"auto_remove\":true"));
    }
}
