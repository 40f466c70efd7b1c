//! Image references

use crate::error::{DockhandError, Result};
use serde::{Deserialize, Serialize};

/// Tag used when a reference names none
pub const DEFAULT_TAG: &str = "latest";

/// Parsed image reference: `[registry/]repository[:tag][@digest]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host, if the reference names one
    pub registry: Option<String>,
    /// Repository path, e.g. `ollama/ollama`
    pub repository: String,
    /// Tag
    pub tag: String,
    /// Content digest, e.g. `sha256:...`
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(DockhandError::InvalidConfig(
                "image reference must not be empty".to_string(),
            ));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(DockhandError::InvalidConfig(format!(
                "invalid image reference: {}",
                reference
            )));
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(DockhandError::InvalidConfig(format!(
                        "invalid digest in image reference: {}",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon only separates the tag when it follows the last path segment;
        // otherwise it belongs to a registry port.
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(&name[split + 1..]))
            }
            None => (name, None),
        };

        if path.is_empty() || tag == Some("") {
            return Err(DockhandError::InvalidConfig(format!(
                "invalid image reference: {}",
                reference
            )));
        }

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, path.to_string()),
        };

        if repository.is_empty() {
            return Err(DockhandError::InvalidConfig(format!(
                "invalid image reference: {}",
                reference
            )));
        }

        Ok(Self {
            registry,
            repository,
            tag: tag.unwrap_or(DEFAULT_TAG).to_string(),
            digest,
        })
    }

    /// Image name without tag or digest, including the registry
    pub fn name(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.digest {
            Some(digest) => write!(f, "{}@{}", self.name(), digest),
            None => write!(f, "{}:{}", self.name(), self.tag),
        }
    }
}

impl std::str::FromStr for ImageReference {
    type Err = DockhandError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_tag() {
        let r = ImageReference::parse("ollama/ollama:latest").unwrap();
        assert_eq!(r.registry, None);
        assert_eq!(r.repository, "ollama/ollama");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.to_string(), "ollama/ollama:latest");
    }

    #[test]
    fn test_parse_defaults_tag() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.tag, DEFAULT_TAG);
        assert_eq!(r.to_string(), "nginx:latest");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/team/model:v2").unwrap();
        assert_eq!(r.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(r.repository, "team/model");
        assert_eq!(r.tag, "v2");
        assert_eq!(r.name(), "localhost:5000/team/model");
    }

    #[test]
    fn test_parse_registry_port_without_tag() {
        let r = ImageReference::parse("registry.example.com:443/app").unwrap();
        assert_eq!(r.registry.as_deref(), Some("registry.example.com:443"));
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_digest() {
        let r = ImageReference::parse("ollama/ollama@sha256:abc123").unwrap();
        assert_eq!(r.digest.as_deref(), Some("sha256:abc123"));
        assert_eq!(r.to_string(), "ollama/ollama@sha256:abc123");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("nginx:").is_err());
        assert!(ImageReference::parse("bad image").is_err());
        assert!(ImageReference::parse("nginx@nodigest").is_err());
    }
}
