//! Supervisor configuration

use crate::container::config::DEFAULT_MODEL;
use crate::container::{ContainerSpec, ExecRequest};
use crate::logs::LogOptions;
use std::time::Duration;

/// How long to keep the container running once it is up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleWait {
    /// Until a termination signal arrives
    Forever,
    /// Until the duration elapses or a signal arrives, whichever is first
    For(Duration),
}

impl IdleWait {
    /// Resolves when the wait runs out. Never resolves for [`IdleWait::Forever`].
    pub async fn elapsed(&self) {
        match self {
            IdleWait::Forever => std::future::pending().await,
            IdleWait::For(duration) => tokio::time::sleep(*duration).await,
        }
    }
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Container to provision
    pub spec: ContainerSpec,
    /// Command run inside the container once it is up
    pub setup: Option<ExecRequest>,
    pub idle: IdleWait,
    /// Upper bound on the stop call during shutdown
    pub stop_timeout: Duration,
    pub log_options: LogOptions,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            spec: ContainerSpec::default(),
            setup: Some(ExecRequest::pull_model(DEFAULT_MODEL)),
            idle: IdleWait::Forever,
            stop_timeout: Duration::from_secs(30),
            log_options: LogOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.spec.name, "ollama-dockhand");
        assert_eq!(
            config.setup.unwrap().cmd,
            vec!["ollama", "pull", "qwen3:0.6b"]
        );
        assert_eq!(config.idle, IdleWait::Forever);
        assert!(config.log_options.follow);
    }

    #[tokio::test]
    async fn test_bounded_wait_elapses() {
        let idle = IdleWait::For(std::time::Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), idle.elapsed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forever_does_not_elapse() {
        let result =
            tokio::time::timeout(Duration::from_millis(20), IdleWait::Forever.elapsed()).await;
        assert!(result.is_err());
    }
}
