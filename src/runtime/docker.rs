//! Docker Engine API runtime

use super::{ContainerRuntime, LogStream};
use crate::container::{ContainerHandle, ContainerSpec, ExecHandle, ExecRequest};
use crate::error::{DockhandError, Result};
use crate::image::ImageReference;
use crate::logs::{LogLine, LogOptions, LogSource};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Connection settings for the Docker engine
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Engine address (`unix:///path`, `tcp://host:port` or `http://host:port`).
    /// `None` uses the local defaults, honouring `DOCKER_HOST`.
    pub host: Option<String>,
    /// How long to wait for the engine to answer the initial ping
    pub connect_timeout: Duration,
    /// Per-request response timeout
    pub response_timeout: Duration,
    /// Grace period the engine gives the container before killing it on stop
    pub stop_grace: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(45),
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// [`ContainerRuntime`] backed by a Docker-compatible engine
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    config: DockerConfig,
}

impl DockerRuntime {
    /// Connect to the engine and make sure it answers.
    pub async fn connect(config: DockerConfig) -> Result<Self> {
        let timeout_secs = config.response_timeout.as_secs().max(1);
        let docker = match config.host.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(host) if host.starts_with("unix://") || host.starts_with('/') => {
                Docker::connect_with_unix(host, timeout_secs, bollard::API_DEFAULT_VERSION)
            }
            Some(host) => {
                let addr = host.replacen("tcp://", "http://", 1);
                Docker::connect_with_http(&addr, timeout_secs, bollard::API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| DockhandError::Connection(e.to_string()))?
        .with_timeout(config.response_timeout);

        match tokio::time::timeout(config.connect_timeout, docker.ping()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(DockhandError::Connection(e.to_string())),
            Err(_) => {
                return Err(DockhandError::Connection(format!(
                    "no answer from engine within {}s",
                    config.connect_timeout.as_secs()
                )))
            }
        }

        debug!("Connected to container engine");
        Ok(Self { docker, config })
    }
}

/// Whether the engine answered at all. Anything that is not an engine
/// response means the runtime could not be reached.
fn is_engine_response(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { .. } | BollardError::DockerStreamError { .. }
    )
}

/// 304: already stopped. 404: already gone, e.g. removed by auto-remove.
fn already_stopped(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 304 | 404,
            ..
        }
    )
}

fn classify(err: BollardError, op: impl FnOnce(String) -> DockhandError) -> DockhandError {
    if is_engine_response(&err) {
        op(err.to_string())
    } else {
        DockhandError::Connection(err.to_string())
    }
}

fn log_line(output: LogOutput, timestamped: bool) -> LogLine {
    let (source, message) = match output {
        LogOutput::StdOut { message } => (LogSource::StdOut, message),
        LogOutput::StdErr { message } => (LogSource::StdErr, message),
        LogOutput::StdIn { message } => (LogSource::StdIn, message),
        LogOutput::Console { message } => (LogSource::Console, message),
    };
    if timestamped {
        LogLine::from_timestamped(source, &message)
    } else {
        LogLine::new(source, message.to_vec())
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports = spec
        .ports
        .iter()
        .map(|p| (p.port_key(), HashMap::new()))
        .collect::<HashMap<_, _>>();

    let port_bindings = spec
        .published()
        .map(|p| {
            (
                p.port_key(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: p.host_port.map(|port| port.to_string()),
                }]),
            )
        })
        .collect::<HashMap<_, _>>();

    Config {
        image: Some(spec.image.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &ImageReference) -> Result<()> {
        let reference = image.to_string();
        let options = Some(CreateImageOptions {
            from_image: reference.clone(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.try_next().await.map_err(|e| {
            classify(e, |message| DockhandError::Pull {
                image: reference.clone(),
                message,
            })
        })? {
            if let Some(status) = progress.status {
                debug!(image = %reference, "{}", status);
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let options = Some(CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, container_config(spec))
            .await
            .map_err(|e| {
                classify(e, |message| DockhandError::Create {
                    name: spec.name.clone(),
                    message,
                })
            })?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "{}", warning);
        }
        Ok(ContainerHandle::new(response.id))
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<()> {
        self.docker
            .start_container(handle.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                classify(e, |message| DockhandError::Start {
                    container: handle.to_string(),
                    message,
                })
            })
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()> {
        let options = Some(StopContainerOptions {
            t: self.config.stop_grace.as_secs() as i64,
        });

        match self.docker.stop_container(handle.as_str(), options).await {
            Ok(()) => Ok(()),
            Err(e) if already_stopped(&e) => {
                debug!(container = %handle.short(), "Container already stopped");
                Ok(())
            }
            Err(e) => Err(classify(e, |message| DockhandError::Stop {
                container: handle.to_string(),
                message,
            })),
        }
    }

    async fn exec_create(
        &self,
        handle: &ContainerHandle,
        request: &ExecRequest,
    ) -> Result<ExecHandle> {
        let options = CreateExecOptions {
            cmd: Some(request.cmd.clone()),
            attach_stdout: Some(request.attach_stdout),
            attach_stderr: Some(request.attach_stderr),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(handle.as_str(), options)
            .await
            .map_err(|e| {
                classify(e, |message| DockhandError::Exec {
                    container: handle.to_string(),
                    message,
                })
            })?;
        Ok(ExecHandle::new(created.id))
    }

    async fn exec_start(&self, exec: &ExecHandle) -> Result<LogStream> {
        let started = self
            .docker
            .start_exec(exec.as_str(), None)
            .await
            .map_err(|e| {
                classify(e, |message| DockhandError::Exec {
                    container: exec.to_string(),
                    message,
                })
            })?;

        match started {
            StartExecResults::Attached { output, .. } => {
                let exec_id = exec.to_string();
                Ok(Box::pin(output.map(move |frame| {
                    frame
                        .map(|output| log_line(output, false))
                        .map_err(|e| DockhandError::Exec {
                            container: exec_id.clone(),
                            message: e.to_string(),
                        })
                })))
            }
            StartExecResults::Detached => Ok(Box::pin(futures::stream::empty())),
        }
    }

    async fn stream_logs(
        &self,
        handle: &ContainerHandle,
        options: LogOptions,
    ) -> Result<LogStream> {
        let logs_options = LogsOptions::<String> {
            follow: options.follow,
            stdout: options.stdout,
            stderr: options.stderr,
            timestamps: options.timestamps,
            ..Default::default()
        };

        let timestamped = options.timestamps;
        let stream = self
            .docker
            .logs(handle.as_str(), Some(logs_options))
            .map(move |frame| {
                frame
                    .map(|output| log_line(output, timestamped))
                    .map_err(|e| DockhandError::LogStream(e.to_string()))
            });
        Ok(Box::pin(stream))
    }
}
