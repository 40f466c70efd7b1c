//! Dockhand - run a single container for the length of a session
//!
//! This is the CLI entry point for Dockhand.

use clap::Parser;
use dockhand::container::config::{
    DEFAULT_CONTAINER_NAME, DEFAULT_IMAGE, DEFAULT_MODEL, DEFAULT_PORT,
};
use dockhand::container::{ContainerSpec, ExecRequest};
use dockhand::error::{DockhandError, Result};
use dockhand::runtime::{DockerConfig, DockerRuntime};
use dockhand::shutdown::{ShutdownOutcome, ShutdownTrigger};
use dockhand::supervisor::{IdleWait, RunReport, Supervisor, SupervisorConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

/// Dockhand - container session supervisor
#[derive(Parser)]
#[command(name = "dockhand")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Pull, run and cleanly stop a single container", long_about = None)]
struct Cli {
    /// Image to run
    #[arg(long, default_value = DEFAULT_IMAGE)]
    image: String,

    /// Container name
    #[arg(long, default_value = DEFAULT_CONTAINER_NAME)]
    name: String,

    /// Container port to expose
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host port to bind (defaults to the container port)
    #[arg(long)]
    host_port: Option<u16>,

    /// Model pulled inside the container once it is up
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Skip the model pull
    #[arg(long)]
    no_exec: bool,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long, value_name = "SECS")]
    run_for: Option<u64>,

    /// Docker engine address (defaults to DOCKER_HOST or the local socket)
    #[arg(long)]
    docker_host: Option<String>,

    /// Response timeout for engine requests in seconds
    #[arg(long, value_name = "SECS", default_value = "45")]
    timeout: u64,

    /// Upper bound on the stop during shutdown in seconds
    #[arg(long, value_name = "SECS", default_value = "30")]
    stop_timeout: u64,

    /// Keep the container after it stops
    #[arg(long)]
    keep: bool,

    /// Print the resolved container spec as JSON and exit
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn container_spec(&self) -> ContainerSpec {
        ContainerSpec::new(&self.name, &self.image)
            .port(self.host_port.unwrap_or(self.port), self.port)
            .auto_remove(!self.keep)
    }

    fn supervisor_config(&self) -> Result<SupervisorConfig> {
        let grace = self.docker_config().stop_grace;
        if Duration::from_secs(self.stop_timeout) <= grace {
            return Err(DockhandError::InvalidConfig(format!(
                "--stop-timeout must be longer than the engine's {}s stop grace period",
                grace.as_secs()
            )));
        }
        Ok(SupervisorConfig {
            spec: self.container_spec(),
            setup: (!self.no_exec).then(|| ExecRequest::pull_model(&self.model)),
            idle: match self.run_for {
                Some(secs) => IdleWait::For(Duration::from_secs(secs)),
                None => IdleWait::Forever,
            },
            stop_timeout: Duration::from_secs(self.stop_timeout),
            ..Default::default()
        })
    }

    fn docker_config(&self) -> DockerConfig {
        DockerConfig {
            host: self.docker_host.clone(),
            response_timeout: Duration::from_secs(self.timeout),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => {}
        Err(e) if e.is_fatal() => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Err(e) => tracing::warn!("Run finished but the container may still be running: {}", e),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.supervisor_config()?;
    config.spec.validate()?;

    if cli.dry_run {
        println!("{}", serde_json::to_string_pretty(&config.spec)?);
        return Ok(());
    }

    let run_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    let span = tracing::info_span!("run", id = %run_id);

    async move {
        let runtime = DockerRuntime::connect(cli.docker_config()).await?;
        let report = Supervisor::new(Arc::new(runtime), config).run().await?;
        summarize(&report, &cli.name)
    }
    .instrument(span)
    .await
}

/// Log how the run ended. Lost container output fails the run; a stop that
/// did not go through is reported as a non-fatal error.
fn summarize(report: &RunReport, name: &str) -> Result<()> {
    if report.trigger == Some(ShutdownTrigger::Error) {
        return Err(DockhandError::LogStream(
            "lost the container's output stream".to_string(),
        ));
    }

    let container = match &report.container {
        Some(handle) => handle.to_string(),
        None => name.to_string(),
    };
    match &report.shutdown {
        Some(ShutdownOutcome::Stopped) | Some(ShutdownOutcome::AlreadyTriggered) => {
            tracing::info!("Run finished ({})", report.state);
            Ok(())
        }
        Some(ShutdownOutcome::StopFailed(message)) => Err(DockhandError::Stop {
            container,
            message: message.clone(),
        }),
        Some(ShutdownOutcome::TimedOut) => Err(DockhandError::Stop {
            container,
            message: "no confirmation that the container stopped".to_string(),
        }),
        None => {
            tracing::info!("Run ended before a container was created");
            Ok(())
        }
    }
}
