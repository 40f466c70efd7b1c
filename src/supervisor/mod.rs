//! Run supervision
//!
//! The [`Supervisor`] drives one run end to end: pull the image, create and
//! start the container, follow its logs, run the setup command, then idle
//! until something asks for shutdown and stop the container exactly once.

pub mod config;

pub use config::{IdleWait, SupervisorConfig};

use crate::container::{
    ContainerHandle, ContainerSpec, ExecRequest, ExecResult, LifecycleManager, LifecycleState,
};
use crate::error::Result;
use crate::exec::ExecRunner;
use crate::logs::{ConsoleSink, LogSink, LogStreamer};
use crate::runtime::ContainerRuntime;
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownTrigger, SignalListener};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to the setup command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    Completed(ExecResult),
    /// The command failed; the container kept running
    Failed(String),
    /// Shutdown started before the command finished
    Interrupted,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// The container, if one was created
    pub container: Option<ContainerHandle>,
    /// Final lifecycle state
    pub state: LifecycleState,
    pub setup: Option<SetupOutcome>,
    /// What ended the run
    pub trigger: Option<ShutdownTrigger>,
    /// Result of the stop, if the run got that far
    pub shutdown: Option<ShutdownOutcome>,
}

/// Supervises a single container run
pub struct Supervisor {
    runtime: Arc<dyn ContainerRuntime>,
    config: SupervisorConfig,
    container_sink: Box<dyn LogSink>,
    command_sink: Box<dyn LogSink>,
}

impl Supervisor {
    /// Create a supervisor that forwards output to the console
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SupervisorConfig) -> Self {
        Self {
            runtime,
            config,
            container_sink: Box::new(ConsoleSink::container()),
            command_sink: Box::new(ConsoleSink::command()),
        }
    }

    /// Send container and command output somewhere other than stdout.
    pub fn with_sinks(mut self, container: Box<dyn LogSink>, command: Box<dyn LogSink>) -> Self {
        self.container_sink = container;
        self.command_sink = command;
        self
    }

    /// Run until SIGINT or SIGTERM, or until the configured idle wait ends.
    pub async fn run(self) -> Result<RunReport> {
        let mut signals = SignalListener::install()?;
        self.run_until(async move { signals.recv().await }).await
    }

    /// Run with `interrupt` as the termination source.
    ///
    /// Fatal errors before the container is running are returned as `Err`.
    /// Once it is running, every way out goes through the shutdown path and
    /// the run ends with `Ok`, even when the stop itself fails.
    pub async fn run_until<F>(self, interrupt: F) -> Result<RunReport>
    where
        F: Future<Output = ShutdownTrigger> + Send + 'static,
    {
        // The interrupt can fire at any point of the run, including before a
        // coordinator exists, so it is latched into a watch channel.
        let (tx, rx) = watch::channel(None);
        let relay = tokio::spawn(async move {
            let trigger = interrupt.await;
            let _ = tx.send(Some(trigger));
        });

        let result = self.supervise(rx).await;
        relay.abort();
        result
    }

    async fn supervise(
        self,
        interrupts: watch::Receiver<Option<ShutdownTrigger>>,
    ) -> Result<RunReport> {
        let Supervisor {
            runtime,
            config,
            container_sink,
            mut command_sink,
        } = self;
        let spec = &config.spec;
        let lifecycle = Arc::new(LifecycleManager::new(runtime.clone()));

        spec.validate()?;
        let image = spec.image_reference()?;

        tokio::select! {
            pulled = lifecycle.pull(&image) => pulled?,
            trigger = interrupted(interrupts.clone()) => {
                lifecycle.abandon();
                info!(%trigger, "Interrupted while pulling {}", image);
                return Ok(RunReport {
                    container: None,
                    state: lifecycle.state(),
                    setup: None,
                    trigger: Some(trigger),
                    shutdown: None,
                });
            }
        }

        let handle = lifecycle.create(spec).await?;
        lifecycle.start(&handle).await?;
        info!(container = %handle.short(), "Container {} is running", spec.name);

        let coordinator = Arc::new(ShutdownCoordinator::new(
            lifecycle.clone(),
            handle.clone(),
            config.stop_timeout,
        ));

        let log_task = LogStreamer::new(runtime.clone()).spawn(
            handle.clone(),
            config.log_options,
            container_sink,
            CancellationToken::new(),
        );
        let log_closed = log_task.closed_signal();
        let log_failed = log_task.failed_signal();
        coordinator.attach_log_task(log_task);

        // An interrupt latched during create or start skips the setup command.
        let mut early = *interrupts.borrow();
        let setup = match (&config.setup, early) {
            (Some(request), None) => {
                let (outcome, trigger) = run_setup(
                    &runtime,
                    &handle,
                    request,
                    command_sink.as_mut(),
                    interrupts.clone(),
                )
                .await;
                early = trigger;
                Some(outcome)
            }
            (Some(_), Some(_)) => Some(SetupOutcome::Interrupted),
            (None, _) => None,
        };

        let handler = coordinator.register_handler(interrupted(interrupts));

        let fall_through = match early {
            Some(trigger) => Some(trigger),
            None => {
                print_banner(spec, config.idle);
                tokio::select! {
                    _ = coordinator.requested() => None,
                    _ = config.idle.elapsed() => Some(ShutdownTrigger::Deadline),
                    _ = log_closed.cancelled() => {
                        info!(container = %handle.short(), "Container output ended");
                        Some(ShutdownTrigger::StreamEnded)
                    }
                    _ = log_failed.cancelled() => Some(ShutdownTrigger::Error),
                }
            }
        };

        let own = match fall_through {
            Some(trigger) => coordinator.trigger(trigger).await,
            None => ShutdownOutcome::AlreadyTriggered,
        };
        let from_handler = handler
            .await
            .unwrap_or(ShutdownOutcome::AlreadyTriggered);
        let shutdown = match own {
            ShutdownOutcome::AlreadyTriggered => from_handler,
            outcome => outcome,
        };
        coordinator.drain_log_task().await;

        debug!(state = %lifecycle.state(), ?shutdown, "Run finished");
        Ok(RunReport {
            container: Some(handle),
            state: lifecycle.state(),
            setup,
            trigger: coordinator.triggered_by(),
            shutdown: Some(shutdown),
        })
    }
}

/// Resolves with the latched interrupt. Never resolves if the interrupt
/// source went away without firing.
async fn interrupted(
    mut interrupts: watch::Receiver<Option<ShutdownTrigger>>,
) -> ShutdownTrigger {
    let fired = match interrupts.wait_for(Option::is_some).await {
        Ok(trigger) => *trigger,
        Err(_) => None,
    };
    match fired {
        Some(trigger) => trigger,
        None => std::future::pending().await,
    }
}

/// Run the setup command until it finishes or an interrupt arrives.
/// Failures are reported, never raised: the main container keeps running
/// either way.
async fn run_setup(
    runtime: &Arc<dyn ContainerRuntime>,
    handle: &ContainerHandle,
    request: &ExecRequest,
    sink: &mut dyn LogSink,
    interrupts: watch::Receiver<Option<ShutdownTrigger>>,
) -> (SetupOutcome, Option<ShutdownTrigger>) {
    let runner = ExecRunner::new(runtime.clone());
    tokio::select! {
        biased;
        trigger = interrupted(interrupts) => {
            debug!(%trigger, "Setup command abandoned by shutdown");
            (SetupOutcome::Interrupted, Some(trigger))
        }
        result = runner.run(handle, request, sink) => match result {
            Ok(result) => {
                info!(frames = result.frames, "Setup command finished");
                (SetupOutcome::Completed(result), None)
            }
            Err(e) => {
                warn!(container = %handle.short(), "Setup command failed: {}", e);
                (SetupOutcome::Failed(e.to_string()), None)
            }
        },
    }
}

fn print_banner(spec: &ContainerSpec, idle: IdleWait) {
    println!("{} is running!", service_name(spec));
    for port in spec.published() {
        if let Some(host_port) = port.host_port {
            println!("Access it at: http://localhost:{}", host_port);
        }
    }
    match idle {
        IdleWait::Forever => println!("Use Ctrl+C to stop..."),
        IdleWait::For(duration) => println!(
            "Stopping in {}s, use Ctrl+C to stop now...",
            duration.as_secs()
        ),
    }
}

/// "Ollama" for the ollama image, the container name otherwise
fn service_name(spec: &ContainerSpec) -> String {
    match spec.image_reference() {
        Ok(image) if image.repository.rsplit('/').next() == Some("ollama") => {
            "Ollama".to_string()
        }
        _ => spec.name.clone(),
    }
}
