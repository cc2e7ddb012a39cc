//! # Registration Actor
//!
//! One task per registration. The task owns the registration's pipeline and
//! the receiving halves of two bounded queues: commands (reload, shutdown)
//! and events. Nothing else ever touches the pipeline.
//!
//! ## States
//!
//! - **Active**: events run through the pipeline; a valid reload swaps in a
//!   freshly built pipeline.
//! - **Terminated**: reached on shutdown, on an invalid reload, or when
//!   either queue closes. The task returns and both queues close, which is
//!   how the coordinator observes the state.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::context::DistroContext;
use crate::models::{Event, Registration, RegistrationError};
use crate::pipeline::{Delivery, Pipeline, PipelineError};

/// Control messages for an actor.
#[derive(Debug)]
pub enum ActorCommand {
    /// Replace the pipeline with one built from this definition.
    Reload(Registration),
    Shutdown,
}

/// A registration and its resolved pipeline.
#[derive(Debug)]
pub struct RegistrationInfo {
    registration: Registration,
    pipeline: Pipeline,
}

impl RegistrationInfo {
    pub async fn new(registration: Registration, ctx: &DistroContext) -> Result<Self, RegistrationError> {
        let pipeline = Pipeline::build(&registration, ctx.senders.as_ref()).await?;
        Ok(Self {
            registration,
            pipeline,
        })
    }

    pub fn name(&self) -> &str {
        &self.registration.name
    }

    /// Builds a complete pipeline for `registration` and only then replaces
    /// the current one. On error the current pipeline is left untouched.
    pub async fn update(&mut self, registration: Registration, ctx: &DistroContext) -> Result<(), RegistrationError> {
        let pipeline = Pipeline::build(&registration, ctx.senders.as_ref()).await?;
        self.registration = registration;
        self.pipeline = pipeline;
        Ok(())
    }

    /// Runs one event through the pipeline. Failures are logged and the
    /// event is dropped.
    pub async fn process_event(&mut self, event: Arc<Event>, ctx: &DistroContext) {
        match self.pipeline.process(Arc::clone(&event)).await {
            Ok(Delivery::Sent) => {
                log::debug!("Export '{}' delivered event {}", self.registration.name, event.id);
                if ctx.settings.mark_pushed {
                    if let Some(marker) = &ctx.push_marker {
                        if let Err(e) = marker.mark_pushed(&event.id).await {
                            log::warn!("Could not mark event {} as pushed: {:#}", event.id, e);
                        }
                    }
                }
            }
            Ok(Delivery::Filtered) => {
                log::trace!("Export '{}' filtered out event {}", self.registration.name, event.id);
            }
            Err(PipelineError::NoFormatter(format)) => {
                log::warn!(
                    "Export '{}' dropped event {}: format {} is not implemented",
                    self.registration.name,
                    event.id,
                    format
                );
            }
            Err(e) => {
                log::error!(
                    "Export '{}' failed to deliver event {}: {}",
                    self.registration.name,
                    event.id,
                    e
                );
            }
        }
    }
}

/// The actor body. Returns when the actor reaches the Terminated state.
pub async fn registration_loop(
    mut info: RegistrationInfo,
    ctx: DistroContext,
    mut commands: mpsc::Receiver<ActorCommand>,
    mut events: mpsc::Receiver<Arc<Event>>,
) {
    log::info!("Export '{}' started", info.name());
    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(ActorCommand::Reload(registration)) => {
                    if let Err(e) = info.update(registration, &ctx).await {
                        log::error!("Export '{}' terminated by an invalid update: {}", info.name(), e);
                        break;
                    }
                    log::info!("Export '{}' reloaded", info.name());
                }
                Some(ActorCommand::Shutdown) | None => {
                    log::info!("Export '{}' stopped", info.name());
                    break;
                }
            },
            event = events.recv() => match event {
                Some(event) => info.process_event(event, &ctx).await,
                None => {
                    log::info!("Export '{}' drained and stopped", info.name());
                    break;
                }
            },
        }
    }
}

/// The coordinator's side of a running actor.
pub struct RegistrationHandle {
    name: String,
    commands: mpsc::Sender<ActorCommand>,
    events: mpsc::Sender<Arc<Event>>,
    task: JoinHandle<()>,
}

impl RegistrationHandle {
    /// Spawns the actor task for `info`.
    pub fn spawn(info: RegistrationInfo, ctx: DistroContext) -> Self {
        let name = info.name().to_string();
        let (commands, command_rx) = mpsc::channel(1);
        let (events, event_rx) = mpsc::channel(ctx.settings.actor_queue_depth.max(1));
        let task = tokio::spawn(registration_loop(info, ctx, command_rx, event_rx));
        Self {
            name,
            commands,
            events,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the actor has terminated.
    pub fn is_alive(&self) -> bool {
        !self.events.is_closed()
    }

    /// Queues an event, waiting for capacity. False if the actor is gone.
    pub async fn deliver(&self, event: Arc<Event>) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Queues a reload. False if the actor is gone.
    pub async fn reload(&self, registration: Registration) -> bool {
        self.commands.send(ActorCommand::Reload(registration)).await.is_ok()
    }

    /// Asks the actor to stop without waiting for it.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(ActorCommand::Shutdown).await;
    }

    /// Resolves once the actor has terminated.
    pub async fn terminated(&self) {
        self.events.closed().await;
    }

    /// Closes the event queue and waits for the actor to work through what
    /// is already queued and finish.
    pub async fn stop(self) {
        let RegistrationHandle {
            name,
            commands,
            events,
            task,
        } = self;
        drop(events);
        if let Err(e) = task.await {
            log::error!("Export '{}' task failed: {}", name, e);
        }
        drop(commands);
    }
}
