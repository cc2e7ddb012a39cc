//! # Distribution Coordinator
//!
//! The single owner of the registration map. It bootstraps one actor per
//! registration, fans every incoming event out to all live actors and turns
//! control-plane notifications into targeted actor commands.
//!
//! ## Ownership
//!
//! The map is touched only from the coordinator task, so it needs no lock.
//! Actors are reached exclusively through their bounded queues.
//!
//! ## Backpressure
//!
//! Event fan-out awaits each actor's queue in turn. A slow actor therefore
//! slows delivery to every registration behind it.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::context::DistroContext;
use super::registration_actor::{RegistrationHandle, RegistrationInfo};
use crate::models::{Event, NotifyUpdate, Registration, UpdateOperation};
use crate::retrieve::RegistrationSource;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("registration '{0}' was not found in the store")]
    RegistrationNotFound(String),

    #[error("no running export for registration '{0}'")]
    ActorNotFound(String),
}

pub struct Coordinator {
    ctx: DistroContext,
    source: Arc<dyn RegistrationSource>,
    actors: HashMap<String, RegistrationHandle>,
}

impl Coordinator {
    pub fn new(ctx: DistroContext, source: Arc<dyn RegistrationSource>) -> Self {
        Self {
            ctx,
            source,
            actors: HashMap::new(),
        }
    }

    /// Names of the registrations whose actor is still running, sorted.
    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .actors
            .values()
            .filter(|h| h.is_alive())
            .map(|h| h.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Polls the registration store until it answers, then starts one actor
    /// per registration. Returns false if `shutdown` fired first.
    pub async fn bootstrap(&mut self, shutdown: &CancellationToken) -> bool {
        let interval = self.ctx.settings.registration_poll_interval();
        loop {
            if let Some(registrations) = self.source.fetch_all().await {
                let total = registrations.len();
                for registration in registrations {
                    self.start(registration).await;
                }
                log::info!("Started {} of {} exports", self.actors.len(), total);
                return true;
            }

            log::info!("Registration store not ready, retrying in {:?}", interval);
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Builds and spawns an actor. Registrations whose pipeline cannot be
    /// built are skipped.
    async fn start(&mut self, registration: Registration) -> bool {
        let name = registration.name.clone();
        match RegistrationInfo::new(registration, &self.ctx).await {
            Ok(info) => {
                let handle = RegistrationHandle::spawn(info, self.ctx.clone());
                self.actors.insert(name, handle);
                true
            }
            Err(e) => {
                log::warn!("Export '{}' not started: {}", name, e);
                false
            }
        }
    }

    /// Applies one control-plane notification.
    pub async fn apply_update(&mut self, update: NotifyUpdate) -> Result<(), CoordinatorError> {
        let name = update.name;
        match update.operation {
            UpdateOperation::Add => {
                let registration = self
                    .source
                    .fetch_by_name(&name)
                    .await
                    .ok_or_else(|| CoordinatorError::RegistrationNotFound(name.clone()))?;

                if let Some(existing) = self.actors.get(&name) {
                    if existing.reload(registration.clone()).await {
                        log::info!("Export '{}' already running, reloading it", name);
                        return Ok(());
                    }
                    self.actors.remove(&name);
                }
                self.start(registration).await;
                Ok(())
            }
            UpdateOperation::Update => {
                let registration = self
                    .source
                    .fetch_by_name(&name)
                    .await
                    .ok_or_else(|| CoordinatorError::RegistrationNotFound(name.clone()))?;
                let handle = self
                    .actors
                    .get(&name)
                    .ok_or_else(|| CoordinatorError::ActorNotFound(name.clone()))?;

                if handle.reload(registration).await {
                    Ok(())
                } else {
                    self.actors.remove(&name);
                    Err(CoordinatorError::ActorNotFound(name))
                }
            }
            UpdateOperation::Delete => {
                let handle = self
                    .actors
                    .remove(&name)
                    .ok_or_else(|| CoordinatorError::ActorNotFound(name.clone()))?;
                if !handle.is_alive() {
                    log::info!("Export '{}' had already terminated", name);
                }
                handle.shutdown().await;
                log::info!("Export '{}' removed", name);
                Ok(())
            }
        }
    }

    /// Delivers `event` to every live actor. Actors found terminated are
    /// dropped from the map.
    pub async fn dispatch_event(&mut self, event: Arc<Event>) {
        let mut gone = Vec::new();
        for (name, handle) in &self.actors {
            if !handle.deliver(Arc::clone(&event)).await {
                gone.push(name.clone());
            }
        }
        for name in gone {
            log::info!("Pruning terminated export '{}'", name);
            self.actors.remove(&name);
        }
    }

    /// Stops every actor and waits for them to finish.
    pub async fn shutdown(&mut self) {
        let count = self.actors.len();
        for (_, handle) in self.actors.drain() {
            handle.stop().await;
        }
        log::info!("Coordinator stopped {} exports", count);
    }

    /// The coordinator task: bootstrap, then serve updates and events until
    /// `shutdown` fires or the event source closes.
    pub async fn run(
        mut self,
        mut updates: mpsc::Receiver<NotifyUpdate>,
        mut events: mpsc::Receiver<Arc<Event>>,
        shutdown: CancellationToken,
    ) {
        if !self.bootstrap(&shutdown).await {
            log::info!("Shutdown requested before registrations were loaded");
            return;
        }

        let mut updates_open = true;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                update = updates.recv(), if updates_open => match update {
                    Some(update) => {
                        log::info!("Registration '{}' notified: {:?}", update.name, update.operation);
                        if let Err(e) = self.apply_update(update).await {
                            log::warn!("Registration update not applied: {}", e);
                        }
                    }
                    None => updates_open = false,
                },
                event = events.recv() => match event {
                    Some(event) => self.dispatch_event(event).await,
                    None => {
                        log::info!("Event source closed");
                        break;
                    }
                },
            }
        }
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::DistroSettings;
    use crate::models::Reading;
    use crate::test_support::CaptureFactory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory store that answers `None` for the first `unavailable` bulk
    /// fetches.
    #[derive(Default)]
    struct MemorySource {
        registrations: Mutex<Vec<Registration>>,
        unavailable: AtomicUsize,
        bulk_calls: AtomicUsize,
    }

    impl MemorySource {
        fn with(registrations: Vec<Registration>) -> Self {
            Self {
                registrations: Mutex::new(registrations),
                ..Default::default()
            }
        }

        fn put(&self, registration: Registration) {
            let mut regs = self.registrations.lock().unwrap();
            regs.retain(|r| r.name != registration.name);
            regs.push(registration);
        }
    }

    #[async_trait]
    impl RegistrationSource for MemorySource {
        async fn fetch_all(&self) -> Option<Vec<Registration>> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.load(Ordering::SeqCst) > 0 {
                self.unavailable.fetch_sub(1, Ordering::SeqCst);
                return None;
            }
            Some(self.registrations.lock().unwrap().clone())
        }

        async fn fetch_by_name(&self, name: &str) -> Option<Registration> {
            self.registrations
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.name == name)
                .cloned()
        }
    }

    fn registration(name: &str, destination: &str) -> Registration {
        let mut reg = Registration {
            name: name.into(),
            format: "JSON".into(),
            destination: destination.into(),
            ..Default::default()
        };
        reg.addressable.topic = name.into();
        reg
    }

    fn coordinator(source: Arc<MemorySource>, factory: &CaptureFactory) -> Coordinator {
        let settings = DistroSettings {
            registration_poll_interval_ms: 10,
            ..Default::default()
        };
        Coordinator::new(DistroContext::new(settings, Arc::new(factory.clone())), source)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_bootstrap_retries_and_skips_unbuildable() {
        let source = Arc::new(MemorySource::with(vec![
            registration("a", "MQTT_TOPIC"),
            registration("z", "ZMQ_TOPIC"),
        ]));
        source.unavailable.store(2, Ordering::SeqCst);
        let factory = CaptureFactory::default();
        let mut coord = coordinator(Arc::clone(&source), &factory);

        assert!(coord.bootstrap(&CancellationToken::new()).await);
        assert_eq!(source.bulk_calls.load(Ordering::SeqCst), 3);
        assert_eq!(coord.active_names(), vec!["a"]);
        coord.shutdown().await;
    }

    #[tokio::test]
    async fn test_bootstrap_cancelled() {
        let source = Arc::new(MemorySource::default());
        source.unavailable.store(usize::MAX, Ordering::SeqCst);
        let mut coord = coordinator(source, &CaptureFactory::default());
        let token = CancellationToken::new();
        token.cancel();
        assert!(!coord.bootstrap(&token).await);
    }

    #[tokio::test]
    async fn test_add_update_delete() {
        let source = Arc::new(MemorySource::default());
        let factory = CaptureFactory::default();
        let mut coord = coordinator(Arc::clone(&source), &factory);
        coord.bootstrap(&CancellationToken::new()).await;

        assert_eq!(
            coord.apply_update(NotifyUpdate::new("a", UpdateOperation::Add)).await,
            Err(CoordinatorError::RegistrationNotFound("a".into()))
        );

        source.put(registration("a", "MQTT_TOPIC"));
        coord.apply_update(NotifyUpdate::new("a", UpdateOperation::Add)).await.unwrap();
        assert_eq!(coord.active_names(), vec!["a"]);

        // Adding again reloads the running actor.
        coord.apply_update(NotifyUpdate::new("a", UpdateOperation::Add)).await.unwrap();
        settle().await;
        assert_eq!(coord.active_names(), vec!["a"]);
        assert_eq!(factory.built(), 2);

        assert_eq!(
            coord.apply_update(NotifyUpdate::new("b", UpdateOperation::Update)).await,
            Err(CoordinatorError::RegistrationNotFound("b".into()))
        );
        source.put(registration("b", "MQTT_TOPIC"));
        assert_eq!(
            coord.apply_update(NotifyUpdate::new("b", UpdateOperation::Update)).await,
            Err(CoordinatorError::ActorNotFound("b".into()))
        );

        coord.apply_update(NotifyUpdate::new("a", UpdateOperation::Delete)).await.unwrap();
        assert!(coord.active_names().is_empty());
        assert_eq!(
            coord.apply_update(NotifyUpdate::new("a", UpdateOperation::Delete)).await,
            Err(CoordinatorError::ActorNotFound("a".into()))
        );
    }

    #[tokio::test]
    async fn test_terminated_actor_is_pruned_on_next_event() {
        let source = Arc::new(MemorySource::with(vec![
            registration("a", "MQTT_TOPIC"),
            registration("b", "MQTT_TOPIC"),
        ]));
        let factory = CaptureFactory::default();
        let mut coord = coordinator(Arc::clone(&source), &factory);
        coord.bootstrap(&CancellationToken::new()).await;

        // An invalid update terminates "b".
        source.put(registration("b", "ZMQ_TOPIC"));
        coord.apply_update(NotifyUpdate::new("b", UpdateOperation::Update)).await.unwrap();
        settle().await;
        assert_eq!(coord.active_names(), vec!["a"]);
        assert_eq!(coord.actors.len(), 2);

        coord
            .dispatch_event(Arc::new(Event::new("DEV1", vec![Reading::new("t", "1")])))
            .await;
        assert_eq!(coord.actors.len(), 1);
        settle().await;
        assert_eq!(factory.sent().len(), 1);
        coord.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_stops_when_event_source_closes() {
        let source = Arc::new(MemorySource::with(vec![registration("a", "MQTT_TOPIC")]));
        let factory = CaptureFactory::default();
        let coord = coordinator(source, &factory);

        let (_update_tx, update_rx) = mpsc::channel(2);
        let (event_tx, event_rx) = mpsc::channel(8);
        let task = tokio::spawn(coord.run(update_rx, event_rx, CancellationToken::new()));

        event_tx
            .send(Arc::new(Event::new("DEV1", vec![])))
            .await
            .unwrap();
        drop(event_tx);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(factory.sent().len(), 1);
    }
}
