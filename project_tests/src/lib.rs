//! # Distribution Test Fixtures
//!
//! In-memory collaborators for driving a `Coordinator` end to end without a
//! network: a registration store, a sender factory that records every
//! payload and a push marker that records every event id.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_distro::models::{Addressable, Destination, RegistrationError, RegistrationFilter};
use lib_distro::{DistroContext, DistroSettings, Event, PushMarker, Registration, RegistrationSource};
use lib_distro::{SendError, Sender, SenderFactory};

/// One payload handed to a recording sender.
#[derive(Debug, Clone)]
pub struct Delivered {
    /// Topic of the addressable the sender was built for.
    pub topic: String,
    pub payload: Vec<u8>,
    pub device: String,
}

struct RecordingSender {
    topic: String,
    log: Arc<Mutex<Vec<Delivered>>>,
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&mut self, payload: &[u8], event: &Event) -> Result<(), SendError> {
        self.log.lock().unwrap().push(Delivered {
            topic: self.topic.clone(),
            payload: payload.to_vec(),
            device: event.device.clone(),
        });
        Ok(())
    }
}

/// Sender factory recording every delivery and every build.
#[derive(Clone, Default)]
pub struct RecordingFactory {
    log: Arc<Mutex<Vec<Delivered>>>,
    builds: Arc<AtomicUsize>,
}

impl RecordingFactory {
    pub fn delivered(&self) -> Vec<Delivered> {
        self.log.lock().unwrap().clone()
    }

    pub fn delivered_to(&self, topic: &str) -> Vec<Delivered> {
        self.delivered()
            .into_iter()
            .filter(|d| d.topic == topic)
            .collect()
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SenderFactory for RecordingFactory {
    async fn build(
        &self,
        destination: Destination,
        addressable: &Addressable,
    ) -> Result<Box<dyn Sender>, RegistrationError> {
        if destination == Destination::Zmq {
            return Err(RegistrationError::UnsupportedDestination(
                destination.to_string(),
            ));
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingSender {
            topic: addressable.topic.clone(),
            log: Arc::clone(&self.log),
        }))
    }
}

/// Registration store kept in memory. The first `unavailable` bulk fetches
/// answer `None`, like a store that is still starting.
#[derive(Default)]
pub struct MemoryStore {
    registrations: Mutex<BTreeMap<String, Registration>>,
    unavailable: AtomicUsize,
    bulk_fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn with(registrations: Vec<Registration>) -> Self {
        let store = Self::default();
        for registration in registrations {
            store.put(registration);
        }
        store
    }

    pub fn unavailable_for(self, fetches: usize) -> Self {
        self.unavailable.store(fetches, Ordering::SeqCst);
        self
    }

    pub fn put(&self, registration: Registration) {
        self.registrations
            .lock()
            .unwrap()
            .insert(registration.name.clone(), registration);
    }

    pub fn remove(&self, name: &str) {
        self.registrations.lock().unwrap().remove(name);
    }

    pub fn bulk_fetches(&self) -> usize {
        self.bulk_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistrationSource for MemoryStore {
    async fn fetch_all(&self) -> Option<Vec<Registration>> {
        let call = self.bulk_fetches.fetch_add(1, Ordering::SeqCst);
        if call < self.unavailable.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.registrations.lock().unwrap().values().cloned().collect())
    }

    async fn fetch_by_name(&self, name: &str) -> Option<Registration> {
        self.registrations.lock().unwrap().get(name).cloned()
    }
}

/// Push marker recording the ids it was asked to mark.
#[derive(Default)]
pub struct RecordingMarker {
    marked: Mutex<Vec<String>>,
}

impl RecordingMarker {
    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushMarker for RecordingMarker {
    async fn mark_pushed(&self, event_id: &str) -> anyhow::Result<()> {
        self.marked.lock().unwrap().push(event_id.to_string());
        Ok(())
    }
}

/// A plain JSON over MQTT registration whose addressable topic is `topic`.
pub fn registration(name: &str, topic: &str) -> Registration {
    Registration {
        name: name.to_string(),
        format: "JSON".to_string(),
        compression: "NONE".to_string(),
        destination: "MQTT_TOPIC".to_string(),
        enable: true,
        addressable: Addressable {
            name: format!("{}-broker", name),
            protocol: "tcp".to_string(),
            address: "localhost".to_string(),
            port: 1883,
            topic: topic.to_string(),
            ..Default::default()
        },
        filter: RegistrationFilter::default(),
        ..Default::default()
    }
}

/// Engine context over `factory` with fast store polling.
pub fn context(factory: &RecordingFactory) -> DistroContext {
    let settings = DistroSettings {
        registration_poll_interval_ms: 10,
        ..Default::default()
    };
    DistroContext::new(settings, Arc::new(factory.clone()))
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Gives spawned actors time to drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Runs `fut` with a five second ceiling.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}
