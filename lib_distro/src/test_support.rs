//! Shared fixtures for unit tests.

use async_trait::async_trait;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::models::{Addressable, Destination, Event, RegistrationError};
use crate::pipeline::{SendError, Sender, SenderFactory};

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_mock(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// One delivery seen by a `CaptureSender`.
#[derive(Debug, Clone)]
pub struct Captured {
    /// Topic of the addressable the sender was built for.
    pub topic: String,
    pub payload: Vec<u8>,
    pub event: Event,
}

struct CaptureSender {
    topic: String,
    sink: Arc<Mutex<Vec<Captured>>>,
}

#[async_trait]
impl Sender for CaptureSender {
    async fn send(&mut self, payload: &[u8], event: &Event) -> Result<(), SendError> {
        if self.topic == "fail" {
            return Err(SendError::Transport("refused".to_string()));
        }
        self.sink.lock().unwrap().push(Captured {
            topic: self.topic.clone(),
            payload: payload.to_vec(),
            event: event.clone(),
        });
        Ok(())
    }
}

/// Builds senders that record every payload. ZMQ is rejected like the
/// production factory does.
#[derive(Clone, Default)]
pub struct CaptureFactory {
    sink: Arc<Mutex<Vec<Captured>>>,
    builds: Arc<AtomicUsize>,
}

impl CaptureFactory {
    pub fn sent(&self) -> Vec<Captured> {
        self.sink.lock().unwrap().clone()
    }

    pub fn built(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SenderFactory for CaptureFactory {
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
        Ok(Box::new(CaptureSender {
            topic: addressable.topic.clone(),
            sink: Arc::clone(&self.sink),
        }))
    }
}
