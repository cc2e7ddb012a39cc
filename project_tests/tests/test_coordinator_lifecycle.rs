//! # Coordinator Lifecycle Tests
//!
//! Starts the coordinator task the way the binary does (update and event
//! channels plus a cancellation token) and checks startup against a slow
//! store, control-plane add/update/delete and orderly shutdown.

use std::sync::Arc;

use lib_distro::{Coordinator, CoordinatorError, Event, NotifyUpdate, Reading, UpdateOperation};
use project_tests::{MemoryStore, RecordingFactory, context, eventually, registration, settle, within};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Running {
    updates: mpsc::Sender<NotifyUpdate>,
    events: mpsc::Sender<Arc<Event>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

fn run(store: Arc<MemoryStore>, factory: &RecordingFactory) -> Running {
    let (updates, update_rx) = mpsc::channel(2);
    let (events, event_rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();
    let coordinator = Coordinator::new(context(factory), store);
    let task = tokio::spawn(coordinator.run(update_rx, event_rx, shutdown.clone()));
    Running {
        updates,
        events,
        shutdown,
        task,
    }
}

fn event(device: &str) -> Arc<Event> {
    Arc::new(Event::new(device, vec![Reading::new("temperature", "72")]))
}

#[tokio::test]
async fn test_bootstrap_waits_for_the_store() {
    let store = Arc::new(MemoryStore::with(vec![registration("X", "x-topic")]).unavailable_for(3));
    let factory = RecordingFactory::default();
    let running = run(store.clone(), &factory);

    assert!(eventually(|| store.bulk_fetches() >= 4).await);
    running.events.send(event("DEV1")).await.unwrap();
    assert!(eventually(|| factory.delivered_to("x-topic").len() == 1).await);
    assert_eq!(store.bulk_fetches(), 4);

    running.shutdown.cancel();
    within(running.task).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_before_store_answers() {
    let store = Arc::new(MemoryStore::default().unavailable_for(usize::MAX));
    let factory = RecordingFactory::default();
    let running = run(store.clone(), &factory);

    assert!(eventually(|| store.bulk_fetches() >= 2).await);
    running.shutdown.cancel();
    within(running.task).await.unwrap();
    assert_eq!(factory.builds(), 0);
}

#[tokio::test]
async fn test_add_update_delete_through_the_update_channel() {
    let store = Arc::new(MemoryStore::default());
    let factory = RecordingFactory::default();
    let running = run(store.clone(), &factory);

    store.put(registration("Y", "first-topic"));
    running
        .updates
        .send(NotifyUpdate::new("Y", UpdateOperation::Add))
        .await
        .unwrap();
    assert!(eventually(|| factory.builds() == 1).await);
    running.events.send(event("DEV1")).await.unwrap();
    assert!(eventually(|| factory.delivered_to("first-topic").len() == 1).await);

    store.put(registration("Y", "second-topic"));
    running
        .updates
        .send(NotifyUpdate::new("Y", UpdateOperation::Update))
        .await
        .unwrap();
    assert!(eventually(|| factory.builds() == 2).await);
    running.events.send(event("DEV1")).await.unwrap();
    assert!(eventually(|| factory.delivered_to("second-topic").len() == 1).await);
    assert_eq!(factory.delivered_to("first-topic").len(), 1);

    running
        .updates
        .send(NotifyUpdate::new("Y", UpdateOperation::Delete))
        .await
        .unwrap();
    settle().await;
    running.events.send(event("DEV1")).await.unwrap();
    settle().await;
    assert_eq!(factory.delivered().len(), 2);

    running.shutdown.cancel();
    within(running.task).await.unwrap();
}

#[tokio::test]
async fn test_closing_the_event_source_stops_the_coordinator() {
    let store = Arc::new(MemoryStore::with(vec![registration("X", "x-topic")]));
    let factory = RecordingFactory::default();
    let running = run(store, &factory);

    running.events.send(event("DEV1")).await.unwrap();
    drop(running.events);
    within(running.task).await.unwrap();
    // The queued event is still delivered before the actor stops.
    assert_eq!(factory.delivered().len(), 1);
}

#[tokio::test]
async fn test_update_errors_are_reported() {
    let store = Arc::new(MemoryStore::with(vec![registration("X", "x-topic")]));
    let factory = RecordingFactory::default();
    let mut coordinator = Coordinator::new(context(&factory), store.clone());
    assert!(within(coordinator.bootstrap(&CancellationToken::new())).await);

    let missing = coordinator
        .apply_update(NotifyUpdate::new("nope", UpdateOperation::Add))
        .await;
    assert_eq!(missing, Err(CoordinatorError::RegistrationNotFound("nope".into())));

    store.put(registration("idle", "idle-topic"));
    let not_running = coordinator
        .apply_update(NotifyUpdate::new("idle", UpdateOperation::Update))
        .await;
    assert_eq!(not_running, Err(CoordinatorError::ActorNotFound("idle".into())));

    let not_running = coordinator
        .apply_update(NotifyUpdate::new("ghost", UpdateOperation::Delete))
        .await;
    assert_eq!(not_running, Err(CoordinatorError::ActorNotFound("ghost".into())));

    // Withdrawn from the store: the update fails and the export keeps its
    // last good definition.
    store.remove("X");
    let withdrawn = coordinator
        .apply_update(NotifyUpdate::new("X", UpdateOperation::Update))
        .await;
    assert_eq!(withdrawn, Err(CoordinatorError::RegistrationNotFound("X".into())));
    coordinator.dispatch_event(event("DEV1")).await;
    settle().await;
    assert_eq!(factory.delivered_to("x-topic").len(), 1);

    assert_eq!(coordinator.active_names(), vec!["X"]);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_add_of_running_export_reloads_it() {
    let store = Arc::new(MemoryStore::with(vec![registration("X", "x-topic")]));
    let factory = RecordingFactory::default();
    let mut coordinator = Coordinator::new(context(&factory), store.clone());
    assert!(within(coordinator.bootstrap(&CancellationToken::new())).await);

    store.put(registration("X", "moved-topic"));
    coordinator
        .apply_update(NotifyUpdate::new("X", UpdateOperation::Add))
        .await
        .unwrap();
    coordinator.dispatch_event(event("DEV1")).await;
    settle().await;

    assert_eq!(coordinator.active_names(), vec!["X"]);
    assert_eq!(factory.delivered_to("moved-topic").len(), 1);
    assert!(factory.delivered_to("x-topic").is_empty());
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_update_terminates_the_export() {
    let store = Arc::new(MemoryStore::with(vec![
        registration("X", "x-topic"),
        registration("Z", "z-topic"),
    ]));
    let factory = RecordingFactory::default();
    let mut coordinator = Coordinator::new(context(&factory), store.clone());
    assert!(within(coordinator.bootstrap(&CancellationToken::new())).await);

    let mut broken = registration("X", "x-topic");
    broken.destination = "ZMQ_TOPIC".into();
    store.put(broken);
    coordinator
        .apply_update(NotifyUpdate::new("X", UpdateOperation::Update))
        .await
        .unwrap();
    settle().await;

    assert_eq!(coordinator.active_names(), vec!["Z"]);
    coordinator.dispatch_event(event("DEV1")).await;
    settle().await;
    assert!(factory.delivered_to("x-topic").is_empty());
    assert_eq!(factory.delivered_to("z-topic").len(), 1);

    // A terminated export can be added back once its definition is fixed.
    store.put(registration("X", "x-topic"));
    coordinator
        .apply_update(NotifyUpdate::new("X", UpdateOperation::Add))
        .await
        .unwrap();
    assert_eq!(coordinator.active_names(), vec!["X", "Z"]);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_queued_events() {
    let store = Arc::new(MemoryStore::with(vec![registration("X", "x-topic")]));
    let factory = RecordingFactory::default();
    let mut coordinator = Coordinator::new(context(&factory), store);
    assert!(within(coordinator.bootstrap(&CancellationToken::new())).await);

    for _ in 0..3 {
        coordinator.dispatch_event(event("DEV1")).await;
    }
    within(coordinator.shutdown()).await;

    assert_eq!(factory.delivered().len(), 3);
    assert!(coordinator.active_names().is_empty());
}
