//! # Distribution Scenario Tests
//!
//! Drives a `Coordinator` directly (no background task) through the
//! delivery scenarios an export must honour: device filtering, reading
//! filtering, byte-exact JSON and idempotent reloads.

use std::sync::Arc;

use lib_distro::models::EncryptionDetails;
use lib_distro::{Coordinator, Event, NotifyUpdate, Reading, UpdateOperation};
use project_tests::{MemoryStore, RecordingFactory, RecordingMarker, context, registration, settle, within};
use tokio_util::sync::CancellationToken;

fn dev1_temperature() -> Event {
    Event::new("DEV1", vec![Reading::new("temperature", "72")])
}

async fn started(store: MemoryStore, factory: &RecordingFactory) -> Coordinator {
    let mut coordinator = Coordinator::new(context(factory), Arc::new(store));
    assert!(within(coordinator.bootstrap(&CancellationToken::new())).await);
    coordinator
}

#[tokio::test]
async fn test_matching_device_receives_exact_json() {
    let mut reg = registration("X", "exports");
    reg.filter.device_ids = vec!["DEV1".into()];
    let factory = RecordingFactory::default();
    let mut coordinator = started(MemoryStore::with(vec![reg]), &factory).await;

    let event = dev1_temperature();
    let expected = serde_json::to_vec(&event).unwrap();
    coordinator.dispatch_event(Arc::new(event)).await;
    settle().await;

    let delivered = factory.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload, expected);
    assert_eq!(delivered[0].device, "DEV1");
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_other_device_is_never_sent() {
    let mut reg = registration("X", "exports");
    reg.filter.device_ids = vec!["DEV1".into()];
    let factory = RecordingFactory::default();
    let mut coordinator = started(MemoryStore::with(vec![reg]), &factory).await;

    let event = Event::new("DEV2", vec![Reading::new("temperature", "72")]);
    coordinator.dispatch_event(Arc::new(event)).await;
    settle().await;

    assert!(factory.delivered().is_empty());
    assert_eq!(coordinator.active_names(), vec!["X"]);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_only_allowed_readings_are_formatted() {
    let mut reg = registration("X", "exports");
    reg.filter.value_descriptor_ids = vec!["temperature".into()];
    let factory = RecordingFactory::default();
    let mut coordinator = started(MemoryStore::with(vec![reg]), &factory).await;

    let event = Event::new(
        "DEV1",
        vec![Reading::new("temperature", "72"), Reading::new("humidity", "40")],
    );
    coordinator.dispatch_event(Arc::new(event)).await;
    settle().await;

    let delivered = factory.delivered();
    assert_eq!(delivered.len(), 1);
    let sent: Event = serde_json::from_slice(&delivered[0].payload).unwrap();
    assert_eq!(sent.device, "DEV1");
    assert_eq!(sent.readings, vec![Reading::new("temperature", "72")]);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_event_with_no_allowed_reading_is_dropped() {
    let mut reg = registration("X", "exports");
    reg.filter.value_descriptor_ids = vec!["pressure".into()];
    let factory = RecordingFactory::default();
    let mut coordinator = started(MemoryStore::with(vec![reg]), &factory).await;

    coordinator.dispatch_event(Arc::new(dev1_temperature())).await;
    settle().await;

    assert!(factory.delivered().is_empty());
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_repeated_update_keeps_a_single_export() {
    let mut reg = registration("X", "exports");
    reg.filter.device_ids = vec!["DEV1".into()];
    let store = Arc::new(MemoryStore::with(vec![reg]));
    let factory = RecordingFactory::default();
    let mut coordinator = Coordinator::new(context(&factory), store.clone());
    assert!(within(coordinator.bootstrap(&CancellationToken::new())).await);

    for _ in 0..2 {
        coordinator
            .apply_update(NotifyUpdate::new("X", UpdateOperation::Update))
            .await
            .unwrap();
    }
    assert_eq!(coordinator.active_names(), vec!["X"]);

    let event = dev1_temperature();
    let expected = serde_json::to_vec(&event).unwrap();
    coordinator.dispatch_event(Arc::new(event)).await;
    settle().await;

    // One initial build plus one per reload; every build is complete.
    assert_eq!(factory.builds(), 3);
    let delivered = factory.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload, expected);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_each_registration_gets_its_own_copy() {
    let mut narrow = registration("narrow", "narrow-topic");
    narrow.filter.value_descriptor_ids = vec!["humidity".into()];
    let wide = registration("wide", "wide-topic");
    let factory = RecordingFactory::default();
    let mut coordinator = started(MemoryStore::with(vec![narrow, wide]), &factory).await;

    let event = Event::new(
        "DEV1",
        vec![Reading::new("temperature", "72"), Reading::new("humidity", "40")],
    );
    coordinator.dispatch_event(Arc::new(event.clone())).await;
    settle().await;

    let wide_sent: Event = serde_json::from_slice(&factory.delivered_to("wide-topic")[0].payload).unwrap();
    assert_eq!(wide_sent, event);
    let narrow_sent: Event = serde_json::from_slice(&factory.delivered_to("narrow-topic")[0].payload).unwrap();
    assert_eq!(narrow_sent.readings, vec![Reading::new("humidity", "40")]);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_registration_does_not_block_the_others() {
    let mut broken = registration("broken", "broken-topic");
    broken.destination = "ZMQ_TOPIC".into();
    let mut unknown = registration("unknown", "unknown-topic");
    unknown.format = "YAML".into();
    let good = registration("good", "good-topic");
    let factory = RecordingFactory::default();
    let mut coordinator = started(MemoryStore::with(vec![broken, unknown, good]), &factory).await;

    assert_eq!(coordinator.active_names(), vec!["good"]);
    coordinator.dispatch_event(Arc::new(dev1_temperature())).await;
    settle().await;
    assert_eq!(factory.delivered().len(), 1);
    assert_eq!(factory.delivered()[0].topic, "good-topic");
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_compressed_and_encrypted_export_is_not_plain_json() {
    let mut reg = registration("X", "exports");
    reg.compression = "GZIP".into();
    reg.encryption = EncryptionDetails {
        algo: "AES".into(),
        key: "123".into(),
        init_vector: "123".into(),
    };
    let factory = RecordingFactory::default();
    let mut coordinator = started(MemoryStore::with(vec![reg]), &factory).await;

    coordinator.dispatch_event(Arc::new(dev1_temperature())).await;
    settle().await;

    let delivered = factory.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(serde_json::from_slice::<Event>(&delivered[0].payload).is_err());
    // Base64 text all the way out.
    assert!(
        delivered[0]
            .payload
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
    );
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_delivered_events_are_marked_pushed() {
    let factory = RecordingFactory::default();
    let marker = Arc::new(RecordingMarker::default());
    let mut ctx = context(&factory).with_push_marker(marker.clone());
    let mut settings = (*ctx.settings).clone();
    settings.mark_pushed = true;
    ctx.settings = Arc::new(settings);

    let mut reg = registration("X", "exports");
    reg.filter.device_ids = vec!["DEV1".into()];
    let mut coordinator = Coordinator::new(ctx, Arc::new(MemoryStore::with(vec![reg])));
    assert!(within(coordinator.bootstrap(&CancellationToken::new())).await);

    let mut kept = dev1_temperature();
    kept.id = "evt-1".into();
    let mut dropped = Event::new("DEV2", vec![Reading::new("temperature", "1")]);
    dropped.id = "evt-2".into();
    coordinator.dispatch_event(Arc::new(kept)).await;
    coordinator.dispatch_event(Arc::new(dropped)).await;
    settle().await;

    assert_eq!(marker.marked(), vec!["evt-1".to_string()]);
    coordinator.shutdown().await;
}
