mod common;

use common::*;
use pretty_assertions::assert_eq;
use recmerge_engine::{
    EventBus, HandlerRegistry, MergeContext, MergeDispatcher, MergeError, MergeEvent, MergeRecordJob, MergeResult,
    MergeSettings, RelationshipHandler, SupportsMerging,
};
use recmerge_model::{Actor, MergeConfig, MergeStrategy, Record, RecordKey, RelationDef, RelationKind};
use recmerge_storage::{RecordStore, RecordStoreExt, SqliteStore};
use serde_json::json;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn shared_store() -> (Arc<SqliteStore>, Arc<dyn RecordStore>) {
    let store = Arc::new(make_store());
    let dyn_store: Arc<dyn RecordStore> = store.clone();
    (store, dyn_store)
}

fn record(entity_type: &str, key: i64) -> Record {
    Record::new(entity_type, RecordKey::Int(key), Default::default())
}

/// Blocks the merge until the test lets it continue.
struct GateHandler {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl RelationshipHandler for GateHandler {
    fn handle(&self, _: &dyn RecordStore, _: &Record, _: &Record, _: &RelationDef) -> MergeResult<()> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
        Ok(())
    }
}

// ── Job identity ─────────────────────────────────────────────────

#[test]
fn unique_id_names_both_records() {
    let job = MergeRecordJob::new(record("contact", 1), record("contact", 2), None, None);
    assert_eq!(job.unique_id(), "contact:1-contact:2");
    assert_eq!(
        job.tags(),
        vec!["record-merge", "source:contact:1", "target:contact:2"]
    );
    assert_eq!(job.queue, "default");
    assert_eq!(job.connection, None);
}

#[test]
fn job_uses_queue_settings() {
    let settings = MergeSettings::from_json_str(r#"{"queue": {"connection": "redis", "queue": "merges"}}"#).unwrap();
    let job = MergeRecordJob::new(record("contact", 1), record("contact", 2), None, None).on_queue(&settings.queue);
    assert_eq!(job.connection.as_deref(), Some("redis"));
    assert_eq!(job.queue, "merges");
}

#[test]
fn job_serializes_for_transport() {
    let job = MergeRecordJob::new(
        record("contact", 1),
        record("contact", 2),
        Some(Actor::new("u-1")),
        Some(MergeConfig::make([("name", MergeStrategy::UseSource)])),
    );
    let json = serde_json::to_string(&job).unwrap();
    let back: MergeRecordJob = serde_json::from_str(&json).unwrap();
    assert_eq!(back, job);
}

// ── Running jobs ─────────────────────────────────────────────────

#[test]
fn handle_merges_and_publishes_event() {
    let (store, _) = shared_store();
    let a = create(store.as_ref(), "model_without_relationships", json!({"name": "A", "description": "desc-A"}));
    let b = create(store.as_ref(), "model_without_relationships", json!({"name": "B"}));

    let context = MergeContext::default();
    let mut events = context.events.subscribe();
    let job = MergeRecordJob::new(a.clone(), b.clone(), Some(Actor::new("u-1")), None);
    let merged = job.handle(store.as_ref(), &context).unwrap();

    assert_eq!(merged.get_str("description"), Some("desc-A"));
    match events.try_recv().unwrap() {
        MergeEvent::RecordMerged { source, target, performed_by } => {
            assert_eq!(source.key, a.key);
            assert_eq!(target, merged);
            assert_eq!(performed_by, Some(Actor::new("u-1")));
        }
        other => panic!("expected RecordMerged, got {other:?}"),
    }
}

#[test]
fn handle_reloads_records_before_merging() {
    let (store, _) = shared_store();
    let a = create(store.as_ref(), "model_without_relationships", json!({"name": "A"}));
    let b = create(store.as_ref(), "model_without_relationships", json!({"name": "B"}));
    let job = MergeRecordJob::new(a.clone(), b, None, None);

    // Edited after queueing.
    store.save(&a, &row(json!({"email": "late@x"}))).unwrap();

    let merged = job.handle(store.as_ref(), &MergeContext::default()).unwrap();
    assert_eq!(merged.get_str("email"), Some("late@x"));
}

#[test]
fn failed_job_publishes_failure() {
    let (store, _) = shared_store();
    let a = create(store.as_ref(), "model_without_relationships", json!({"name": "A"}));
    let b = create(store.as_ref(), "model_without_relationships", json!({"name": "B"}));
    store.delete_record(&a).unwrap();

    let events = EventBus::new(4);
    let context = MergeContext::default().with_events(events.clone());
    let mut rx = events.subscribe();
    let err = MergeRecordJob::new(a.clone(), b, None, None)
        .handle(store.as_ref(), &context)
        .unwrap_err();

    assert!(matches!(err, MergeError::Storage(_)));
    let event = rx.try_recv().unwrap();
    assert!(matches!(&event, MergeEvent::RecordMergeFailed { error: Some(_), .. }));
    assert_eq!(event.source().key, a.key);
}

#[test]
fn fail_without_error_still_notifies() {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let job = MergeRecordJob::new(record("contact", 1), record("contact", 2), None, None);
    job.fail(None, &events);

    match rx.try_recv().unwrap() {
        MergeEvent::RecordMergeFailed { error, target, .. } => {
            assert_eq!(error, None);
            assert_eq!(target.key, RecordKey::Int(2));
        }
        other => panic!("expected RecordMergeFailed, got {other:?}"),
    }
}

#[test]
fn publish_without_subscribers_is_harmless() {
    let events = EventBus::default();
    let job = MergeRecordJob::new(record("contact", 1), record("contact", 2), None, None);
    job.fail(None, &events);
}

// ── Dispatcher ───────────────────────────────────────────────────

#[tokio::test]
async fn dispatcher_runs_job_on_blocking_pool() {
    let (store, dyn_store) = shared_store();
    let a = create(store.as_ref(), "model_without_relationships", json!({"name": "A", "description": "desc-A"}));
    let b = create(store.as_ref(), "model_without_relationships", json!({"name": "B"}));

    let dispatcher = MergeDispatcher::new(dyn_store, MergeContext::default());
    let mut events = dispatcher.subscribe();
    let merged = dispatcher
        .run(MergeRecordJob::new(a.clone(), b, None, None))
        .await
        .unwrap();

    assert_eq!(merged.get_str("description"), Some("desc-A"));
    assert!(matches!(events.recv().await.unwrap(), MergeEvent::RecordMerged { .. }));
    assert!(!dispatcher.is_queued("model_without_relationships:1-model_without_relationships:2"));
    assert!(store.find("model_without_relationships", &a.key).unwrap().is_none());
}

#[tokio::test]
async fn merge_to_queues_through_dispatcher() {
    let (store, dyn_store) = shared_store();
    let source = test_model(store.as_ref(), "Source");
    let target = test_model(store.as_ref(), "Target");
    let t1 = tag(store.as_ref(), "Tag 1");
    attach_tag(store.as_ref(), &source, &t1, 1, "note");

    let settings = MergeSettings::default();
    let dispatcher = MergeDispatcher::from_settings(dyn_store, &settings);
    let handle = source.merge_to(&dispatcher, &target, None, None).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(tag_pivots(store.as_ref(), &target).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_job_is_refused_while_in_flight() {
    let (store, dyn_store) = shared_store();
    let source = test_model(store.as_ref(), "Source");
    let target = test_model(store.as_ref(), "Target");

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let mut handlers = HandlerRegistry::defaults();
    handlers.register(
        RelationKind::HasMany,
        GateHandler {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        },
    );
    let context = MergeContext {
        handlers: Arc::new(handlers),
        ..MergeContext::default()
    };
    let dispatcher = MergeDispatcher::new(dyn_store, context);

    let job = MergeRecordJob::new(source.clone(), target.clone(), None, None);
    let id = job.unique_id();
    let first = dispatcher.dispatch(job.clone()).unwrap();

    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(dispatcher.is_queued(&id));
    let err = dispatcher.dispatch(job).unwrap_err();
    assert!(matches!(err, MergeError::AlreadyQueued(ref queued) if *queued == id));

    release_tx.send(()).unwrap();
    first.await.unwrap().unwrap();
    assert!(!dispatcher.is_queued(&id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatcher_runs_different_pairs_without_mixing_transactions() {
    let (store, dyn_store) = shared_store();
    let source = create(store.as_ref(), "test_model", json!({"name": "Source", "description": "desc-S"}));
    let target = test_model(store.as_ref(), "Target");
    let a = create(store.as_ref(), "model_without_relationships", json!({"name": "A", "description": "desc-A"}));
    let b = create(store.as_ref(), "model_without_relationships", json!({"name": "B"}));

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let mut handlers = HandlerRegistry::defaults();
    handlers.register(
        RelationKind::HasMany,
        GateHandler {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        },
    );
    let context = MergeContext {
        handlers: Arc::new(handlers),
        ..MergeContext::default()
    };
    let dispatcher = MergeDispatcher::new(dyn_store, context);

    let first = dispatcher
        .dispatch(MergeRecordJob::new(source.clone(), target.clone(), None, None))
        .unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = dispatcher.dispatch(MergeRecordJob::new(a.clone(), b.clone(), None, None)).unwrap();
    release_tx.send(()).unwrap();

    first.await.unwrap().unwrap();
    let merged = second.await.unwrap().unwrap();

    assert_eq!(merged.get_str("description"), Some("desc-A"));
    assert_eq!(store.refresh(&target).unwrap().get_str("description"), Some("desc-S"));
    assert!(store.find("test_model", &source.key).unwrap().is_none());
    assert!(store.find("model_without_relationships", &a.key).unwrap().is_none());
    assert!(!store.in_transaction().unwrap());
}

#[tokio::test]
async fn dispatcher_reports_failed_merge() {
    let (store, dyn_store) = shared_store();
    let a = test_model(store.as_ref(), "A");

    let dispatcher = MergeDispatcher::new(dyn_store, MergeContext::default());
    let mut events = dispatcher.subscribe();
    let err = dispatcher
        .run(MergeRecordJob::new(a.clone(), a.clone(), None, None))
        .await
        .unwrap_err();

    assert!(matches!(err, MergeError::IdenticalRecord { .. }));
    assert!(matches!(events.recv().await.unwrap(), MergeEvent::RecordMergeFailed { .. }));
}
