//! End-to-end tests for the retrying client over the in-memory store.

use docstore_retry::testing::{InstantSleeper, MemoryStore, RecordingLogger, StoreError, TrackingSleeper};
use docstore_retry::{
    doc, CallContext, CancelReason, Client, ErrorSentinel, FindOptions, InsertManyOptions,
    Namespace, NoopLogger, RetryError, RetryPolicy, SkipList, Sleeper, TracingLogger,
    UpdateOptions,
};
use serde_json::json;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

fn client(store: MemoryStore) -> Client<MemoryStore> {
    Client::with_skip_list(
        store,
        "shop",
        RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(3),
        SkipList::new().with(ErrorSentinel::equal_to(StoreError::NoDocuments)),
    )
    .unwrap()
    .with_sleeper(InstantSleeper)
}

fn orders() -> Namespace {
    Namespace::new("shop", "orders")
}

#[test]
fn crud_round_trip() {
    let client = client(MemoryStore::new());
    let ctx = CallContext::background();
    let log = NoopLogger;

    let inserted = client
        .insert_many(
            &log,
            &ctx,
            "orders",
            vec![
                doc!({ "_id": "a", "status": "open", "total": 10 }),
                doc!({ "_id": "b", "status": "open", "total": 25 }),
                doc!({ "_id": "c", "status": "closed", "total": 5 }),
            ],
            None,
        )
        .unwrap();
    assert_eq!(inserted.inserted_ids.len(), 3);

    let single = client
        .insert_one(&log, &ctx, "orders", doc!({ "_id": "d", "status": "open", "total": 1 }), None)
        .unwrap();
    assert_eq!(single.inserted_id, json!("d"));

    let open: Vec<_> = client
        .find(
            &log,
            &ctx,
            "orders",
            doc!({ "status": "open" }),
            Some(FindOptions {
                sort: Some(doc!({ "total": 1 })),
                ..Default::default()
            }),
        )
        .unwrap()
        .map(|d| d["_id"].clone())
        .collect();
    assert_eq!(open, vec![json!("d"), json!("a"), json!("b")]);

    let updated = client
        .update_one(&log, &ctx, "orders", doc!({ "_id": "a" }), doc!({ "$set": { "status": "closed" } }), None)
        .unwrap();
    assert_eq!((updated.matched_count, updated.modified_count), (1, 1));

    let bumped = client
        .update_many(&log, &ctx, "orders", doc!({ "status": "closed" }), doc!({ "$inc": { "total": 100 } }), None)
        .unwrap();
    assert_eq!(bumped.modified_count, 2);

    let a = client
        .find_one(&log, &ctx, "orders", doc!({ "_id": "a" }), None)
        .unwrap();
    assert_eq!(a["total"], json!(110));

    let removed = client
        .delete_one(&log, &ctx, "orders", doc!({ "_id": "d" }), None)
        .unwrap();
    assert_eq!(removed.deleted_count, 1);

    let summary = client
        .aggregate(
            &log,
            &ctx,
            "orders",
            vec![doc!({ "$match": { "status": "closed" } }), doc!({ "$count": "n" })],
            None,
        )
        .unwrap()
        .collect_all();
    assert_eq!(summary, vec![doc!({ "n": 2 })]);

    let purged = client
        .delete_many(&log, &ctx, "orders", doc!({}), None)
        .unwrap();
    assert_eq!(purged.deleted_count, 3);
    assert!(client.store().documents(&orders()).is_empty());
}

#[test]
fn transient_failures_are_retried_per_operation() {
    let store = MemoryStore::new();
    store.fail_times("update_many", 2, StoreError::unavailable("stepdown"));
    let client = client(store);
    let logger = RecordingLogger::new();

    let result = client
        .update_many(
            &logger,
            &CallContext::background(),
            "orders",
            doc!({}),
            doc!({ "$set": { "seen": true } }),
            Some(UpdateOptions::default()),
        )
        .unwrap();

    assert_eq!(result.matched_count, 0);
    assert_eq!(client.store().calls("update_many"), 3);

    let warnings = logger.warnings();
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0].field("operation"), Some("update_many"));
    assert_eq!(warnings[0].field("namespace"), Some("shop.orders"));
    assert_eq!(
        warnings[0].field("error"),
        Some("update_many on shop.orders: store unavailable: stepdown")
    );
}

#[test]
fn exhaustion_wraps_operation_error() {
    let store = MemoryStore::new();
    store.fail_times("insert_one", 5, StoreError::unavailable("down"));
    let client = client(store);

    let err = client
        .insert_one(&NoopLogger, &CallContext::background(), "orders", doc!({ "x": 1 }), None)
        .unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(err.attempts(), 3);
    assert_eq!(
        err.to_string(),
        "max retries exceeded after 3 attempts: insert_one on shop.orders: store unavailable: down"
    );
    let cause = err.into_cause().unwrap();
    assert_eq!(cause.operation(), "insert_one");
    assert_eq!(cause.into_inner(), StoreError::unavailable("down"));
    assert_eq!(client.store().calls("insert_one"), 3);
    assert!(client.store().documents(&orders()).is_empty());
}

#[test]
fn no_documents_is_skip_listed() {
    let client = client(MemoryStore::new());
    let sleeper = TrackingSleeper::new();
    let client = client.with_sleeper(sleeper.clone());
    let logger = RecordingLogger::new();

    let err = client
        .find_one(&logger, &CallContext::background(), "orders", doc!({ "_id": "nope" }), None)
        .unwrap_err();

    match &err {
        RetryError::Aborted(op) => assert_eq!(op.inner(), &StoreError::NoDocuments),
        other => panic!("expected aborted, got {:?}", other),
    }
    assert_eq!(err.to_string(), "find_one on shop.orders: no documents in result");
    assert_eq!(err.store_error(), Some(&StoreError::NoDocuments));
    assert_eq!(err.into_store_error(), Some(StoreError::NoDocuments));
    assert_eq!(client.store().calls("find_one"), 1);
    assert!(sleeper.calls().is_empty());
    assert!(logger.records().is_empty());
}

#[test]
fn duplicate_key_is_skip_listed_when_declared() {
    let store = MemoryStore::new();
    let client = Client::with_skip_list(
        store,
        "shop",
        RetryPolicy::constant(Duration::ZERO).with_max_attempts(5),
        SkipList::new().with(ErrorSentinel::matching("duplicate key", |e: &StoreError| {
            matches!(e, StoreError::DuplicateKey(_))
        })),
    )
    .unwrap();
    let ctx = CallContext::background();

    client
        .insert_one(&NoopLogger, &ctx, "orders", doc!({ "_id": 1 }), None)
        .unwrap();
    let err = client
        .insert_many(
            &NoopLogger,
            &ctx,
            "orders",
            vec![doc!({ "_id": 1 })],
            Some(InsertManyOptions {
                ordered: Some(true),
                ..Default::default()
            }),
        )
        .unwrap_err();

    assert!(err.is_aborted());
    assert_eq!(client.store().calls("insert_many"), 1);
}

#[test]
fn cancelled_context_stops_retries() {
    let store = MemoryStore::new();
    store.fail_times("delete_many", 10, StoreError::unavailable("busy"));
    let client = Client::new(
        store,
        "shop",
        RetryPolicy::constant(Duration::from_secs(30)).with_max_attempts(10),
    )
    .unwrap();

    let ctx = CallContext::background();
    let token = ctx.token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        token.cancel();
    });

    let err = client
        .delete_many(&NoopLogger, &ctx, "orders", doc!({}), None)
        .unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(
        err,
        RetryError::Cancelled {
            reason: CancelReason::Cancelled,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(client.store().calls("delete_many"), 1);
}

#[test]
fn set_retry_policy_rejects_zero_attempts() {
    let client = client(MemoryStore::new());
    let before = client.retry_policy();

    let result = client.set_retry_policy(RetryPolicy::constant(Duration::ZERO).with_max_attempts(0));

    assert!(result.is_err());
    assert_eq!(client.retry_policy(), before);
}

#[test]
fn policy_swap_applies_to_new_calls() {
    let store = MemoryStore::new();
    store.fail_times("aggregate", 100, StoreError::unavailable("down"));
    let client = client(store);
    let ctx = CallContext::background();

    let first = client
        .aggregate(&NoopLogger, &ctx, "orders", vec![], None)
        .unwrap_err();
    assert_eq!(first.attempts(), 3);

    client
        .set_retry_policy(RetryPolicy::constant(Duration::ZERO).with_max_attempts(7))
        .unwrap();
    let second = client
        .aggregate(&NoopLogger, &ctx, "orders", vec![], None)
        .unwrap_err();
    assert_eq!(second.attempts(), 7);
    assert_eq!(client.store().calls("aggregate"), 10);
}

#[test]
fn concurrent_callers_and_policy_swaps() {
    let store = MemoryStore::new();
    let client = Arc::new(client(store));
    let ctx = CallContext::background();

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let client = Arc::clone(&client);
            let ctx = ctx.clone();
            thread::spawn(move || {
                for j in 0..25 {
                    if j % 5 == 0 {
                        let attempts = 1 + (i + j) % 4;
                        client
                            .set_retry_policy(
                                RetryPolicy::constant(Duration::ZERO).with_max_attempts(attempts),
                            )
                            .unwrap();
                    }
                    client
                        .insert_one(
                            &NoopLogger,
                            &ctx,
                            "events",
                            doc!({ "worker": i, "seq": j }),
                            None,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let events = client.store().documents(&Namespace::new("shop", "events"));
    assert_eq!(events.len(), 200);
    assert!((1..=4).contains(&client.retry_policy().max_attempts()));
}

#[derive(Clone, Default)]
struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn tracing_output_names_operation() {
    let output = CapturedOutput::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer({
            let output = output.clone();
            move || output.clone()
        })
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let store = MemoryStore::new();
        store.fail_next("find", StoreError::unavailable("blip"));
        let client = client(store);
        let found = client
            .find(&TracingLogger::new(), &CallContext::background(), "orders", doc!({}), None)
            .unwrap();
        assert_eq!(found.remaining(), 0);
    });

    let logged = output.contents();
    assert_eq!(logged.matches("retrying error").count(), 1);
    assert!(logged.contains("WARN"));
    assert!(logged.contains("operation=find"));
    assert!(logged.contains("namespace=shop.orders"));
    assert!(logged.contains("store unavailable: blip"));
    assert!(logged.contains("attempt=1"));
}

// Blocks the first backoff wait until the test releases it.
struct GatedSleeper {
    gated: AtomicBool,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Sleeper for GatedSleeper {
    fn sleep(&self, _delay: Duration, _ctx: &CallContext) -> Result<(), CancelReason> {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        Ok(())
    }
}

#[test]
fn policy_swap_during_backoff_keeps_running_call_on_old_policy() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = MemoryStore::new();
    store.fail_times("find", 100, StoreError::unavailable("down"));
    let client = Arc::new(
        client(store).with_sleeper(GatedSleeper {
            gated: AtomicBool::new(true),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }),
    );

    let running = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            client
                .find(&NoopLogger, &CallContext::background(), "orders", doc!({}), None)
                .unwrap_err()
        })
    };

    entered_rx.recv().unwrap();
    client
        .set_retry_policy(RetryPolicy::constant(Duration::ZERO).with_max_attempts(6))
        .unwrap();
    release_tx.send(()).unwrap();

    let err = running.join().unwrap();
    assert_eq!(err.attempts(), 3);
    assert_eq!(client.store().calls("find"), 3);

    let next = client
        .find(&NoopLogger, &CallContext::background(), "orders", doc!({}), None)
        .unwrap_err();
    assert_eq!(next.attempts(), 6);
    assert_eq!(client.store().calls("find"), 9);
}
