//! Lock ordering, lock timeouts and overlay isolation

use folio_common::{NodeData, NodeId};
use folio_editor::{
    EditorConfig, EditorEvent, NodeStore, Operation, OperationError, OperationHandler,
    OperationOutcome, OperationRegistry, Origin, StoreView, TransactionError, TransactionManager,
};
use folio_schema::{NodeSpec, Schema, SchemaSpec};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn schema() -> Schema {
    Schema::new(
        SchemaSpec::new("notes")
            .node("doc", NodeSpec::element("block+"))
            .node("paragraph", NodeSpec::element("inline*").in_group("block"))
            .node("text", NodeSpec::text().in_group("inline")),
    )
    .unwrap()
}

fn create_hello() -> Vec<Operation> {
    vec![
        Operation::create(NodeData::text("t", "text", "Hello")),
        Operation::create(NodeData::element("p", "paragraph").with_content(vec!["t".into()])),
        Operation::create(NodeData::element("d", "doc").with_content(vec!["p".into()])),
    ]
}

async fn hello_manager(registry: OperationRegistry, store: Arc<NodeStore>) -> Arc<TransactionManager> {
    init_tracing();
    let manager = TransactionManager::with_config(store, registry, &EditorConfig::default());
    let result = manager.execute(create_hello(), Origin::User).await;
    assert!(result.success, "{:?}", result.errors);
    Arc::new(manager)
}

fn text_of(store: &NodeStore, id: &str) -> Option<String> {
    store.get_node(&NodeId::from(id))?.text
}

/// What a third party and the running transaction see of a node
#[derive(Debug, Clone, PartialEq)]
struct Observation {
    outside: Option<String>,
    inside: Option<String>,
}

/// Reads the node named in the payload from another thread while the
/// transaction is still open
struct Observer {
    store: Arc<NodeStore>,
    seen: Arc<Mutex<Vec<Observation>>>,
}

impl OperationHandler for Observer {
    fn name(&self) -> &str {
        "observe"
    }

    fn execute(
        &self,
        payload: &Value,
        view: &mut StoreView<'_>,
    ) -> Result<OperationOutcome, OperationError> {
        let id = NodeId::from(payload["id"].as_str().unwrap_or_default());
        let outside = std::thread::scope(|scope| {
            scope
                .spawn(|| self.store.get_node(&id).and_then(|n| n.text))
                .join()
                .unwrap_or_default()
        });
        let inside = view.get(&id).and_then(|n| n.text.clone());
        self.seen
            .lock()
            .unwrap()
            .push(Observation { outside, inside });
        Ok(OperationOutcome::new(Operation::new("observe", payload.clone())))
    }
}

#[tokio::test]
async fn test_uncommitted_writes_are_invisible_to_readers() {
    let store = Arc::new(NodeStore::new(schema()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = OperationRegistry::with_builtins();
    registry.register(Observer {
        store: Arc::clone(&store),
        seen: Arc::clone(&seen),
    });
    let manager = hello_manager(registry, Arc::clone(&store)).await;

    let result = manager
        .execute(
            vec![
                Operation::set_text("t", "Changed"),
                Operation::new("observe", json!({ "id": "t" })),
            ],
            Origin::User,
        )
        .await;
    assert!(result.success, "{:?}", result.errors);

    assert_eq!(
        seen.lock().unwrap().as_slice(),
        [Observation {
            outside: Some("Hello".into()),
            inside: Some("Changed".into()),
        }]
    );
    assert_eq!(text_of(&store, "t").as_deref(), Some("Changed"));
}

#[tokio::test]
async fn test_rolled_back_writes_are_never_visible() {
    let store = Arc::new(NodeStore::new(schema()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = OperationRegistry::with_builtins();
    registry.register(Observer {
        store: Arc::clone(&store),
        seen: Arc::clone(&seen),
    });
    let manager = hello_manager(registry, Arc::clone(&store)).await;

    let result = manager
        .execute(
            vec![
                Operation::insert_text("t", 5, " world"),
                Operation::new("observe", json!({ "id": "t" })),
                Operation::delete("missing"),
            ],
            Origin::User,
        )
        .await;
    assert!(!result.success);
    assert_eq!(seen.lock().unwrap()[0].outside.as_deref(), Some("Hello"));
    assert_eq!(text_of(&store, "t").as_deref(), Some("Hello"));
}

#[tokio::test]
async fn test_queued_transaction_sees_previous_commit() {
    let store = Arc::new(NodeStore::new(schema()));
    let manager = hello_manager(OperationRegistry::with_builtins(), Arc::clone(&store)).await;

    let held = manager.lock().acquire().await.unwrap();

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .execute(vec![Operation::insert_text("t", 5, " world")], Origin::User)
                .await
        })
    };
    while manager.lock().queued().len() < 1 {
        tokio::task::yield_now().await;
    }

    // Only valid once " world" is committed
    let second = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .execute(vec![Operation::insert_text("t", 11, "!")], Origin::User)
                .await
        })
    };
    while manager.lock().queued().len() < 2 {
        tokio::task::yield_now().await;
    }
    assert_eq!(text_of(&store, "t").as_deref(), Some("Hello"));

    drop(held);
    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert!(first.success, "{:?}", first.errors);
    assert!(second.success, "{:?}", second.errors);
    assert!(first.record.version < second.record.version);
    assert_eq!(text_of(&store, "t").as_deref(), Some("Hello world!"));
}

#[tokio::test]
async fn test_lock_is_fifo() {
    let store = Arc::new(NodeStore::new(schema()));
    let manager = hello_manager(OperationRegistry::with_builtins(), Arc::clone(&store)).await;

    let held = manager.lock().acquire().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..5 {
        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .execute(
                        vec![Operation::insert_text("t", 0, i.to_string())],
                        Origin::User,
                    )
                    .await
            })
        };
        while manager.lock().queued().len() < i + 1 {
            tokio::task::yield_now().await;
        }
        tasks.push(task);
    }

    drop(held);
    let mut versions = Vec::new();
    for task in tasks {
        let result = task.await.unwrap();
        assert!(result.success, "{:?}", result.errors);
        versions.push(result.record.version.unwrap());
    }

    assert!(versions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(text_of(&store, "t").as_deref(), Some("43210Hello"));
    assert!(manager.lock().queued().is_empty());
    assert!(!manager.lock().is_locked());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_commit_events_arrive_in_commit_order() {
    let store = Arc::new(NodeStore::new(schema()));
    let manager = hello_manager(OperationRegistry::with_builtins(), Arc::clone(&store)).await;
    let mut events = manager.subscribe();

    for round in 0..100 {
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager
                        .execute(vec![Operation::insert_text("t", 0, "x")], Origin::User)
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().success);
        }

        let mut versions = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                EditorEvent::TransactionCommitted(record) => versions.push(record.version.unwrap()),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(versions.len(), 16);
        assert!(
            versions.windows(2).all(|w| w[0] < w[1]),
            "round {round}: {versions:?}"
        );
    }
}

#[tokio::test]
async fn test_lock_timeout_never_starts_transaction() {
    init_tracing();
    let config = EditorConfig {
        lock_timeout_ms: 30,
        ..EditorConfig::default()
    };
    let store = Arc::new(NodeStore::new(schema()));
    let manager =
        TransactionManager::with_config(Arc::clone(&store), OperationRegistry::default(), &config);
    assert!(manager.execute(create_hello(), Origin::User).await.success);
    let mut events = manager.subscribe();

    let held = manager.lock().acquire().await.unwrap();
    let result = manager
        .execute(vec![Operation::insert_text("t", 0, "x")], Origin::User)
        .await;
    drop(held);

    assert!(matches!(
        result.errors.as_slice(),
        [TransactionError::LockTimeout { waited_ms, .. }] if *waited_ms >= 20
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        EditorEvent::TransactionFailed { .. }
    ));
    assert_eq!(text_of(&store, "t").as_deref(), Some("Hello"));

    // The lock is usable again afterwards
    let retry = manager
        .execute(vec![Operation::insert_text("t", 0, "x")], Origin::User)
        .await;
    assert!(retry.success);
}

#[tokio::test]
async fn test_lock_released_after_failure() {
    let store = Arc::new(NodeStore::new(schema()));
    let manager = hello_manager(OperationRegistry::with_builtins(), Arc::clone(&store)).await;

    let failed = manager
        .execute(vec![Operation::delete("missing")], Origin::User)
        .await;
    assert!(!failed.success);
    assert!(!manager.lock().is_locked());
    assert!(!store.is_overlay_open());

    let acquired = tokio::time::timeout(Duration::from_millis(100), manager.lock().acquire()).await;
    assert!(matches!(acquired, Ok(Ok(_))));
}
