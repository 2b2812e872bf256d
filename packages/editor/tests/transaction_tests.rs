//! Transactions through the editor: atomicity, positions, undo/redo, events,
//! integrity and purge

use folio_editor::{
    EditorConfig, EditorEvent, Editor, KeepTombstones, NodePosition, Operation,
    OperationError, PositionError, PurgeOlderThan, QueryOptions, Selection, TransactionError,
};
use folio_common::{NodeData, NodeId};
use folio_schema::{ErrorCode, NodeSpec, Schema, SchemaSpec};

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

async fn hello_editor() -> Editor {
    init_tracing();
    let editor = Editor::new(schema());
    let result = editor.apply(create_hello()).await;
    assert!(result.success, "{:?}", result.errors);
    editor
}

fn id(s: &str) -> NodeId {
    NodeId::from(s)
}

#[tokio::test]
async fn test_hello_positions() {
    let editor = hello_editor().await;
    let store = editor.store();

    assert_eq!(store.to_absolute(&id("d"), 0).unwrap(), 0);
    assert_eq!(store.to_absolute(&id("p"), 0).unwrap(), 1);
    assert_eq!(store.to_absolute(&id("t"), 0).unwrap(), 2);
    assert_eq!(store.to_absolute(&id("t"), 5).unwrap(), 7);
    assert_eq!(store.document_end(&id("d")).unwrap(), 10);

    assert_eq!(store.from_absolute(&id("d"), 4).unwrap(), NodePosition::new("t", 2));
    assert_eq!(store.from_absolute(&id("d"), 8).unwrap(), NodePosition::new("t", 5));
    assert!(matches!(
        store.from_absolute(&id("d"), 11),
        Err(PositionError::OutOfBounds { offset: 11, end: 10 })
    ));
}

#[tokio::test]
async fn test_failed_operation_rolls_back_whole_transaction() {
    let editor = hello_editor().await;
    let before = editor.snapshot(true);
    let version = editor.store().version();

    let result = editor
        .apply(vec![
            Operation::create(NodeData::text("t2", "text", "World")),
            Operation::set_text("p", "paragraphs hold no text"),
        ])
        .await;

    assert!(!result.success);
    assert!(result.operations().is_empty());
    match &result.errors[..] {
        [TransactionError::Operation {
            index: 1,
            source: OperationError::Schema(validation),
            ..
        }] => assert!(validation.has_code(ErrorCode::TextNotAllowed)),
        other => panic!("unexpected errors: {other:?}"),
    }

    assert!(editor
        .store()
        .get_node_with(&id("t2"), QueryOptions::include_removed())
        .is_none());
    assert_eq!(editor.snapshot(true), before);
    assert_eq!(editor.store().version(), version);
    assert!(!editor.store().is_overlay_open());
}

#[tokio::test]
async fn test_failed_transaction_on_empty_store_creates_nothing() {
    init_tracing();
    let editor = Editor::new(schema());

    let result = editor
        .apply(vec![
            Operation::create(NodeData::text("t", "text", "Hello")),
            Operation::set_text("missing", "x"),
        ])
        .await;

    assert!(!result.success);
    assert_eq!(
        result.errors[0].operation_error(),
        Some(&OperationError::NotFound(id("missing")))
    );
    assert_eq!(editor.store().node_count(QueryOptions::include_removed()), 0);
    assert!(!editor.can_undo().await);
}

#[tokio::test]
async fn test_undo_redo_create() {
    let editor = hello_editor().await;
    let original: Vec<_> = ["d", "p", "t"]
        .iter()
        .map(|n| editor.store().get_node(&id(n)).unwrap())
        .collect();

    assert!(editor.undo().await.unwrap());
    for n in ["d", "p", "t"] {
        assert!(editor.store().get_node(&id(n)).is_none());
        let tombstone = editor
            .store()
            .get_node_with(&id(n), QueryOptions::include_removed())
            .unwrap();
        assert!(tombstone.removed);
    }
    assert!(editor.store().documents().is_empty());

    assert!(editor.redo().await.unwrap());
    for node in &original {
        let restored = editor.store().get_node(&node.id).unwrap();
        assert_eq!(restored.to_data(), node.to_data());
        assert_eq!(restored.parent, node.parent);
        assert_eq!(restored.created_at, node.created_at);
    }
    assert_eq!(editor.store().to_absolute(&id("t"), 5).unwrap(), 7);
    assert!(editor.store().check_integrity().is_ok());
}

#[tokio::test]
async fn test_undo_nothing() {
    init_tracing();
    let editor = Editor::new(schema());
    assert!(!editor.undo().await.unwrap());
    assert!(!editor.redo().await.unwrap());
}

#[tokio::test]
async fn test_detached_nodes_fail_integrity_check() {
    init_tracing();
    let editor = Editor::new(schema());
    let result = editor
        .apply(vec![Operation::create(NodeData::text("loose", "text", "?"))])
        .await;
    assert!(matches!(
        result.errors.as_slice(),
        [TransactionError::Integrity(_)]
    ));
    assert_eq!(editor.store().node_count(QueryOptions::include_removed()), 0);

    let config = EditorConfig {
        verify_integrity: false,
        ..EditorConfig::default()
    };
    let lenient = Editor::with_config(schema(), config);
    let result = lenient
        .apply(vec![Operation::create(NodeData::text("loose", "text", "?"))])
        .await;
    assert!(result.success);
    assert!(lenient.store().check_integrity().is_err());
}

#[tokio::test]
async fn test_events_follow_outcomes() {
    let editor = hello_editor().await;
    let mut events = editor.subscribe();

    let ok = editor.apply(vec![Operation::insert_text("t", 5, "!")]).await;
    match events.recv().await.unwrap() {
        EditorEvent::TransactionCommitted(record) => {
            assert_eq!(record.id, ok.transaction_id);
            assert_eq!(record.operations.len(), 1);
            assert_eq!(record.version, Some(editor.store().version()));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let failed = editor.apply(vec![Operation::delete("nope")]).await;
    match events.recv().await.unwrap() {
        EditorEvent::TransactionFailed {
            transaction_id,
            errors,
        } => {
            assert_eq!(transaction_id, failed.transaction_id);
            assert_eq!(errors, failed.errors);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_selection_is_carried_through() {
    let editor = hello_editor().await;
    let caret = Selection::caret(NodePosition::new("t", 5));

    let result = editor
        .apply_with_selection(
            vec![Operation::insert_text("t", 0, ">> ")],
            Some(caret.clone()),
        )
        .await;
    assert_eq!(
        result.selection_after(),
        Some(&Selection::caret(NodePosition::new("t", 8)))
    );
    assert_eq!(result.record.selection_before.as_ref(), Some(&caret));

    let failed = editor
        .apply_with_selection(vec![Operation::delete("nope")], Some(caret.clone()))
        .await;
    assert_eq!(failed.selection_after(), Some(&caret));
}

#[tokio::test]
async fn test_remote_edits_skip_history() {
    let editor = hello_editor().await;
    editor.clear_history().await;

    let result = editor
        .apply_remote(vec![Operation::insert_text("t", 5, " there")])
        .await;
    assert!(result.success);
    assert!(!editor.can_undo().await);
    assert_eq!(
        editor.store().get_node(&id("t")).unwrap().text.as_deref(),
        Some("Hello there")
    );
}

#[tokio::test]
async fn test_purge_removes_old_tombstones() {
    let editor = hello_editor().await;
    let result = editor
        .apply(vec![
            Operation::create(NodeData::text("t2", "text", "Bye")),
            Operation::create_in(
                NodeData::element("p2", "paragraph").with_content(vec!["t2".into()]),
                "d",
                None,
            ),
        ])
        .await;
    assert!(result.success, "{:?}", result.errors);

    assert!(editor.apply(vec![Operation::delete("p2")]).await.success);
    assert_eq!(editor.store().node_count(QueryOptions::default()), 3);
    assert_eq!(editor.store().node_count(QueryOptions::include_removed()), 5);

    assert_eq!(editor.purge(&KeepTombstones).await.unwrap(), 0);
    assert_eq!(editor.purge(&PurgeOlderThan { versions: 1 }).await.unwrap(), 0);

    assert!(editor.apply(vec![Operation::insert_text("t", 0, "Oh, ")]).await.success);
    assert_eq!(editor.purge(&PurgeOlderThan { versions: 1 }).await.unwrap(), 2);
    assert_eq!(editor.store().node_count(QueryOptions::include_removed()), 3);

    // undoing the typing still works, undoing the purged delete cannot
    assert!(editor.undo().await.unwrap());
    let err = editor.undo().await.unwrap_err();
    assert!(err.to_string().contains("p2") || err.to_string().contains("t2"));
    assert!(editor.can_undo().await);
}

#[tokio::test]
async fn test_unknown_operation() {
    let editor = hello_editor().await;
    let result = editor
        .apply(vec![Operation::new("explode", serde_json::json!({}))])
        .await;
    assert_eq!(
        result.errors[0].operation_error(),
        Some(&OperationError::UnknownOperation("explode".into()))
    );
}

#[tokio::test]
async fn test_snapshot_restores_editor() {
    let editor = hello_editor().await;
    let json = editor.snapshot(false).to_json().unwrap();

    let restored = Editor::from_snapshot(
        schema(),
        folio_editor::Snapshot::from_json(&json).unwrap(),
        EditorConfig::default(),
    )
    .unwrap();
    assert_eq!(restored.store().to_absolute(&id("t"), 5).unwrap(), 7);

    let result = restored.apply(vec![Operation::insert_text("t", 5, "!")]).await;
    assert!(result.success);
    assert!(restored.undo().await.unwrap());
    assert_eq!(
        restored.store().get_node(&id("t")).unwrap().text.as_deref(),
        Some("Hello")
    );
}
