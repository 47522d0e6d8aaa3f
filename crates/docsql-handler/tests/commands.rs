mod common;
use common::*;

use bson::{Bson, doc};
use docsql_handler::{BackendError, HandlerConfig};
use docsql_proto::{ErrorCode, ProtoErr};
use serde_json::json;

// ── Dispatch ────────────────────────────────────────────────────

#[tokio::test]
async fn ping() {
    let (handler, _) = handler();
    let reply = run(&handler, doc! { "ping": 1 }).await.unwrap();
    assert_eq!(reply, doc! { "ok": 1.0 });
}

#[tokio::test]
async fn unknown_command() {
    let (handler, _) = handler();
    let err = run(&handler, doc! { "frobnicate": 1 }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CommandNotFound);
    assert_eq!(err.document().get_str("errmsg").unwrap(), "no such command: 'frobnicate'");
}

#[tokio::test]
async fn empty_command() {
    let (handler, _) = handler();
    let err = run(&handler, doc! {}).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CommandNotFound);
}

#[tokio::test]
async fn list_commands_names_every_command() {
    let (handler, _) = handler();
    let reply = run(&handler, doc! { "listCommands": 1 }).await.unwrap();
    let commands = reply.get_document("commands").unwrap();
    for name in ["aggregate", "count", "find", "insert", "update", "delete", "ping"] {
        assert!(commands.contains_key(name), "{name}");
    }
    assert!(commands.get_document("ping").unwrap().contains_key("help"));
}

#[tokio::test]
async fn bad_max_time_ms() {
    let (handler, _) = handler();
    let err = run(&handler, doc! { "find": "c", "maxTimeMS": -1 }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadValue);
    assert_eq!(
        err.document().get_str("errmsg").unwrap(),
        "-1 value for maxTimeMS is out of range"
    );
}

#[tokio::test]
async fn unmapped_code_panics_in_dev_build_and_is_contained() {
    let (handler, backend) = handler_with(HandlerConfig {
        dev_build: true,
        ..HandlerConfig::default()
    });
    backend.push_error(BackendError::native("XX999", "something odd"));

    let err = run(&handler, doc! { "find": "c" }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InternalError);

    let reply = run(&handler, doc! { "ping": 1 }).await.unwrap();
    assert_eq!(reply, doc! { "ok": 1.0 });
}

#[tokio::test]
async fn unmapped_code_is_internal_error_in_release() {
    let (handler, backend) = handler();
    backend.push_error(BackendError::native("XX999", "something odd"));

    let err = run(&handler, doc! { "find": "c" }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InternalError);
    assert_eq!(err.document().get_str("errmsg").unwrap(), "something odd");
}

// ── count ───────────────────────────────────────────────────────

#[tokio::test]
async fn count_rejects_non_string_collection() {
    let (handler, _) = handler();
    let err = run(&handler, doc! { "count": [1, 2] }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidNamespace);
    assert_eq!(
        err.document().get_str("errmsg").unwrap(),
        "collection name has invalid type array"
    );
}

#[tokio::test]
async fn count_reads_the_aggregate() {
    let (handler, backend) = handler();
    backend.push_rows(vec![vec![json!(3)]]);

    let reply = run(&handler, doc! { "count": "c", "query": {} }).await.unwrap();
    assert_eq!(reply, doc! { "n": 3, "ok": 1.0 });

    let executed = backend.executed();
    assert_eq!(executed.len(), 1);
    assert!(
        executed[0].sql.starts_with("SELECT COUNT(*) FROM ("),
        "{}",
        executed[0].sql
    );
    assert!(executed[0].sql.contains("\"test\".\"c\""), "{}", executed[0].sql);
}

#[tokio::test]
async fn count_of_missing_collection_is_zero() {
    let (handler, backend) = handler();
    backend.push_error(BackendError::native("42P01", "relation does not exist"));

    let reply = run(&handler, doc! { "count": "missing" }).await.unwrap();
    assert_eq!(reply, doc! { "n": 0, "ok": 1.0 });
}

#[tokio::test]
async fn count_rejects_negative_skip() {
    let (handler, _) = handler();
    let err = run(&handler, doc! { "count": "c", "skip": -1 }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValueNegative);
}

// ── find / aggregate ────────────────────────────────────────────

#[tokio::test]
async fn find_projects_fetched_documents() {
    let (handler, backend) = handler();
    backend.push_rows(vec![
        stored(doc! { "_id": 1, "a": "x", "b": true }),
        stored(doc! { "_id": 2, "a": "y", "b": false }),
    ]);

    let reply = run(&handler, doc! { "find": "c", "projection": { "a": 1 } })
        .await
        .unwrap();
    let cursor = reply.get_document("cursor").unwrap();
    assert_eq!(cursor.get_str("ns").unwrap(), "test.c");
    assert_eq!(cursor.get_i64("id").unwrap(), 0);
    assert_eq!(
        cursor.get_array("firstBatch").unwrap(),
        &vec![
            Bson::Document(doc! { "_id": 1, "a": "x" }),
            Bson::Document(doc! { "_id": 2, "a": "y" }),
        ]
    );
}

#[tokio::test]
async fn find_on_missing_collection_is_empty() {
    let (handler, backend) = handler();
    backend.push_error(BackendError::native("3F000", "schema does not exist"));

    let reply = run(&handler, doc! { "find": "c" }).await.unwrap();
    let cursor = reply.get_document("cursor").unwrap();
    assert!(cursor.get_array("firstBatch").unwrap().is_empty());
}

#[tokio::test]
async fn find_rejects_unknown_fields() {
    let (handler, _) = handler();
    let err = run(&handler, doc! { "find": "c", "bogus": 1 }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedToParse);
}

#[tokio::test]
async fn aggregate_group_returns_groups() {
    let (handler, backend) = handler();
    backend.push_rows(vec![
        stored(doc! { "_id": "x", "n": 2 }),
        stored(doc! { "_id": "y", "n": 1 }),
    ]);

    let command = doc! {
        "aggregate": "c",
        "pipeline": [{ "$group": { "_id": "$a", "n": { "$sum": 1 } } }],
        "cursor": {},
    };
    let reply = run(&handler, command).await.unwrap();
    let batch = reply
        .get_document("cursor")
        .unwrap()
        .get_array("firstBatch")
        .unwrap();
    assert_eq!(
        batch,
        &vec![
            Bson::Document(doc! { "_id": "x", "n": 2 }),
            Bson::Document(doc! { "_id": "y", "n": 1 }),
        ]
    );

    let sql = &backend.executed()[0].sql;
    assert!(sql.contains("GROUP BY"), "{sql}");
}

#[tokio::test]
async fn aggregate_requires_cursor() {
    let (handler, _) = handler();
    let err = run(&handler, doc! { "aggregate": "c", "pipeline": [] })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingField);
}

// ── Collections ─────────────────────────────────────────────────

#[tokio::test]
async fn create_list_and_drop() {
    let (handler, _) = handler();
    run(&handler, doc! { "create": "b" }).await.unwrap();
    run(&handler, doc! { "create": "a" }).await.unwrap();

    let err = run(&handler, doc! { "create": "a" }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NamespaceExists);
    assert_eq!(
        err.document().get_str("errmsg").unwrap(),
        "Collection test.a already exists."
    );

    let reply = run(&handler, doc! { "listCollections": 1, "nameOnly": true })
        .await
        .unwrap();
    let cursor = reply.get_document("cursor").unwrap();
    assert_eq!(cursor.get_str("ns").unwrap(), "test.$cmd.listCollections");
    assert_eq!(
        cursor.get_array("firstBatch").unwrap(),
        &vec![
            Bson::Document(doc! { "name": "a", "type": "collection" }),
            Bson::Document(doc! { "name": "b", "type": "collection" }),
        ]
    );

    let reply = run(&handler, doc! { "listCollections": 1, "filter": { "name": "b" } })
        .await
        .unwrap();
    let batch = reply
        .get_document("cursor")
        .unwrap()
        .get_array("firstBatch")
        .unwrap();
    assert_eq!(batch.len(), 1);

    let reply = run(&handler, doc! { "drop": "a" }).await.unwrap();
    assert_eq!(reply, doc! { "nIndexesWas": 1, "ns": "test.a", "ok": 1.0 });
    let err = run(&handler, doc! { "drop": "a" }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NamespaceNotFound);

    let reply = run(&handler, doc! { "dropDatabase": 1 }).await.unwrap();
    assert_eq!(reply, doc! { "dropped": "test", "ok": 1.0 });
    let reply = run(&handler, doc! { "dropDatabase": 1 }).await.unwrap();
    assert_eq!(reply, doc! { "ok": 1.0 });
}

#[tokio::test]
async fn list_collections_rejects_operator_filters() {
    let (handler, _) = handler();
    let command = doc! { "listCollections": 1, "filter": { "name": { "$regex": "^a" } } };
    let err = run(&handler, command).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotImplemented);
}

#[tokio::test]
async fn create_rejects_unsupported_validator() {
    let (handler, _) = handler();
    let command = doc! { "create": "c", "validator": { "$jsonSchema": {} } };
    let err = run(&handler, command).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotImplemented);
}
