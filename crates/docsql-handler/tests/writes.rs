mod common;
use common::*;

use bson::{Bson, doc};
use docsql_handler::{Backend, BackendError, HandlerConfig};
use docsql_proto::{ErrorCode, ProtoErr};
use docsql_query::SqlParam;
use serde_json::json;

// ── insert ──────────────────────────────────────────────────────

#[tokio::test]
async fn insert_assigns_missing_ids() {
    let (handler, backend) = handler();
    let command = doc! { "insert": "c", "documents": [{ "a": 1 }, { "b": 2, "_id": "x" }] };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(reply, doc! { "n": 2, "ok": 1.0 });

    let executed = backend.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].sql.starts_with("INSERT INTO \"test\".\"c\""), "{}", executed[0].sql);

    let SqlParam::Json(first) = &executed[0].params[0] else {
        panic!("expected a json parameter");
    };
    assert_eq!(first["$k"], json!(["_id", "a"]));
    assert!(first["_id"]["$o"].is_string());

    let SqlParam::Json(second) = &executed[1].params[0] else {
        panic!("expected a json parameter");
    };
    assert_eq!(second["$k"], json!(["_id", "b"]));
    assert_eq!(second["_id"], json!("x"));

    assert_eq!(backend.tables(DB).await.unwrap(), ["c"]);
}

#[tokio::test]
async fn ordered_insert_stops_at_first_error() {
    let (handler, backend) = handler();
    backend.push_rows(vec![]);
    backend.push_error(BackendError::native("23505", "duplicate key value"));

    let command = doc! { "insert": "c", "documents": [{ "_id": 1 }, { "_id": 1 }, { "_id": 2 }] };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(
        reply,
        doc! {
            "n": 1,
            "writeErrors": [{ "index": 1, "code": 11000, "errmsg": "duplicate key value" }],
            "ok": 1.0,
        }
    );
    assert_eq!(backend.executed().len(), 2);
}

#[tokio::test]
async fn unordered_insert_continues_past_errors() {
    let (handler, backend) = handler();
    backend.push_rows(vec![]);
    backend.push_error(BackendError::native("23505", "duplicate key value"));
    backend.push_rows(vec![]);

    let command = doc! {
        "insert": "c",
        "documents": [{ "_id": 1 }, { "_id": 1 }, { "_id": 2 }],
        "ordered": false,
    };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(reply.get_i32("n").unwrap(), 2);
    let errors = reply.get_array("writeErrors").unwrap();
    assert_eq!(errors.len(), 1);
    let Bson::Document(error) = &errors[0] else {
        panic!("write error is not a document");
    };
    assert_eq!(error.get_i32("index").unwrap(), 1);
    assert_eq!(error.get_i32("code").unwrap(), ErrorCode::DuplicateKey.code());
    assert_eq!(backend.executed().len(), 3);
}

#[tokio::test]
async fn extension_errors_carry_wire_codes() {
    let (handler, backend) = handler();
    backend.push_error(BackendError::native("M001C", "duplicate key"));
    backend.push_error(BackendError::native("M0004", "wrong type"));

    let command = doc! {
        "insert": "c",
        "documents": [{ "_id": 1 }, { "_id": 2 }],
        "ordered": false,
    };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(
        reply,
        doc! {
            "n": 0,
            "writeErrors": [
                { "index": 0, "code": 11000, "errmsg": "duplicate key" },
                { "index": 1, "code": 14, "errmsg": "wrong type" },
            ],
            "ok": 1.0,
        }
    );
}

#[tokio::test]
async fn insert_rejects_non_document_entries() {
    let (handler, _) = handler();
    let command = doc! { "insert": "c", "documents": [{ "_id": 1 }, 42] };
    let err = run(&handler, command).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::TypeMismatch);
    assert_eq!(
        err.document().get_str("errmsg").unwrap(),
        "BSON field 'insert.documents.1' is the wrong type 'int', expected type 'object'"
    );
}

#[tokio::test]
async fn insert_requires_documents() {
    let (handler, _) = handler();
    let err = run(&handler, doc! { "insert": "c" }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingField);
    assert_eq!(
        err.document().get_str("errmsg").unwrap(),
        "BSON field 'insert.documents' is missing but a required field"
    );
}

#[tokio::test]
async fn schema_backend_validates_against_derived_schema() {
    let (handler, backend) = handler_with(HandlerConfig {
        schema_backend: true,
        ..HandlerConfig::default()
    });

    let command = doc! {
        "insert": "c",
        "documents": [{ "_id": 1, "a": "x" }, { "_id": 2, "tags": [1, 2] }],
        "ordered": false,
    };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(reply.get_i32("n").unwrap(), 1);
    let errors = reply.get_array("writeErrors").unwrap();
    let Bson::Document(error) = &errors[0] else {
        panic!("write error is not a document");
    };
    assert_eq!(error.get_i32("index").unwrap(), 1);
    assert_eq!(
        error.get_i32("code").unwrap(),
        ErrorCode::DocumentValidationFailure.code()
    );

    let schema = backend.schema(DB, "c").await.unwrap().unwrap();
    assert_eq!(schema.title, "c");
    assert!(schema.properties.contains_key("a"));
    assert_eq!(backend.executed().len(), 1);
}

// ── update ──────────────────────────────────────────────────────

#[tokio::test]
async fn update_writes_changed_documents() {
    let (handler, backend) = handler();
    backend.push_rows(vec![stored(doc! { "_id": 1, "a": 1 })]);

    let command = doc! { "update": "c", "updates": [{ "q": { "_id": 1 }, "u": { "$set": { "a": 2 } } }] };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(reply, doc! { "n": 1, "nModified": 1, "ok": 1.0 });

    let executed = backend.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].sql.contains("LIMIT 1"), "{}", executed[0].sql);
    assert!(executed[1].sql.starts_with("UPDATE \"test\".\"c\" SET _jsonb"), "{}", executed[1].sql);
    assert_eq!(executed[1].params[1], SqlParam::Json(json!(1)));
}

#[tokio::test]
async fn update_without_change_is_not_written() {
    let (handler, backend) = handler();
    backend.push_rows(vec![stored(doc! { "_id": 1, "a": 2 })]);

    let command = doc! { "update": "c", "updates": [{ "q": {}, "u": { "$set": { "a": 2 } } }] };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(reply, doc! { "n": 1, "nModified": 0, "ok": 1.0 });
    assert_eq!(backend.executed().len(), 1);
}

#[tokio::test]
async fn upsert_inserts_from_filter() {
    let (handler, backend) = handler();

    let command = doc! {
        "update": "c",
        "updates": [{ "q": { "_id": 5 }, "u": { "$set": { "a": 1 } }, "upsert": true }],
    };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(
        reply,
        doc! {
            "n": 1,
            "nModified": 0,
            "upserted": [{ "index": 0, "_id": 5 }],
            "ok": 1.0,
        }
    );

    let executed = backend.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[1].sql.starts_with("INSERT INTO"), "{}", executed[1].sql);
}

#[tokio::test]
async fn multi_replacement_is_a_write_error() {
    let (handler, _) = handler();
    let command = doc! {
        "update": "c",
        "updates": [{ "q": {}, "u": { "a": 1 }, "multi": true }],
    };
    let reply = run(&handler, command).await.unwrap();
    let errors = reply.get_array("writeErrors").unwrap();
    let Bson::Document(error) = &errors[0] else {
        panic!("write error is not a document");
    };
    assert_eq!(error.get_i32("code").unwrap(), ErrorCode::FailedToParse.code());
    assert_eq!(reply.get_i32("n").unwrap(), 0);
}

// ── delete ──────────────────────────────────────────────────────

#[tokio::test]
async fn delete_removes_matched_ids() {
    let (handler, backend) = handler();
    backend.push_rows(vec![stored(doc! { "_id": 1 }), stored(doc! { "_id": 2 })]);
    backend.push_rows(vec![vec![json!(1)], vec![json!(2)]]);

    let command = doc! { "delete": "c", "deletes": [{ "q": {}, "limit": 0 }] };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(reply, doc! { "n": 2, "ok": 1.0 });

    let executed = backend.executed();
    assert!(!executed[0].sql.contains("LIMIT"), "{}", executed[0].sql);
    assert!(executed[1].sql.starts_with("DELETE FROM \"test\".\"c\""), "{}", executed[1].sql);
    assert_eq!(executed[1].params, [SqlParam::Json(json!([1, 2]))]);
}

#[tokio::test]
async fn delete_with_limit_fetches_one() {
    let (handler, backend) = handler();
    let command = doc! { "delete": "c", "deletes": [{ "q": { "a": 1 }, "limit": 1 }] };
    let reply = run(&handler, command).await.unwrap();
    assert_eq!(reply, doc! { "n": 0, "ok": 1.0 });
    assert!(backend.executed()[0].sql.contains("LIMIT 1"));
}

#[tokio::test]
async fn delete_limit_must_be_zero_or_one() {
    let (handler, _) = handler();
    let command = doc! { "delete": "c", "deletes": [{ "q": {}, "limit": 2 }] };
    let err = run(&handler, command).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedToParse);
}
