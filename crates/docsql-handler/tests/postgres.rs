//! Runs commands against a live server. Set `DOCSQL_TEST_POSTGRES_URL` and
//! build with `--features postgres` to enable.
#![cfg(feature = "postgres")]

use std::sync::Arc;

use bson::{Bson, Document, doc};
use docsql_handler::postgres::PostgresBackend;
use docsql_handler::{Context, Handler, HandlerConfig};
use docsql_proto::{ErrorCode, ProtoErr};

const DB: &str = "docsql_handler_test";

async fn connect() -> Option<Handler> {
    let url = std::env::var("DOCSQL_TEST_POSTGRES_URL").ok()?;
    let backend = PostgresBackend::connect(&url).await.unwrap();
    Some(Handler::new(Arc::new(backend), HandlerConfig::default()))
}

#[tokio::test]
async fn crud_round_trip() {
    let Some(handler) = connect().await else {
        return;
    };
    let ctx = Context::default();
    let run = |command: Document| {
        let handler = handler.clone();
        let ctx = ctx.clone();
        async move { handler.handle(&ctx, DB, &command).await }
    };

    run(doc! { "dropDatabase": 1 }).await.unwrap();

    let reply = run(doc! {
        "insert": "items",
        "documents": [
            { "_id": 1, "kind": "a", "qty": 5 },
            { "_id": 2, "kind": "b", "qty": 7 },
            { "_id": 3, "kind": "a", "qty": 1 },
        ],
    })
    .await
    .unwrap();
    assert_eq!(reply.get_i32("n").unwrap(), 3);

    let reply = run(doc! { "insert": "items", "documents": [{ "_id": 1 }] })
        .await
        .unwrap();
    let errors = reply.get_array("writeErrors").unwrap();
    let Bson::Document(error) = &errors[0] else {
        panic!("write error is not a document");
    };
    assert_eq!(error.get_i32("code").unwrap(), ErrorCode::DuplicateKey.code());

    let reply = run(doc! { "count": "items", "query": { "kind": "a" } })
        .await
        .unwrap();
    assert_eq!(reply.get_i32("n").unwrap(), 2);

    let reply = run(doc! {
        "find": "items",
        "filter": { "qty": { "$gt": 2 } },
        "sort": { "qty": -1 },
        "projection": { "qty": 1 },
    })
    .await
    .unwrap();
    let batch = reply
        .get_document("cursor")
        .unwrap()
        .get_array("firstBatch")
        .unwrap();
    assert_eq!(
        batch,
        &vec![
            Bson::Document(doc! { "_id": 2, "qty": 7 }),
            Bson::Document(doc! { "_id": 1, "qty": 5 }),
        ]
    );

    let reply = run(doc! {
        "update": "items",
        "updates": [{ "q": { "kind": "a" }, "u": { "$inc": { "qty": 10 } }, "multi": true }],
    })
    .await
    .unwrap();
    assert_eq!(reply.get_i32("nModified").unwrap(), 2);

    let reply = run(doc! { "delete": "items", "deletes": [{ "q": { "kind": "b" }, "limit": 0 }] })
        .await
        .unwrap();
    assert_eq!(reply.get_i32("n").unwrap(), 1);

    let err = run(doc! { "create": "items" }).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NamespaceExists);

    run(doc! { "drop": "items" }).await.unwrap();
    let reply = run(doc! { "find": "items" }).await.unwrap();
    let batch = reply
        .get_document("cursor")
        .unwrap()
        .get_array("firstBatch")
        .unwrap();
    assert!(batch.is_empty());

    run(doc! { "dropDatabase": 1 }).await.unwrap();
}

#[tokio::test]
async fn group_accumulates_per_key() {
    let Some(handler) = connect().await else {
        return;
    };
    let ctx = Context::default();
    let run = |command: Document| {
        let handler = handler.clone();
        let ctx = ctx.clone();
        async move { handler.handle(&ctx, "docsql_handler_group", &command).await }
    };
    let first_batch = |reply: Document| {
        reply
            .get_document("cursor")
            .unwrap()
            .get_array("firstBatch")
            .unwrap()
            .clone()
    };

    run(doc! { "dropDatabase": 1 }).await.unwrap();
    run(doc! {
        "insert": "sales",
        "documents": [
            { "_id": 1, "a": 1, "b": 10, "s": "x" },
            { "_id": 2, "a": 1, "b": 20 },
            { "_id": 3, "a": 2, "b": 5 },
        ],
    })
    .await
    .unwrap();

    let reply = run(doc! {
        "aggregate": "sales",
        "pipeline": [
            { "$group": { "_id": "$a", "total": { "$sum": "$b" } } },
            { "$sort": { "_id": 1 } },
        ],
        "cursor": {},
    })
    .await
    .unwrap();
    assert_eq!(
        first_batch(reply),
        vec![
            Bson::Document(doc! { "_id": 1, "total": 30 }),
            Bson::Document(doc! { "_id": 2, "total": 5 }),
        ]
    );

    let reply = run(doc! {
        "aggregate": "sales",
        "pipeline": [{ "$group": { "_id": null, "avg": { "$avg": "$s" } } }],
        "cursor": {},
    })
    .await
    .unwrap();
    assert_eq!(
        first_batch(reply),
        vec![Bson::Document(doc! { "_id": null, "avg": null })]
    );

    let reply = run(doc! {
        "aggregate": "sales",
        "pipeline": [
            { "$match": { "a": 99 } },
            { "$group": { "_id": null, "n": { "$sum": 1 } } },
        ],
        "cursor": {},
    })
    .await
    .unwrap();
    assert!(first_batch(reply).is_empty());

    run(doc! { "dropDatabase": 1 }).await.unwrap();
}
