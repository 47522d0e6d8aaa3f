#![allow(dead_code)]

use std::sync::Arc;

use bson::Document;
use docsql_codec::fjson;
use docsql_handler::{Context, Handler, HandlerConfig, MemoryBackend, Row};
use docsql_proto::ProtoError;

pub const DB: &str = "test";

pub fn handler() -> (Handler, Arc<MemoryBackend>) {
    handler_with(HandlerConfig::default())
}

pub fn handler_with(config: HandlerConfig) -> (Handler, Arc<MemoryBackend>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let backend = Arc::new(MemoryBackend::new());
    (Handler::new(backend.clone(), config), backend)
}

pub async fn run(handler: &Handler, command: Document) -> Result<Document, ProtoError> {
    handler.handle(&Context::default(), DB, &command).await
}

/// A `_jsonb` row holding `doc`.
pub fn stored(doc: Document) -> Row {
    vec![fjson::document_to_json(&doc).unwrap()]
}
