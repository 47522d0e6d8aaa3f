//! JSON encodings of documents: `fjson` for the `_jsonb` storage column and
//! `tjson` for schema-carrying backends.

pub mod fjson;
pub mod tjson;
