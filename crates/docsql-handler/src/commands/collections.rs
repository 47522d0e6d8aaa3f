use bson::{Bson, Document, doc};
use docsql_codec::tjson::{Schema, empty_schema};
use docsql_proto::{CommandError, ErrorCode, values_equal};

use super::{Exec, Reply, cursor_reply};
use crate::params::{Field, Kind, Modifier, extract_params};

const CREATE: &[Field] = &[
    Field::new("create", Kind::String).with(&[Modifier::Collection]),
    Field::new("validator", Kind::Document).with(&[Modifier::Optional]),
    Field::new("validationLevel", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("validationAction", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("writeConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("capped", Kind::Bool).with(&[Modifier::UnimplementedNonDefault]),
    Field::new("timeseries", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("clusteredIndex", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("viewOn", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("pipeline", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("collation", Kind::Any).with(&[Modifier::Unimplemented]),
];

/// Reads a `{$tjsonSchema: "<json>"}` validator.
fn validator_schema(validator: &Document) -> Result<Schema, CommandError> {
    let mut entries = validator.iter();
    let (key, value) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(CommandError::with_argument(
                ErrorCode::BadValue,
                "validator must contain exactly one field",
                "validator",
            ));
        }
    };
    if key != "$tjsonSchema" {
        return Err(CommandError::with_argument(
            ErrorCode::NotImplemented,
            format!("create: validator {key:?} is not implemented yet"),
            "validator",
        ));
    }
    let Bson::String(json) = value else {
        return Err(CommandError::with_argument(
            ErrorCode::BadValue,
            "$tjsonSchema must be a string",
            "validator",
        ));
    };
    Schema::from_json(json.as_bytes())
        .map_err(|e| CommandError::with_argument(ErrorCode::BadValue, e.to_string(), "validator"))
}

pub(super) async fn create(exec: &Exec<'_>, command: &Document) -> Reply {
    let params = extract_params(command, "create", CREATE)?;
    let collection = params.string("create").unwrap_or_default();

    let schema = match params.document("validator") {
        Some(validator) => Some(validator_schema(validator)?),
        None if exec.config.schema_backend => Some(empty_schema(collection)?),
        None => None,
    };

    let created = exec
        .run(
            "create",
            exec.backend
                .create_collection(exec.db, collection, schema.as_ref()),
        )
        .await?;
    if !created {
        return Err(CommandError::with_argument(
            ErrorCode::NamespaceExists,
            format!("Collection {} already exists.", exec.namespace(collection)),
            "create",
        )
        .into());
    }

    Ok(doc! { "ok": 1.0 })
}

const DROP: &[Field] = &[
    Field::new("drop", Kind::String).with(&[Modifier::Collection]),
    Field::new("writeConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
];

pub(super) async fn drop_collection(exec: &Exec<'_>, command: &Document) -> Reply {
    let params = extract_params(command, "drop", DROP)?;
    let collection = params.string("drop").unwrap_or_default();

    let dropped = exec
        .run("drop", exec.backend.drop_collection(exec.db, collection))
        .await?;
    if !dropped {
        return Err(
            CommandError::with_argument(ErrorCode::NamespaceNotFound, "ns not found", "drop").into(),
        );
    }

    Ok(doc! {
        "nIndexesWas": 1,
        "ns": exec.namespace(collection),
        "ok": 1.0,
    })
}

const DROP_DATABASE: &[Field] = &[
    Field::new("dropDatabase", Kind::Any),
    Field::new("writeConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
];

pub(super) async fn drop_database(exec: &Exec<'_>, command: &Document) -> Reply {
    extract_params(command, "dropDatabase", DROP_DATABASE)?;

    let dropped = exec
        .run("dropDatabase", exec.backend.drop_database(exec.db))
        .await?;
    let mut reply = Document::new();
    if dropped {
        reply.insert("dropped", exec.db);
    }
    reply.insert("ok", 1.0);
    Ok(reply)
}

const LIST_COLLECTIONS: &[Field] = &[
    Field::new("listCollections", Kind::Any),
    Field::new("filter", Kind::Document).with(&[Modifier::Optional]),
    Field::new("nameOnly", Kind::Bool).with(&[Modifier::Optional, Modifier::NumericBool]),
    Field::new("authorizedCollections", Kind::Bool)
        .with(&[Modifier::Optional, Modifier::NumericBool]),
    Field::new("cursor", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
];

/// Top-level equality on the fields of a collection entry.
fn entry_matches(entry: &Document, filter: &Document) -> Result<bool, CommandError> {
    for (key, expected) in filter {
        let operator = matches!(expected, Bson::Document(d) if d.keys().any(|k| k.starts_with('$')));
        if key.starts_with('$') || operator {
            return Err(CommandError::with_argument(
                ErrorCode::NotImplemented,
                format!("listCollections: filter {key:?} is not implemented yet"),
                "filter",
            ));
        }
        if !entry.get(key).is_some_and(|actual| values_equal(actual, expected)) {
            return Ok(false);
        }
    }
    Ok(true)
}

pub(super) async fn list_collections(exec: &Exec<'_>, command: &Document) -> Reply {
    let params = extract_params(command, "listCollections", LIST_COLLECTIONS)?;
    let name_only = params.bool("nameOnly").unwrap_or(false);
    let empty = Document::new();
    let filter = params.document("filter").unwrap_or(&empty);

    let tables = exec
        .run("listCollections", exec.backend.tables(exec.db))
        .await?;

    let mut collections = Vec::with_capacity(tables.len());
    for name in tables {
        let entry = if name_only {
            doc! { "name": name, "type": "collection" }
        } else {
            doc! {
                "name": name,
                "type": "collection",
                "options": {},
                "info": { "readOnly": false },
            }
        };
        if entry_matches(&entry, filter)? {
            collections.push(entry);
        }
    }

    Ok(cursor_reply(
        format!("{}.$cmd.listCollections", exec.db),
        collections,
    ))
}
