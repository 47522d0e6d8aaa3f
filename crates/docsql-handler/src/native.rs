//! Translation of backend failures into wire protocol errors.

use std::sync::LazyLock;

use bson::{Bson, Document};
use docsql_proto::{CommandError, ErrorCode};
use regex::Regex;
use tracing::error;

use crate::backend::BackendError;

static MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(function .+ does not exist|operator does not exist|operator not defined|not implemented yet)",
    )
    .unwrap_or_else(|e| unreachable!("invalid pattern: {e}"))
});

/// SQLSTATEs in the `M` class raised by the document extension.
const M_CODES: &[(&str, ErrorCode)] = &[
    ("M0001", ErrorCode::BadValue),
    ("M0003", ErrorCode::FailedToParse),
    ("M0004", ErrorCode::TypeMismatch),
    ("M000A", ErrorCode::PathNotViable),
    ("M000D", ErrorCode::ConflictingUpdateOperators),
    ("M000G", ErrorCode::DollarPrefixedFieldName),
    ("M000J", ErrorCode::EmptyFieldName),
    ("M000M", ErrorCode::ImmutableField),
    ("M000N", ErrorCode::CannotCreateIndex),
    ("M000O", ErrorCode::IndexAlreadyExists),
    ("M000Q", ErrorCode::InvalidNamespace),
    ("M000R", ErrorCode::IndexOptionsConflict),
    ("M000S", ErrorCode::IndexKeySpecsConflict),
    ("M001C", ErrorCode::DuplicateKey),
];

const UNDEFINED_FUNCTION: &str = "42883";
const CONNECTION_FAILURE: &str = "08006";

fn standard_code(sqlstate: &str) -> Option<ErrorCode> {
    let code = match sqlstate {
        "23505" => ErrorCode::DuplicateKey,
        "42P01" | "3F000" => ErrorCode::NamespaceNotFound,
        "42P07" | "42P06" => ErrorCode::NamespaceExists,
        "57014" => ErrorCode::MaxTimeMSExpired,
        "23514" => ErrorCode::DocumentValidationFailure,
        _ => return None,
    };
    Some(code)
}

fn m_code(sqlstate: &str) -> Option<ErrorCode> {
    M_CODES
        .iter()
        .find(|(state, _)| *state == sqlstate)
        .map(|(_, code)| *code)
}

/// Maps a backend error to a command error. `arg` names the operation.
///
/// With `dev_build` set, an unmapped SQLSTATE panics; callers run commands
/// under a panic guard that turns this into InternalError.
pub fn map_backend_error(err: &BackendError, arg: &str, dev_build: bool) -> CommandError {
    let (sqlstate, message) = match err {
        BackendError::Native { code, message } => (code.as_str(), message.as_str()),
        BackendError::Canceled => {
            return CommandError::with_argument(ErrorCode::Interrupted, "operation was interrupted", arg);
        }
        BackendError::DeadlineExceeded => {
            return CommandError::with_argument(
                ErrorCode::MaxTimeMSExpired,
                "operation exceeded time limit",
                arg,
            );
        }
        BackendError::Connection(_) | BackendError::Other(_) => {
            error!(arg, error = %err, "unexpected backend error");
            return CommandError::with_argument(ErrorCode::InternalError, err.to_string(), arg);
        }
    };

    if dev_build && MISSING.is_match(message) {
        error!(arg, sqlstate, message, "missing backend function");
    }

    let code = match sqlstate {
        UNDEFINED_FUNCTION => {
            error!(arg, sqlstate, message, "missing function");
            Some(ErrorCode::InternalError)
        }
        CONNECTION_FAILURE => {
            error!(arg, sqlstate, message, "connection failure");
            Some(ErrorCode::InternalError)
        }
        s if s.len() == 5 && s.starts_with('M') => m_code(s),
        s => standard_code(s),
    };

    let code = match code {
        Some(code) => code,
        None if dev_build => panic!("unmapped error code {sqlstate} for {arg}: {message}"),
        None => {
            error!(arg, sqlstate, message, "unmapped error code");
            ErrorCode::InternalError
        }
    };

    CommandError::with_argument(code, message, arg)
}

/// Decodes a SQLSTATE packed six bits per character, low character first.
pub fn unpack_sqlstate(code: i32) -> String {
    (0..5)
        .map(|i| char::from(((code >> (6 * i)) & 0x3F) as u8 + b'0'))
        .collect()
}

/// Maps a packed SQLSTATE found inside write errors to its wire code. Other
/// codes are returned unchanged.
pub fn map_wrapped_code(code: i32) -> i32 {
    m_code(&unpack_sqlstate(code)).map_or(code, ErrorCode::code)
}

/// Rewrites the `code` of every `writeErrors` element, and a top-level
/// `code` as `createIndexes` replies carry it, through [`map_wrapped_code`].
/// For replies a backend builds itself; the commands here emit wire codes.
pub fn map_write_errors(reply: &mut Document) {
    if let Ok(code) = reply.get_i32("code") {
        reply.insert("code", map_wrapped_code(code));
    }

    let Ok(write_errors) = reply.get_array_mut("writeErrors") else {
        return;
    };
    for item in write_errors {
        if let Bson::Document(write_error) = item {
            if let Ok(code) = write_error.get_i32("code") {
                write_error.insert("code", map_wrapped_code(code));
            }
        }
    }
}
