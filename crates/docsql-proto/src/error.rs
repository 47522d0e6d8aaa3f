use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document, doc};

use crate::code::ErrorCode;

type Source = Arc<dyn StdError + Send + Sync + 'static>;

/// Additional information attached to an error: the command argument,
/// operator or pipeline stage that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrInfo {
    pub argument: String,
}

/// Common surface of errors that can be rendered as a wire reply.
pub trait ProtoErr: StdError {
    fn code(&self) -> ErrorCode;
    /// The reply document sent to the client.
    fn document(&self) -> Document;
    fn info(&self) -> Option<&ErrInfo>;
}

// ── CommandError ────────────────────────────────────────────────

/// Whole-command failure.
#[derive(Debug, Clone)]
pub struct CommandError {
    code: ErrorCode,
    message: String,
    source: Option<Source>,
    info: Option<ErrInfo>,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        CommandError {
            code,
            message: message.into(),
            source: None,
            info: None,
        }
    }

    pub fn with_argument(
        code: ErrorCode,
        message: impl Into<String>,
        argument: impl Into<String>,
    ) -> Self {
        CommandError {
            info: Some(ErrInfo {
                argument: argument.into(),
            }),
            ..CommandError::new(code, message)
        }
    }

    /// Wraps an underlying error; its `Display` becomes the message.
    pub fn wrap<E>(code: ErrorCode, err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CommandError {
            code,
            message: err.to_string(),
            source: Some(Arc::new(err)),
            info: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CommandError::new(ErrorCode::InternalError, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.code.name(),
            self.code.code(),
            self.message
        )
    }
}

impl StdError for CommandError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl ProtoErr for CommandError {
    fn code(&self) -> ErrorCode {
        self.code
    }

    fn document(&self) -> Document {
        doc! {
            "ok": 0.0,
            "errmsg": self.message.as_str(),
            "code": self.code.code(),
            "codeName": self.code.name(),
        }
    }

    fn info(&self) -> Option<&ErrInfo> {
        self.info.as_ref()
    }
}

// ── WriteErrors ─────────────────────────────────────────────────

/// A single per-document failure inside a batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    pub index: i32,
    pub code: ErrorCode,
    pub message: String,
}

/// Ordered per-document failures of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteErrors {
    errors: Vec<WriteError>,
}

impl WriteErrors {
    pub fn new() -> Self {
        WriteErrors::default()
    }

    /// Records `err` for the document at `index`.
    ///
    /// Nested write errors are re-indexed to `index`; anything that is not a
    /// protocol error is recorded as InternalError.
    pub fn append(&mut self, err: &(dyn StdError + 'static), index: i32) {
        if let Some(e) = find_in_chain::<CommandError>(err) {
            self.errors.push(WriteError {
                index,
                code: e.code,
                message: e.message.clone(),
            });
            return;
        }

        if let Some(nested) = find_in_chain::<WriteErrors>(err) {
            for e in &nested.errors {
                self.errors.push(WriteError {
                    index,
                    ..e.clone()
                });
            }
            return;
        }

        self.errors.push(WriteError {
            index,
            code: ErrorCode::InternalError,
            message: err.to_string(),
        });
    }

    /// Appends every error of `other`, shifting its indexes by `offset`.
    pub fn merge(&mut self, other: WriteErrors, offset: i32) {
        self.errors.extend(other.errors.into_iter().map(|mut e| {
            e.index += offset;
            e
        }));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteError> {
        self.errors.iter()
    }

    /// The `writeErrors` array of the reply.
    pub fn to_array(&self) -> Vec<Bson> {
        self.errors
            .iter()
            .map(|e| {
                Bson::Document(doc! {
                    "index": e.index,
                    "code": e.code.code(),
                    "errmsg": e.message.as_str(),
                })
            })
            .collect()
    }
}

impl fmt::Display for WriteErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        f.write_str(&messages.join(", "))
    }
}

impl StdError for WriteErrors {}

impl ProtoErr for WriteErrors {
    fn code(&self) -> ErrorCode {
        self.errors
            .first()
            .map(|e| e.code)
            .unwrap_or(ErrorCode::InternalError)
    }

    fn document(&self) -> Document {
        doc! {
            "ok": 1.0,
            "writeErrors": self.to_array(),
        }
    }

    fn info(&self) -> Option<&ErrInfo> {
        None
    }
}

// ── ProtoError ──────────────────────────────────────────────────

/// Either kind of wire-renderable error.
#[derive(Debug, Clone)]
pub enum ProtoError {
    Command(CommandError),
    Write(WriteErrors),
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoError::Command(e) => e.fmt(f),
            ProtoError::Write(e) => e.fmt(f),
        }
    }
}

impl StdError for ProtoError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ProtoError::Command(e) => Some(e),
            ProtoError::Write(e) => Some(e),
        }
    }
}

impl ProtoErr for ProtoError {
    fn code(&self) -> ErrorCode {
        match self {
            ProtoError::Command(e) => ProtoErr::code(e),
            ProtoError::Write(e) => e.code(),
        }
    }

    fn document(&self) -> Document {
        match self {
            ProtoError::Command(e) => e.document(),
            ProtoError::Write(e) => e.document(),
        }
    }

    fn info(&self) -> Option<&ErrInfo> {
        match self {
            ProtoError::Command(e) => e.info(),
            ProtoError::Write(e) => e.info(),
        }
    }
}

impl From<CommandError> for ProtoError {
    fn from(e: CommandError) -> Self {
        ProtoError::Command(e)
    }
}

impl From<WriteErrors> for ProtoError {
    fn from(e: WriteErrors) -> Self {
        ProtoError::Write(e)
    }
}

/// Validation failure reported by the wire decoding layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error: {}", self.0)
    }
}

impl StdError for ValidationError {}

/// Converts any error into a wire protocol error.
///
/// A `CommandError` or `WriteErrors` anywhere in the source chain is
/// returned as is with `true`. A wire `ValidationError` becomes BadValue,
/// also with `true`. Anything else becomes InternalError with `false`, which
/// tells the caller the failure was unexpected.
pub fn protocol_error(err: &(dyn StdError + 'static)) -> (ProtoError, bool) {
    if let Some(e) = find_in_chain::<ProtoError>(err) {
        return (e.clone(), true);
    }

    if let Some(e) = find_in_chain::<CommandError>(err) {
        return (ProtoError::Command(e.clone()), true);
    }

    if let Some(e) = find_in_chain::<WriteErrors>(err) {
        return (ProtoError::Write(e.clone()), true);
    }

    if let Some(e) = find_in_chain::<ValidationError>(err) {
        return (
            ProtoError::Command(CommandError::wrap(ErrorCode::BadValue, e.clone())),
            true,
        );
    }

    (
        ProtoError::Command(CommandError::internal(err.to_string())),
        false,
    )
}

fn find_in_chain<'a, T: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<T>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}
