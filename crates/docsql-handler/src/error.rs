use docsql_codec::{fjson, tjson};
use docsql_proto::{CommandError, WriteErrors};

/// Failure of a command handler.
///
/// Protocol errors are kept as sources so `protocol_error` finds them;
/// codec failures are unexpected and reach the client as InternalError.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Command(#[from] CommandError),
    #[error("{0}")]
    Write(#[from] WriteErrors),
    #[error("decoding stored document: {0}")]
    Storage(#[from] fjson::Error),
    #[error("schema: {0}")]
    Schema(#[from] tjson::Error),
}
