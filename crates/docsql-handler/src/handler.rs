use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bson::Document;
use docsql_proto::{CommandError, ErrorCode, ProtoError, protocol_error};
use futures::FutureExt;
use tracing::{Instrument, error, info_span};

use crate::backend::{Backend, Context};
use crate::commands::{Exec, dispatch};
use crate::config::HandlerConfig;
use crate::numeric::get_optional_positive_number;

/// Executes decoded commands against a backend.
///
/// Handlers are cheap to share; every call is independent.
#[derive(Clone)]
pub struct Handler {
    backend: Arc<dyn Backend>,
    config: HandlerConfig,
}

impl Handler {
    pub fn new(backend: Arc<dyn Backend>, config: HandlerConfig) -> Self {
        Handler { backend, config }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Runs `command` against database `db` and returns the reply document.
    ///
    /// Failures come back as protocol errors ready to be rendered; the
    /// handler stays usable after any of them, panics included.
    pub async fn handle(
        &self,
        ctx: &Context,
        db: &str,
        command: &Document,
    ) -> Result<Document, ProtoError> {
        let Some(name) = command.keys().next() else {
            return Err(CommandError::new(ErrorCode::CommandNotFound, "no such command: ''").into());
        };

        let ctx = self.deadline(ctx, command)?;
        let exec = Exec {
            backend: self.backend.as_ref(),
            config: &self.config,
            ctx,
            db,
        };

        let span = info_span!("command", command = name.as_str(), db);
        let result = AssertUnwindSafe(dispatch(&exec, name, command))
            .catch_unwind()
            .instrument(span)
            .await;

        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                let (proto, known) = protocol_error(&err);
                if !known {
                    error!(command = name.as_str(), error = %err, "command failed");
                }
                Err(proto)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| panic.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown panic");
                error!(command = name.as_str(), message, "command panicked");
                Err(CommandError::internal(message).into())
            }
        }
    }

    /// The command's context: `maxTimeMS` if given and non-zero, else the
    /// configured default.
    fn deadline(&self, ctx: &Context, command: &Document) -> Result<Context, ProtoError> {
        let max_time = match command.get("maxTimeMS") {
            Some(value) => get_optional_positive_number("maxTimeMS", value)? as u64,
            None => 0,
        };
        let max_time = match (max_time, self.config.default_max_time_ms) {
            (0, Some(default)) => default,
            (ms, _) => ms,
        };
        Ok(match max_time {
            0 => ctx.clone(),
            ms => ctx.with_max_time(ms),
        })
    }
}
