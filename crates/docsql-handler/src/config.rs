use serde::Deserialize;

/// Handler settings, built once by the embedding process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HandlerConfig {
    /// Unmapped backend error codes panic instead of degrading to
    /// InternalError, and missing backend functions are logged loudly.
    pub dev_build: bool,
    /// Deadline for commands that do not carry `maxTimeMS`.
    pub default_max_time_ms: Option<u64>,
    /// Collections carry a `$tjsonSchema` validator derived from the first
    /// inserted document.
    pub schema_backend: bool,
}
