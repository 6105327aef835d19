use std::time::Duration;

/// Errors that can occur when using libkeybase.
///
/// Errors are organized by category:
/// - Configuration and usage errors: detected at `build()` or call time
/// - Locator errors: the keybase binary or account could not be resolved
/// - Spawn and IO errors: failures starting or talking to a subprocess
/// - Protocol errors: malformed CLI output
/// - Transport errors: timeouts, crashes and pool exhaustion
/// - Semantic errors: well-formed replies that do not mean success
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // -------------------------------------------------------------------------
    // Configuration and usage errors
    // -------------------------------------------------------------------------
    /// Invalid configuration provided to builder.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A call was made with arguments it cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Locator errors
    // -------------------------------------------------------------------------
    /// Keybase binary not found on any known path.
    #[error("keybase CLI not found (searched: {searched})")]
    BinaryNotFound { searched: String },

    /// The current keybase account could not be determined.
    #[error("keybase user could not be determined: {reason}")]
    UserNotFound { reason: String },

    // -------------------------------------------------------------------------
    // Spawn and IO errors
    // -------------------------------------------------------------------------
    /// Failed to spawn the keybase subprocess.
    #[error("failed to spawn keybase process: {0}")]
    ProcessSpawn(#[source] std::io::Error),

    /// IO error communicating with a keybase subprocess.
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol errors
    // -------------------------------------------------------------------------
    /// Failed to parse JSON from CLI output.
    #[error("failed to parse JSON: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    // -------------------------------------------------------------------------
    // Transport errors
    // -------------------------------------------------------------------------
    /// Request exceeded the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The worker process exited before producing a reply.
    #[error("keybase process exited unexpectedly")]
    UnexpectedExit,

    /// Every pooled worker is currently leased.
    #[error("all {size} workers are busy")]
    PoolExhausted { size: usize },

    // -------------------------------------------------------------------------
    // Semantic errors
    // -------------------------------------------------------------------------
    /// The CLI answered with an explicit error payload.
    #[error("CLI error: {message}")]
    CliError { message: String },

    /// The CLI answered with a result other than the one expected.
    #[error("unexpected result {actual:?} (expected {expected:?})")]
    UnexpectedResult {
        expected: &'static str,
        actual: String,
    },
}

/// A specialized Result type for libkeybase operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a JSON parse error with context.
    pub fn json_parse(source: serde_json::Error, raw: &str) -> Self {
        Self::JsonParse {
            message: format!(
                "at position {}: {}",
                source.column(),
                raw.chars().take(100).collect::<String>()
            ),
            source,
        }
    }

    /// Create an IO error.
    pub fn io(source: std::io::Error) -> Self {
        Self::Io(source)
    }

    /// Check if this error comes from resolving the binary or account.
    pub fn is_locator_error(&self) -> bool {
        matches!(self, Error::BinaryNotFound { .. } | Error::UserNotFound { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Io(_) | Error::UnexpectedExit | Error::PoolExhausted { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonParse {
            message: err.to_string(),
            source: err,
        }
    }
}
