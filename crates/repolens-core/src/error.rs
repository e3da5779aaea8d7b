use std::fmt;

use serde::Serialize;

/// Errors that can occur across the repolens platform.
///
/// Library crates use this type directly; the binary crate converts to
/// `miette` diagnostics at the boundary and the MCP facade converts to a
/// structured tool failure via [`RepolensError::kind`].
///
/// # Examples
///
/// ```
/// use repolens_core::{ErrorKind, RepolensError};
///
/// let err = RepolensError::Conflict("octocat/demo".into());
/// assert_eq!(err.kind(), ErrorKind::Conflict);
/// assert!(err.to_string().contains("already in progress"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RepolensError {
    /// An unknown repository key, review id, or file.
    #[error("not found: {0}")]
    NotFound(String),

    /// A review is already pending for the repository.
    #[error("review already in progress for {0}")]
    #[diagnostic(
        code(repolens::conflict),
        help("wait for the running review to finish, then retry")
    )]
    Conflict(String),

    /// An invalid review status transition was attempted.
    #[error("invalid review state: {0}")]
    State(String),

    /// The repository could not be fetched (missing, private, or refused).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The upstream host refused the request because of rate limiting.
    #[error("rate limit exceeded: {0}")]
    #[diagnostic(
        code(repolens::rate_limit),
        help("set GITHUB_TOKEN or GH_TOKEN to raise the GitHub API rate limit")
    )]
    RateLimit(String),

    /// A transient network failure talking to the upstream host.
    #[error("network error: {0}")]
    Transport(String),

    /// The analysis backend could not produce a response.
    #[error("analysis backend unavailable: {0}")]
    #[diagnostic(
        code(repolens::backend),
        help("check the [llm] section of .repolens.toml and the provider API key")
    )]
    BackendUnavailable(String),

    /// Malformed caller-supplied arguments.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(repolens::config), help("run 'repolens init' to create a default .repolens.toml"))]
    Config(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RepolensError {
    /// Caller-facing classification of this error.
    ///
    /// Rate limits and transient network failures are both reported as
    /// [`ErrorKind::Fetch`]: from the caller's point of view the repository
    /// could not be fetched.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepolensError::NotFound(_) => ErrorKind::NotFound,
            RepolensError::Conflict(_) => ErrorKind::Conflict,
            RepolensError::State(_) => ErrorKind::State,
            RepolensError::Fetch(_) | RepolensError::RateLimit(_) | RepolensError::Transport(_) => {
                ErrorKind::Fetch
            }
            RepolensError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            RepolensError::Validation(_) => ErrorKind::Validation,
            RepolensError::Config(_)
            | RepolensError::Io(_)
            | RepolensError::Serialization(_)
            | RepolensError::Toml(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` for failures worth retrying (transient network errors only).
    ///
    /// # Examples
    ///
    /// ```
    /// use repolens_core::RepolensError;
    ///
    /// assert!(RepolensError::Transport("connection reset".into()).is_transient());
    /// assert!(!RepolensError::RateLimit("resets in 60s".into()).is_transient());
    /// ```
    pub fn is_transient(&self) -> bool {
        matches!(self, RepolensError::Transport(_))
    }
}

/// Stable, caller-facing error classification.
///
/// # Examples
///
/// ```
/// use repolens_core::ErrorKind;
///
/// assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    State,
    Fetch,
    BackendUnavailable,
    Validation,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::State => "state",
            ErrorKind::Fetch => "fetch",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}
