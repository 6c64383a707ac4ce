use thiserror::Error;

/// Structured error context for configuration and validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or settings key that caused the error (e.g., "limits[1].capacity")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "limit_settings", "http_transport")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Failures raised by a limiter while admitting a request.
///
/// These never originate from the wrapped API client; a caller can always tell
/// a throttling failure apart from a failed remote call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    /// The caller waited up to the configured `max_wait_time` without enough tokens.
    #[error("rate limit wait timed out after {waited_seconds:.3}s (requested {requested_tokens} tokens)")]
    Timeout {
        waited_seconds: f64,
        requested_tokens: f64,
    },

    /// The requested cost can never be satisfied by this bucket.
    #[error("requested {requested_tokens} tokens exceeds bucket capacity {capacity}")]
    InvalidCost {
        requested_tokens: f64,
        capacity: f64,
    },

    /// The wait was aborted through a cancellation token.
    #[error("rate limit wait cancelled (requested {requested_tokens} tokens)")]
    Cancelled { requested_tokens: f64 },
}

impl RateLimitError {
    /// Only timeouts are worth retrying; an invalid cost will fail again and a
    /// cancellation was requested by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RateLimitError::Timeout { .. })
    }

    pub fn requested_tokens(&self) -> f64 {
        match self {
            RateLimitError::Timeout {
                requested_tokens, ..
            }
            | RateLimitError::InvalidCost {
                requested_tokens, ..
            }
            | RateLimitError::Cancelled { requested_tokens } => *requested_tokens,
        }
    }
}

/// Unified error type for the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Network transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote error: HTTP {status}: {message}")]
    Remote {
        status: u16,
        message: String,
        retryable: bool,
    },
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The limiter failure behind this error, if the request never left the client.
    pub fn as_rate_limit(&self) -> Option<&RateLimitError> {
        match self {
            Error::RateLimit(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimit(e) => e.is_retryable(),
            Error::Remote { retryable, .. } => *retryable,
            Error::Transport(crate::transport::TransportError::Http(e)) => {
                e.is_timeout() || e.is_connect()
            }
            _ => false,
        }
    }
}
