//! Error types for the render engine

use thiserror::Error;

/// Render error types
///
/// | Variant | Retried | Surfaced |
/// |---------|---------|----------|
/// | `Validation` | never | immediately |
/// | `Upstream` | never | immediately, with status and body excerpt |
/// | `ExhaustedRetries` | by the dispatcher, up to the attempt budget | once the budget is spent |
/// | `Transport` | never | immediately |
/// | `Assembly` | via the PNG fallback when rate limited | otherwise immediately |
#[derive(Debug, Error)]
pub enum RenderError {
    /// Malformed render request
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Non-retryable HTTP status from the upstream service
    #[error("Upstream error: {status} - {body}")]
    Upstream { status: u16, body: String },

    /// Every attempt hit 429/5xx, a timeout or a transient network failure
    #[error("Exhausted {attempts} attempts against the upstream service (last status: {})", status_label(.last_status))]
    ExhaustedRetries {
        attempts: u32,
        last_status: Option<u16>,
        /// At least one attempt was answered with HTTP 429
        rate_limited: bool,
    },

    /// Network failure that is not worth retrying (bad URL, TLS setup, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Merging or embedding rendered artifacts failed
    #[error("Assembly failed for {labels} labels: {message}")]
    Assembly { labels: usize, message: String },

    /// Terminal wrapper carrying the label count of the failed document
    #[error("Unable to process {count} labels: {source}")]
    Labels {
        count: usize,
        #[source]
        source: Box<RenderError>,
    },
}

impl RenderError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn assembly(labels: usize, message: impl std::fmt::Display) -> Self {
        Self::Assembly {
            labels,
            message: message.to_string(),
        }
    }

    /// Wrap with label-count context, unless already wrapped
    pub fn for_labels(self, count: usize) -> Self {
        match self {
            Self::Labels { .. } | Self::Validation(_) => self,
            other => Self::Labels {
                count,
                source: Box::new(other),
            },
        }
    }

    /// Whether the failure was caused by the upstream rate limiter
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::ExhaustedRetries { rate_limited, .. } => *rate_limited,
            Self::Upstream { status, .. } => *status == 429,
            Self::Labels { source, .. } => source.is_rate_limited(),
            _ => false,
        }
    }

    /// Whether the failure came from the retryable class (429/5xx, timeout, transient network)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExhaustedRetries { .. } => true,
            Self::Upstream { status, .. } => Self::is_retryable_status(*status),
            Self::Labels { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether the status belongs to the retryable class (429 or 5xx)
    pub fn is_retryable_status(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Failure reported by an [`UpstreamTransport`](crate::upstream::UpstreamTransport)
#[derive(Debug, Error)]
pub enum TransportError {
    /// The call did not complete within the per-call timeout
    #[error("Timeout after {0} ms")]
    Timeout(u64),

    /// Connection reset, DNS failure or another transient network failure
    #[error("Network error: {0}")]
    Network(String),

    /// Anything else (request construction, TLS configuration, ...)
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(0)
        } else if e.is_connect() || e.is_request() || e.is_body() {
            Self::Network(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_looks_through_wrapper() {
        let inner = RenderError::ExhaustedRetries {
            attempts: 6,
            last_status: Some(429),
            rate_limited: true,
        };
        let wrapped = inner.for_labels(12);
        assert!(wrapped.is_rate_limited());
        assert!(wrapped.to_string().contains("12 labels"));

        let fatal = RenderError::Upstream {
            status: 400,
            body: "bad zpl".to_string(),
        };
        assert!(!fatal.for_labels(3).is_rate_limited());
    }

    #[test]
    fn test_validation_is_not_wrapped() {
        let err = RenderError::validation("empty").for_labels(4);
        assert!(matches!(err, RenderError::Validation(_)));
    }

    #[test]
    fn test_retryable_class() {
        let exhausted = RenderError::ExhaustedRetries {
            attempts: 2,
            last_status: None,
            rate_limited: false,
        };
        assert!(exhausted.for_labels(5).is_retryable());
        assert!(
            RenderError::Upstream {
                status: 503,
                body: String::new(),
            }
            .is_retryable()
        );
        assert!(
            !RenderError::Upstream {
                status: 404,
                body: String::new(),
            }
            .is_retryable()
        );
        assert!(!RenderError::validation("empty").is_retryable());
        assert!(!RenderError::Transport("bad url".to_string()).is_retryable());
    }

    #[test]
    fn test_retryable_status() {
        assert!(RenderError::is_retryable_status(429));
        assert!(RenderError::is_retryable_status(500));
        assert!(RenderError::is_retryable_status(503));
        assert!(!RenderError::is_retryable_status(404));
        assert!(!RenderError::is_retryable_status(400));
    }
}
