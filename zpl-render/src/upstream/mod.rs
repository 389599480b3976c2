//! Upstream rendering service transport
//!
//! The dispatcher only talks to the service through [`UpstreamTransport`],
//! so tests and embedders can swap the HTTP client for a fake.

mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use self::http::HttpTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;

/// One POST to the upstream service
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    /// Raw label markup
    pub body: String,
    pub timeout: Duration,
}

impl UpstreamCall {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw upstream answer, any status
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    /// `Retry-After` header as sent
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Retry-After` in milliseconds (delta-seconds form only)
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after
            .as_deref()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000))
    }

    /// First 180 chars of the body, for logs and error messages
    pub fn body_excerpt(&self) -> String {
        String::from_utf8_lossy(&self.body).chars().take(180).collect()
    }
}

/// Transport to the upstream rendering service
#[async_trait]
pub trait UpstreamTransport: Send + Sync + std::fmt::Debug {
    async fn post(&self, call: UpstreamCall) -> Result<UpstreamResponse, TransportError>;
}
