//! `reqwest`-backed transport

use super::{UpstreamCall, UpstreamResponse, UpstreamTransport};
use crate::error::{RenderError, RenderResult, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, instrument};

/// HTTP transport to the upstream rendering service
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> RenderResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| RenderError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    #[instrument(skip(self, call), fields(url = %call.url, body_len = call.body.len()))]
    async fn post(&self, call: UpstreamCall) -> Result<UpstreamResponse, TransportError> {
        let timeout_ms = call.timeout.as_millis() as u64;
        let mut request = self.client.post(&call.url).timeout(call.timeout);
        for (name, value) in &call.headers {
            request = request.header(*name, value);
        }

        let response = request
            .body(call.body)
            .send()
            .await
            .map_err(|e| classify(e, timeout_ms))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, timeout_ms))?
            .to_vec();

        debug!(status, bytes = body.len(), "Upstream responded");

        Ok(UpstreamResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn classify(e: reqwest::Error, timeout_ms: u64) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(timeout_ms)
    } else {
        TransportError::from(e)
    }
}
