//! Single upstream call with endpoint rotation, retry and backoff

use crate::cache::{CacheKey, RenderCache};
use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::gate::ConcurrencyGate;
use crate::request::{OutputFormat, RenderRequest};
use crate::upstream::{UpstreamCall, UpstreamTransport};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Backoff ceiling
pub const MAX_BACKOFF_MS: u64 = 8000;
/// Backoff base before the per-instance stagger
pub const BACKOFF_BASE_MS: u64 = 350;
/// Extra base delay per instance id
pub const BACKOFF_STAGGER_MS: u64 = 75;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Logical worker identity
///
/// Only varies request headers and backoff stagger. Real parallelism is
/// bounded by the [`ConcurrencyGate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSlot {
    /// 1-based
    pub id: usize,
    pub request_id: String,
}

impl InstanceSlot {
    pub fn new(id: usize) -> Self {
        Self::with_request_id(id, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_request_id(id: usize, request_id: impl Into<String>) -> Self {
        Self {
            id: id.max(1),
            request_id: request_id.into(),
        }
    }

    /// Instances `1..=size` sharing one request id
    pub fn pool(size: usize, request_id: &str) -> Vec<Self> {
        (1..=size.max(1))
            .map(|id| Self::with_request_id(id, request_id))
            .collect()
    }

    fn priority(&self) -> &'static str {
        if self.id == 1 { "high" } else { "normal" }
    }
}

/// `min(8000, floor((350 + id*75) * 2^attempt) + jitter)`
pub fn backoff_delay_ms(attempt: u32, instance_id: usize, jitter_ms: u64) -> u64 {
    let base = BACKOFF_BASE_MS + instance_id as u64 * BACKOFF_STAGGER_MS;
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base.saturating_mul(factor)
        .saturating_add(jitter_ms)
        .min(MAX_BACKOFF_MS)
}

/// Uniform in `[0, ceiling_ms)`
fn jitter(ceiling_ms: u64) -> u64 {
    if ceiling_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..ceiling_ms)
    }
}

/// Endpoint for an attempt: `(instance - 1 + attempt) mod len`
pub fn endpoint_for(base_urls: &[String], instance_id: usize, attempt: u32) -> &str {
    if base_urls.is_empty() {
        return crate::config::DEFAULT_BASE_URL;
    }
    let index = (instance_id.saturating_sub(1) + attempt as usize) % base_urls.len();
    &base_urls[index]
}

/// Executes single renders against the upstream service
#[derive(Debug, Clone)]
pub struct Dispatcher {
    transport: Arc<dyn UpstreamTransport>,
    gate: ConcurrencyGate,
    cache: RenderCache,
    base_urls: Vec<String>,
    max_attempts: u32,
    timeout: Duration,
    jitter_ms: u64,
}

impl Dispatcher {
    pub fn new(
        config: &RenderConfig,
        transport: Arc<dyn UpstreamTransport>,
        gate: ConcurrencyGate,
        cache: RenderCache,
    ) -> Self {
        Self {
            transport,
            gate,
            cache,
            base_urls: config.base_urls.clone(),
            max_attempts: config.max_attempts.max(1),
            timeout: config.request_timeout(),
            jitter_ms: config.backoff_jitter_ms,
        }
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Render `request` once, through the cache
    ///
    /// 429/5xx, timeouts and transient network failures are retried up to the
    /// attempt budget. Any other non-2xx status fails immediately.
    #[instrument(skip(self, request, instance), fields(instance = instance.id, format = %format, label_index = ?label_index))]
    pub async fn dispatch(
        &self,
        request: &RenderRequest,
        format: OutputFormat,
        label_index: Option<usize>,
        instance: &InstanceSlot,
    ) -> RenderResult<Vec<u8>> {
        let key = CacheKey::new(request, format, label_index);
        if let Some(bytes) = self.cache.get(&key) {
            debug!("Cache hit");
            return Ok(bytes);
        }

        let path = request.upstream_path(label_index);
        let mut last_status = None;
        let mut rate_limited = false;

        for attempt in 0..self.max_attempts {
            let base = endpoint_for(&self.base_urls, instance.id, attempt);
            let call = UpstreamCall {
                url: format!("{base}{path}"),
                headers: self.headers(format, instance, attempt),
                body: request.zpl().to_string(),
                timeout: self.timeout,
            };

            let outcome = {
                let _permit = self.gate.acquire().await?;
                tokio::time::timeout(self.timeout, self.transport.post(call)).await
            };

            let retry_after_ms = match outcome {
                Ok(Ok(response)) if response.is_success() => {
                    debug!(attempt, base, bytes = response.body.len(), "Rendered");
                    self.cache.put(key, response.body.clone());
                    return Ok(response.body);
                }
                Ok(Ok(response)) if RenderError::is_retryable_status(response.status) => {
                    last_status = Some(response.status);
                    rate_limited |= response.status == 429;
                    warn!(attempt, base, status = response.status, "Upstream busy");
                    response.retry_after_ms()
                }
                Ok(Ok(response)) => {
                    warn!(attempt, base, status = response.status, "Upstream rejected request");
                    return Err(RenderError::Upstream {
                        status: response.status,
                        body: response.body_excerpt(),
                    });
                }
                Ok(Err(e)) if e.is_transient() => {
                    warn!(attempt, base, error = %e, "Transient transport failure");
                    None
                }
                Ok(Err(e)) => return Err(RenderError::Transport(e.to_string())),
                Err(_) => {
                    warn!(attempt, base, timeout_ms = self.timeout.as_millis() as u64, "Upstream call timed out");
                    None
                }
            };

            if attempt + 1 < self.max_attempts {
                let delay_ms = backoff_delay_ms(attempt, instance.id, jitter(self.jitter_ms))
                    .max(retry_after_ms.unwrap_or(0));
                debug!(attempt, delay_ms, "Backing off");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        Err(RenderError::ExhaustedRetries {
            attempts: self.max_attempts,
            last_status,
            rate_limited,
        })
    }

    fn headers(
        &self,
        format: OutputFormat,
        instance: &InstanceSlot,
        attempt: u32,
    ) -> Vec<(&'static str, String)> {
        let agent = USER_AGENTS[(instance.id + attempt as usize) % USER_AGENTS.len()];
        vec![
            ("Accept", format.accept().to_string()),
            ("Content-Type", FORM_CONTENT_TYPE.to_string()),
            ("User-Agent", agent.to_string()),
            ("X-API-Instance", format!("zpl-render-instance-{}", instance.id)),
            ("X-Request-Priority", instance.priority().to_string()),
            ("X-Request-Id", instance.request_id.clone()),
        ]
    }
}
