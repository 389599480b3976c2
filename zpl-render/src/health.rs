//! Operator health probe
//!
//! One minimal render per configured endpoint. Bypasses the cache, the gate
//! and the retry loop; only the per-call timeout applies.

use crate::upstream::{UpstreamCall, UpstreamTransport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

pub const HEALTH_TEST_ZPL: &str = "^XA^FO50,50^ADN,36,20^FDTEST^FS^XZ";
pub const HEALTH_PATH: &str = "/v1/printers/8dpmm/labels/4x6/0";
pub const HEALTH_USER_AGENT: &str = "zpl-render-healthz";

/// Probe result for one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub base: String,
    pub status: Option<u16>,
    pub ok: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// At least one endpoint answered 2xx
    pub ok: bool,
    pub checked_at: DateTime<Utc>,
    pub results: Vec<EndpointHealth>,
}

/// Probe every endpoint concurrently
#[instrument(skip(transport, base_urls), fields(endpoints = base_urls.len()))]
pub async fn probe(
    transport: &dyn UpstreamTransport,
    base_urls: &[String],
    timeout: Duration,
) -> HealthReport {
    let checked_at = Utc::now();
    let checks = base_urls
        .iter()
        .map(|base| probe_endpoint(transport, base, timeout));
    let results = futures::future::join_all(checks).await;
    let ok = results.iter().any(|r| r.ok);

    info!(ok, "Health probe finished");
    HealthReport {
        ok,
        checked_at,
        results,
    }
}

async fn probe_endpoint(transport: &dyn UpstreamTransport, base: &str, timeout: Duration) -> EndpointHealth {
    let call = UpstreamCall {
        url: format!("{base}{HEALTH_PATH}"),
        headers: vec![
            ("Accept", "image/png".to_string()),
            ("Content-Type", "application/x-www-form-urlencoded".to_string()),
            ("User-Agent", HEALTH_USER_AGENT.to_string()),
        ],
        body: HEALTH_TEST_ZPL.to_string(),
        timeout,
    };

    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, transport.post(call)).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let (status, ok, error) = match outcome {
        Ok(Ok(response)) if response.is_success() => (Some(response.status), true, None),
        Ok(Ok(response)) => (
            Some(response.status),
            false,
            Some(response.body_excerpt()),
        ),
        Ok(Err(e)) => (None, false, Some(e.to_string())),
        Err(_) => (
            None,
            false,
            Some(format!("Timeout after {} ms", timeout.as_millis())),
        ),
    };

    if !ok {
        warn!(base, ?status, error = ?error, "Endpoint unhealthy");
    }

    EndpointHealth {
        base: base.to_string(),
        status,
        ok,
        error,
        elapsed_ms,
    }
}
