//! Batch orchestration
//!
//! Deduplicates label units by content hash, fans the unique ones out over a
//! small pool of logical instances in strictly sequential batches, and keeps
//! the mapping needed to restore original order and count.

use crate::config::RenderConfig;
use crate::dispatcher::{Dispatcher, InstanceSlot};
use crate::error::{RenderError, RenderResult};
use crate::request::{OutputFormat, RenderRequest};
use crate::segmenter::LabelUnit;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Labels per logical instance when sizing the pool
const LABELS_PER_INSTANCE: usize = 12;

/// Unique units plus the original→unique ordinal map
#[derive(Debug, Clone)]
pub struct DedupIndex {
    unique: Vec<LabelUnit>,
    /// `ordinals[i]` is the unique index of original unit `i`
    ordinals: Vec<usize>,
}

impl DedupIndex {
    pub fn build(units: &[LabelUnit]) -> Self {
        let mut seen: HashMap<String, usize> = HashMap::with_capacity(units.len());
        let mut unique = Vec::new();
        let mut ordinals = Vec::with_capacity(units.len());

        for unit in units {
            let next = unique.len();
            let index = *seen.entry(unit.content_hash()).or_insert(next);
            if index == next {
                unique.push(unit.clone());
            }
            ordinals.push(index);
        }

        Self { unique, ordinals }
    }

    pub fn unique(&self) -> &[LabelUnit] {
        &self.unique
    }

    pub fn unique_count(&self) -> usize {
        self.unique.len()
    }

    /// Number of original units
    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }

    pub fn ordinals(&self) -> &[usize] {
        &self.ordinals
    }

    /// Re-expand per-unique values into original order
    pub fn expand<'a, T>(&self, unique: &'a [T]) -> RenderResult<Vec<&'a T>> {
        self.ordinals
            .iter()
            .map(|&u| {
                unique.get(u).ok_or_else(|| {
                    RenderError::assembly(
                        self.len(),
                        format!("missing artifact for unique unit {u}"),
                    )
                })
            })
            .collect()
    }
}

/// Scheduling knobs, threaded explicitly through every render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub pool_cap: usize,
    /// Multiplied by the instance id before the one extra 429 retry
    pub rate_limit_penalty: Duration,
}

impl BatchPlan {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            inter_batch_delay: Duration::from_millis(config.batch_delay_ms),
            pool_cap: config.pool_cap.max(1),
            rate_limit_penalty: Duration::from_millis(config.rate_limit_penalty_ms),
        }
    }

    /// One unit per batch with the longer fallback delay
    pub fn conservative(config: &RenderConfig) -> Self {
        Self {
            batch_size: 1,
            inter_batch_delay: Duration::from_millis(config.fallback_batch_delay_ms),
            ..Self::from_config(config)
        }
    }
}

/// `min(cap, max(1, ceil(labels / 12)))`
pub fn pool_size(labels: usize, cap: usize) -> usize {
    labels.div_ceil(LABELS_PER_INSTANCE).max(1).min(cap.max(1))
}

/// Rendered unique units with the index to expand them
#[derive(Debug, Clone)]
pub struct RenderedUnits {
    pub index: DedupIndex,
    /// One artifact per unique unit, in unique order
    pub artifacts: Vec<Vec<u8>>,
}

impl RenderedUnits {
    /// Artifacts in original label order, duplicates repeated
    pub fn expanded(&self) -> RenderResult<Vec<&Vec<u8>>> {
        self.index.expand(&self.artifacts)
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    dispatcher: Dispatcher,
}

impl Orchestrator {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Render every unique unit once
    ///
    /// Batches run in strict sequence. Within a batch all units are in flight
    /// together, still subject to the global gate. The first unit failure
    /// aborts the whole render.
    #[instrument(skip_all, fields(labels = units.len(), format = %format))]
    pub async fn render_units(
        &self,
        request: &RenderRequest,
        units: &[LabelUnit],
        format: OutputFormat,
        plan: &BatchPlan,
    ) -> RenderResult<RenderedUnits> {
        let index = DedupIndex::build(units);
        let request_id = uuid::Uuid::new_v4().to_string();
        let pool = InstanceSlot::pool(pool_size(units.len(), plan.pool_cap), &request_id);
        let batch_size = plan.batch_size.max(1);

        info!(
            unique = index.unique_count(),
            pool = pool.len(),
            batch_size,
            request_id = %request_id,
            "Rendering label units"
        );

        let mut artifacts = Vec::with_capacity(index.unique_count());
        for (batch, chunk) in index.unique().chunks(batch_size).enumerate() {
            if batch > 0 && !plan.inter_batch_delay.is_zero() {
                tokio::time::sleep(plan.inter_batch_delay).await;
            }

            let offset = batch * batch_size;
            let jobs = chunk.iter().enumerate().map(|(i, unit)| {
                let instance = &pool[(offset + i) % pool.len()];
                self.render_unit(request, unit, format, instance, plan)
            });
            let rendered = try_join_all(jobs).await?;

            debug!(batch, units = rendered.len(), "Batch complete");
            artifacts.extend(rendered);
        }

        Ok(RenderedUnits { index, artifacts })
    }

    /// One unit, with a single penalised retry on rate limiting
    async fn render_unit(
        &self,
        request: &RenderRequest,
        unit: &LabelUnit,
        format: OutputFormat,
        instance: &InstanceSlot,
        plan: &BatchPlan,
    ) -> RenderResult<Vec<u8>> {
        let unit_request = request.with_markup(unit.zpl.as_str());
        match self
            .dispatcher
            .dispatch(&unit_request, format, None, instance)
            .await
        {
            Err(e) if e.is_rate_limited() => {
                let penalty = plan.rate_limit_penalty * instance.id as u32;
                warn!(
                    instance = instance.id,
                    ordinal = unit.ordinal,
                    delay_ms = penalty.as_millis() as u64,
                    "Rate limited, retrying unit once"
                );
                tokio::time::sleep(penalty).await;
                self.dispatcher
                    .dispatch(&unit_request, format, None, instance)
                    .await
            }
            other => other,
        }
    }
}
