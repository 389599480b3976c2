//! Caller-facing render engine
//!
//! Owns one gate and one cache shared by every render it runs. Engines are
//! independent of each other; nothing is process-global.

use crate::assembler::Assembler;
use crate::cache::{CacheStats, RenderCache};
use crate::config::RenderConfig;
use crate::dispatcher::{Dispatcher, InstanceSlot};
use crate::error::{RenderError, RenderResult};
use crate::gate::ConcurrencyGate;
use crate::health::{self, HealthReport};
use crate::orchestrator::Orchestrator;
use crate::request::{OutputFormat, RenderRequest};
use crate::segmenter::{self, LabelAnalysis, PREVIEW_CHUNK_SIZE};
use crate::upstream::{HttpTransport, UpstreamTransport};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct RenderEngine {
    config: RenderConfig,
    transport: Arc<dyn UpstreamTransport>,
    assembler: Assembler,
}

impl RenderEngine {
    /// Engine talking HTTP to the configured endpoints
    pub fn new(config: RenderConfig) -> RenderResult<Self> {
        let transport = HttpTransport::new()?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: RenderConfig, transport: Arc<dyn UpstreamTransport>) -> Self {
        let config = config.normalized();
        let dispatcher = Dispatcher::new(
            &config,
            transport.clone(),
            ConcurrencyGate::new(config.max_concurrency),
            RenderCache::new(config.cache_capacity),
        );
        let assembler = Assembler::new(Orchestrator::new(dispatcher), config.clone());

        info!(
            endpoints = config.base_urls.len(),
            max_concurrency = config.max_concurrency,
            cache_capacity = config.cache_capacity,
            "Render engine ready"
        );

        Self {
            config,
            transport,
            assembler,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    fn dispatcher(&self) -> &Dispatcher {
        self.assembler.orchestrator().dispatcher()
    }

    /// Render the whole document as one PDF, one page per label unit
    ///
    /// Single-label documents are sent as-is in one call.
    #[instrument(skip_all, fields(dpi = request.dpi(), zpl_len = request.zpl().len()))]
    pub async fn render_document(&self, request: &RenderRequest) -> RenderResult<Vec<u8>> {
        let segmentation = segmenter::segment(request.zpl());
        info!(
            units = segmentation.units.len(),
            count = segmentation.count,
            rule = ?segmentation.rule,
            "Segmented document"
        );

        if segmentation.units.len() <= 1 {
            return self
                .dispatcher()
                .dispatch(request, OutputFormat::Pdf, None, &InstanceSlot::new(1))
                .await;
        }

        self.assembler.assemble(request, &segmentation.units).await
    }

    /// Render one label (0-based) as PNG
    ///
    /// Documents above 16 labels only send the 16-label chunk holding the index.
    #[instrument(skip_all, fields(label_index = label_index))]
    pub async fn render_preview(
        &self,
        request: &RenderRequest,
        label_index: usize,
    ) -> RenderResult<Vec<u8>> {
        let count = segmenter::count_labels(request.zpl());
        if label_index >= count {
            return Err(RenderError::validation(format!(
                "Label index {label_index} out of range, document has {count} labels"
            )));
        }

        let chunks = segmenter::preview_chunks(request.zpl(), PREVIEW_CHUNK_SIZE);
        let (preview, index) = if chunks.len() > 1 {
            let markup = chunks
                .into_iter()
                .nth(label_index / PREVIEW_CHUNK_SIZE)
                .ok_or_else(|| {
                    RenderError::validation(format!("Label index {label_index} out of range"))
                })?;
            (request.with_markup(markup), label_index % PREVIEW_CHUNK_SIZE)
        } else {
            (request.clone(), label_index)
        };

        self.dispatcher()
            .dispatch(&preview, OutputFormat::Png, Some(index), &InstanceSlot::new(1))
            .await
    }

    /// Probe every configured endpoint once
    pub async fn health(&self) -> HealthReport {
        health::probe(
            self.transport.as_ref(),
            &self.config.base_urls,
            self.config.request_timeout(),
        )
        .await
    }

    pub fn analyze(&self, zpl: &str) -> LabelAnalysis {
        segmenter::analyze(zpl)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.dispatcher().cache().stats()
    }
}
