//! Document assembly
//!
//! Turns the per-unit artifacts of a multi-label document into one PDF:
//! - PDF-merge: render each unique unit as a PDF and copy its pages
//! - PNG-embed: render each unique unit as a PNG and place it on a page
//!
//! A rate-limited PDF-merge is retried once as PNG-embed with a
//! conservative batch plan.

mod pdf_merge;
mod png_embed;

pub use pdf_merge::merge_pdfs;
pub use png_embed::{embed_pngs, fit_centered};

use crate::config::{AssemblyMode, RenderConfig};
use crate::error::RenderResult;
use crate::orchestrator::{BatchPlan, Orchestrator};
use crate::request::{OutputFormat, RenderRequest};
use crate::segmenter::LabelUnit;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PdfMerge,
    PngEmbed,
}

impl Strategy {
    /// Upstream format each unit is rendered in
    pub fn format(&self) -> OutputFormat {
        match self {
            Strategy::PdfMerge => OutputFormat::Pdf,
            Strategy::PngEmbed => OutputFormat::Png,
        }
    }
}

/// PDF-merge up to `threshold` labels unless overridden
pub fn choose_strategy(mode: AssemblyMode, labels: usize, threshold: usize) -> Strategy {
    match mode {
        AssemblyMode::PdfMerge => Strategy::PdfMerge,
        AssemblyMode::PngEmbed => Strategy::PngEmbed,
        AssemblyMode::Auto if labels > threshold => Strategy::PngEmbed,
        AssemblyMode::Auto => Strategy::PdfMerge,
    }
}

#[derive(Debug, Clone)]
pub struct Assembler {
    orchestrator: Orchestrator,
    config: RenderConfig,
}

impl Assembler {
    pub fn new(orchestrator: Orchestrator, config: RenderConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Render and assemble a multi-label document
    ///
    /// Failures are wrapped with the document's label count.
    #[instrument(skip_all, fields(labels = units.len()))]
    pub async fn assemble(&self, request: &RenderRequest, units: &[LabelUnit]) -> RenderResult<Vec<u8>> {
        let labels = units.len();
        let strategy = choose_strategy(self.config.assembly, labels, self.config.png_threshold);
        let plan = BatchPlan::from_config(&self.config);
        info!(?strategy, "Assembling document");

        let result = match self.run(strategy, request, units, &plan).await {
            Err(e) if strategy == Strategy::PdfMerge && e.is_rate_limited() => {
                warn!(error = %e, "PDF merge rate limited, falling back to PNG embed");
                let conservative = BatchPlan::conservative(&self.config);
                self.run(Strategy::PngEmbed, request, units, &conservative).await
            }
            other => other,
        };

        result.map_err(|e| e.for_labels(labels))
    }

    async fn run(
        &self,
        strategy: Strategy,
        request: &RenderRequest,
        units: &[LabelUnit],
        plan: &BatchPlan,
    ) -> RenderResult<Vec<u8>> {
        let rendered = self
            .orchestrator
            .render_units(request, units, strategy.format(), plan)
            .await?;

        match strategy {
            Strategy::PdfMerge => merge_pdfs(&rendered, self.config.merge_batch_size_for(units.len())),
            Strategy::PngEmbed => embed_pngs(&rendered, request.page_size_pt()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RenderCache;
    use crate::dispatcher::Dispatcher;
    use crate::error::RenderError;
    use crate::gate::ConcurrencyGate;
    use crate::request::{Orientation, Unit};
    use crate::upstream::mock::{MockTransport, echo_artifact};
    use crate::upstream::UpstreamResponse;
    use lopdf::Document;
    use std::sync::Arc;
    use std::time::Duration;

    fn assembler(config: RenderConfig, mock: Arc<MockTransport>) -> Assembler {
        let dispatcher = Dispatcher::new(
            &config,
            mock,
            ConcurrencyGate::new(config.max_concurrency),
            RenderCache::new(config.cache_capacity),
        );
        Assembler::new(Orchestrator::new(dispatcher), config)
    }

    fn config() -> RenderConfig {
        RenderConfig::new(vec!["http://a.test".to_string()])
            .with_backoff_jitter_ms(0)
            .with_batch_delay_ms(0)
            .with_fallback_batch_delay_ms(0)
            .with_rate_limit_penalty_ms(0)
    }

    fn request() -> RenderRequest {
        RenderRequest::new("^XA^XZ", 203, 4.0, 6.0, Unit::Inches, Orientation::Upright).unwrap()
    }

    fn units(n: usize) -> Vec<LabelUnit> {
        (0..n)
            .map(|i| LabelUnit::new(i, format!("^XA^FD{i}^FS^XZ")))
            .collect()
    }

    fn page_count(pdf: &[u8]) -> usize {
        Document::load_mem(pdf).unwrap().get_pages().len()
    }

    #[test]
    fn test_choose_strategy() {
        assert_eq!(choose_strategy(AssemblyMode::Auto, 35, 35), Strategy::PdfMerge);
        assert_eq!(choose_strategy(AssemblyMode::Auto, 36, 35), Strategy::PngEmbed);
        assert_eq!(choose_strategy(AssemblyMode::PdfMerge, 500, 35), Strategy::PdfMerge);
        assert_eq!(choose_strategy(AssemblyMode::PngEmbed, 2, 35), Strategy::PngEmbed);
    }

    #[tokio::test]
    async fn test_pdf_merge_by_default() {
        let mock = Arc::new(MockTransport::echo());
        let a = assembler(config(), mock.clone());

        let pdf = a.assemble(&request(), &units(4)).await.unwrap();

        assert_eq!(page_count(&pdf), 4);
        assert!(mock.calls().iter().all(|c| c.header("Accept") == Some("application/pdf")));
    }

    #[tokio::test]
    async fn test_png_embed_above_threshold() {
        let mock = Arc::new(MockTransport::echo());
        let a = assembler(config().with_png_threshold(3), mock.clone());

        let pdf = a.assemble(&request(), &units(4)).await.unwrap();

        assert_eq!(page_count(&pdf), 4);
        assert!(mock.calls().iter().all(|c| c.header("Accept") == Some("image/png")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_merge_falls_back_to_png() {
        // PDF requests are always rate limited, PNG requests succeed
        let mock = Arc::new(MockTransport::new(|call, _| {
            if call.header("Accept") == Some("application/pdf") {
                Ok(UpstreamResponse::status(429, "rate limited"))
            } else {
                Ok(UpstreamResponse::ok(echo_artifact(call)))
            }
        }));
        let config = config()
            .with_max_attempts(2)
            .with_batch_size(2)
            .with_fallback_batch_delay_ms(600);
        let a = assembler(config, mock.clone());

        let pdf = a.assemble(&request(), &units(3)).await.unwrap();

        assert_eq!(page_count(&pdf), 3);
        // Conservative plan: one PNG per batch, 600 ms apart
        let started = mock.started_with("image/png");
        assert_eq!(started.len(), 3);
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(600), "{started:?}");
        }
    }

    #[tokio::test]
    async fn test_fatal_error_skips_fallback() {
        let mock = Arc::new(MockTransport::status(400));
        let a = assembler(config(), mock.clone());

        let err = a.assemble(&request(), &units(3)).await.unwrap_err();

        match err {
            RenderError::Labels { count, source } => {
                assert_eq!(count, 3);
                assert!(matches!(*source, RenderError::Upstream { status: 400, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(mock.calls().iter().all(|c| c.header("Accept") == Some("application/pdf")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_failure_is_terminal() {
        let mock = Arc::new(MockTransport::status(429));
        let a = assembler(config().with_max_attempts(1), mock.clone());

        let err = a.assemble(&request(), &units(2)).await.unwrap_err();

        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("2 labels"));
    }
}
