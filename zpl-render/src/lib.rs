//! # zpl-render
//!
//! ZPL label rendering through a rate-limited remote rendering service.
//!
//! ## Scope
//!
//! This crate handles HOW a document gets rendered:
//! - Label segmentation and counting
//! - Content-addressed LRU cache of rendered bytes
//! - Global concurrency gate in front of the upstream
//! - Retry, backoff and endpoint rotation per call
//! - Dedup and batched fan-out across logical instances
//! - Reassembly into one PDF (page merge or PNG embed)
//!
//! Pixel rendering itself is the upstream service's job.
//!
//! ## Example
//!
//! ```ignore
//! use zpl_render::{RenderConfig, RenderEngine, RenderRequest, Unit, Orientation};
//!
//! let engine = RenderEngine::new(RenderConfig::from_env())?;
//! let request = RenderRequest::new(zpl, 203, 4.0, 6.0, Unit::Inches, Orientation::Upright)?;
//!
//! let pdf = engine.render_document(&request).await?;
//! let png = engine.render_preview(&request, 0).await?;
//! ```

pub mod assembler;
pub mod cache;
pub mod config;
pub mod dispatcher;
mod engine;
mod error;
pub mod gate;
pub mod health;
pub mod orchestrator;
mod request;
pub mod segmenter;
pub mod upstream;

// Re-exports
pub use assembler::{Assembler, Strategy, choose_strategy};
pub use cache::{CacheKey, CacheStats, RenderCache};
pub use config::{AssemblyMode, DEFAULT_BASE_URL, RenderConfig};
pub use dispatcher::{Dispatcher, InstanceSlot};
pub use engine::RenderEngine;
pub use error::{RenderError, RenderResult, TransportError};
pub use gate::{ConcurrencyGate, GatePermit};
pub use health::{EndpointHealth, HealthReport};
pub use orchestrator::{BatchPlan, DedupIndex, Orchestrator, RenderedUnits};
pub use request::{
    Orientation, OutputFormat, RenderForm, RenderRequest, Unit, dpi_to_dpmm, to_data_url,
};
pub use segmenter::{CountRule, LabelAnalysis, LabelUnit, Segmentation, analyze, count_labels, segment};
pub use upstream::{HttpTransport, UpstreamCall, UpstreamResponse, UpstreamTransport};
