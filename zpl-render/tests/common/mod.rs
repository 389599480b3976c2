// zpl-render/tests/common/mod.rs
// 集成测试共用工具: 假上游、测试 PDF/PNG

#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, StringFormat, dictionary};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use zpl_render::{
    Orientation, RenderConfig, RenderEngine, RenderRequest, TransportError, Unit, UpstreamCall,
    UpstreamResponse, UpstreamTransport,
};

type Script = dyn Fn(&UpstreamCall, usize) -> UpstreamResponse + Send + Sync;

/// Fake upstream answering with a PDF or PNG derived from the request body
pub struct FakeUpstream {
    script: Box<Script>,
    delay: Duration,
    calls: Mutex<Vec<(UpstreamCall, Instant)>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl std::fmt::Debug for FakeUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeUpstream").finish_non_exhaustive()
    }
}

impl FakeUpstream {
    pub fn rendering() -> Self {
        Self::scripted(|call, _| UpstreamResponse::ok(render(call)))
    }

    pub fn scripted<F>(script: F) -> Self
    where
        F: Fn(&UpstreamCall, usize) -> UpstreamResponse + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<UpstreamCall> {
        self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    /// Start times of the calls sent with `Accept: {accept}`
    pub fn started_with(&self, accept: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c.header("Accept") == Some(accept))
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.body).collect()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamTransport for FakeUpstream {
    async fn post(&self, call: UpstreamCall) -> Result<UpstreamResponse, TransportError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((call.clone(), Instant::now()));
            calls.len() - 1
        };
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok((self.script)(&call, n))
    }
}

/// PDF for `Accept: application/pdf`, PNG otherwise
pub fn render(call: &UpstreamCall) -> Vec<u8> {
    match call.header("Accept") {
        Some("application/pdf") => pdf_with_text(&call.body),
        _ => png(32, 48, call.body.len() as u8),
    }
}

pub fn engine(config: RenderConfig, upstream: Arc<FakeUpstream>) -> RenderEngine {
    RenderEngine::with_transport(config, upstream)
}

/// Fast defaults for tests: no jitter, no inter-batch delay
pub fn test_config() -> RenderConfig {
    RenderConfig::new(vec!["http://upstream.test".to_string()])
        .with_backoff_jitter_ms(0)
        .with_batch_delay_ms(0)
        .with_fallback_batch_delay_ms(0)
        .with_rate_limit_penalty_ms(0)
}

pub fn request(zpl: &str) -> RenderRequest {
    RenderRequest::new(zpl, 203, 4.0, 6.0, Unit::Inches, Orientation::Upright).unwrap()
}

pub fn label(text: &str) -> String {
    format!("^XA^FO50,50^ADN,36,20^FD{text}^FS^XZ")
}

/// One-page PDF whose content stream shows `text`
pub fn pdf_with_text(text: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![20.into(), 400.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(text.as_bytes().to_vec(), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
    });
    // MediaBox inherited from the page tree, as some producers do
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 288.into(), 432.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

pub fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = image::GrayImage::from_pixel(width, height, image::Luma([shade]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Decoded content stream of every page, in page order
pub fn page_contents(pdf: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .into_values()
        .map(|id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
        .collect()
}

pub fn page_count(pdf: &[u8]) -> usize {
    Document::load_mem(pdf).unwrap().get_pages().len()
}
