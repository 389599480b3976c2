//! In-process fake upstream for unit tests

use super::{UpstreamCall, UpstreamResponse, UpstreamTransport};
use crate::error::TransportError;
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, StringFormat, dictionary};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

type Responder =
    Box<dyn Fn(&UpstreamCall, usize) -> Result<UpstreamResponse, TransportError> + Send + Sync>;

pub(crate) struct MockTransport {
    responder: Responder,
    delay: Duration,
    calls: Mutex<Vec<UpstreamCall>>,
    /// Start time of each call, same order as `calls`
    started: Mutex<Vec<Instant>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("calls", &self.call_count())
            .finish()
    }
}

impl MockTransport {
    /// `responder(call, call_number)`; call numbers start at 0
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&UpstreamCall, usize) -> Result<UpstreamResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Answer every call with a PDF (or PNG) whose content is the request body
    pub(crate) fn echo() -> Self {
        Self::new(|call, _| Ok(UpstreamResponse::ok(echo_artifact(call))))
    }

    pub(crate) fn status(status: u16) -> Self {
        Self::new(move |_, _| Ok(UpstreamResponse::status(status, "mock failure")))
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub(crate) fn calls(&self) -> Vec<UpstreamCall> {
        self.calls.lock().clone()
    }

    /// Start times of the calls whose `Accept` header is `accept`
    pub(crate) fn started_with(&self, accept: &str) -> Vec<Instant> {
        let calls = self.calls.lock();
        let started = self.started.lock();
        calls
            .iter()
            .zip(started.iter())
            .filter(|(call, _)| call.header("Accept") == Some(accept))
            .map(|(_, at)| *at)
            .collect()
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamTransport for MockTransport {
    async fn post(&self, call: UpstreamCall) -> Result<UpstreamResponse, TransportError> {
        let number = {
            let mut calls = self.calls.lock();
            calls.push(call.clone());
            self.started.lock().push(Instant::now());
            calls.len() - 1
        };
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.current.fetch_sub(1, Ordering::SeqCst);
        (self.responder)(&call, number)
    }
}

/// PDF or PNG depending on the call's `Accept` header
pub(crate) fn echo_artifact(call: &UpstreamCall) -> Vec<u8> {
    match call.header("Accept") {
        Some("image/png") => fake_png(40, 60, shade_of(&call.body)),
        _ => fake_pdf(&call.body),
    }
}

fn shade_of(text: &str) -> u8 {
    text.bytes().fold(0u8, |acc, b| acc.wrapping_add(b))
}

/// One-page PDF showing `text`
pub(crate) fn fake_pdf(text: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Object::Integer(10)]),
            Operation::new("Td", vec![Object::Integer(10), Object::Integer(200)]),
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
        "MediaBox" => vec![0.into(), 0.into(), 288.into(), 432.into()],
        "Contents" => content_id,
        "Resources" => resources_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
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

/// Solid grayscale PNG
pub(crate) fn fake_png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = image::GrayImage::from_pixel(width, height, image::Luma([shade]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
