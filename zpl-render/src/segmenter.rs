//! Label segmentation
//!
//! Splits a ZPL document into independently renderable label units.
//!
//! Counting rules, first positive result wins:
//! 1. `~DGR:` graphic-download blocks
//! 2. `^XA` starts not immediately followed by `^QA` or `^MMT`
//! 3. the `^PQ` print quantity
//! 4. one label

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Graphic-download block start
pub const GRAPHIC_DOWNLOAD: &str = "~DGR:";
/// Start-of-label
pub const LABEL_START: &str = "^XA";
/// End-of-label
pub const LABEL_END: &str = "^XZ";
/// Print quantity
pub const PRINT_QUANTITY: &str = "^PQ";

/// Markers that turn a `^XA` into something other than a label start
const NON_LABEL_FOLLOWERS: &[&str] = &["^QA", "^MMT"];

/// Labels per preview request for large documents
pub const PREVIEW_CHUNK_SIZE: usize = 16;

/// Graphic name used by the terminator block when the header has none
const DEFAULT_GRAPHIC: &str = "R:DEMO.GRF";

/// Which counting rule produced the label count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountRule {
    GraphicDownload,
    LabelStart,
    PrintQuantity,
    Default,
}

/// One self-contained label extracted from a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelUnit {
    /// Position within the source document
    pub ordinal: usize,
    pub zpl: String,
}

impl LabelUnit {
    pub fn new(ordinal: usize, zpl: impl Into<String>) -> Self {
        Self {
            ordinal,
            zpl: zpl.into(),
        }
    }

    /// SHA-256 of the unit markup, hex encoded
    pub fn content_hash(&self) -> String {
        content_hash(&self.zpl)
    }
}

/// Result of segmenting a document for one-unit-per-call rendering
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub units: Vec<LabelUnit>,
    pub count: usize,
    pub rule: CountRule,
}

/// Marker statistics for a document (debug aid)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelAnalysis {
    pub total_length: usize,
    pub dgr_count: usize,
    pub xa_count: usize,
    pub standalone_xa_count: usize,
    pub xz_count: usize,
    pub pq_count: usize,
    pub label_count: usize,
    pub rule: CountRule,
}

pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Count labels in a document
pub fn count_labels(zpl: &str) -> usize {
    count_with_rule(zpl).0
}

fn count_with_rule(zpl: &str) -> (usize, CountRule) {
    let dgr = zpl.matches(GRAPHIC_DOWNLOAD).count();
    if dgr > 0 {
        return (dgr, CountRule::GraphicDownload);
    }

    let standalone = standalone_label_starts(zpl).len();
    if standalone > 0 {
        return (standalone, CountRule::LabelStart);
    }

    if let Some(quantity) = print_quantity(zpl).filter(|q| *q > 0) {
        return (quantity, CountRule::PrintQuantity);
    }

    (1, CountRule::Default)
}

/// Byte offsets of `^XA` markers that really start a label
fn standalone_label_starts(zpl: &str) -> Vec<usize> {
    zpl.match_indices(LABEL_START)
        .map(|(pos, _)| pos)
        .filter(|pos| {
            let rest = &zpl[pos + LABEL_START.len()..];
            !NON_LABEL_FOLLOWERS.iter().any(|m| rest.starts_with(m))
        })
        .collect()
}

/// Numeric argument of the first `^PQ` directive
fn print_quantity(zpl: &str) -> Option<usize> {
    zpl.match_indices(PRINT_QUANTITY).find_map(|(pos, _)| {
        let digits: String = zpl[pos + PRINT_QUANTITY.len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    })
}

/// Slice `zpl` from each offset to the next (or the end)
fn slice_at(zpl: &str, starts: &[usize]) -> Vec<String> {
    starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let end = starts.get(i + 1).copied().unwrap_or(zpl.len());
            zpl[*start..end].trim().to_string()
        })
        .collect()
}

fn graphic_download_starts(zpl: &str) -> Vec<usize> {
    zpl.match_indices(GRAPHIC_DOWNLOAD).map(|(pos, _)| pos).collect()
}

/// `^XA` / `^XZ` synthesized around a unit that lacks them
fn ensure_delimited(label: String) -> String {
    let mut label = label;
    if !label.contains(LABEL_START) {
        label.insert_str(0, LABEL_START);
    }
    if !label.contains(LABEL_END) {
        label.push_str(LABEL_END);
    }
    label
}

/// Minimal terminator block appended to a graphic block that does not end with `^XZ`
fn ensure_terminated(label: String) -> String {
    if label.ends_with(LABEL_END) {
        return label;
    }
    let name = graphic_name(&label).unwrap_or(DEFAULT_GRAPHIC);
    format!("{label}\n^XA^ID{name}^FS^XZ")
}

/// `R:NAME.GRF` from a `~DGR:NAME.GRF,total,row,...` header
fn graphic_name(label: &str) -> Option<&str> {
    let header = label.strip_prefix("~DG")?;
    let name = header.split(',').next()?.trim();
    (!name.is_empty() && name.len() < 40).then_some(name)
}

/// Segment into one unit per upstream call
///
/// A document with no recognized markers is exactly one unit.
pub fn segment(zpl: &str) -> Segmentation {
    let (count, rule) = count_with_rule(zpl);

    let texts = match rule {
        CountRule::GraphicDownload => slice_at(zpl, &graphic_download_starts(zpl)),
        CountRule::LabelStart => split_label_starts(zpl),
        CountRule::PrintQuantity | CountRule::Default => vec![zpl.trim().to_string()],
    };

    let units = texts
        .into_iter()
        .map(ensure_delimited)
        .enumerate()
        .map(|(ordinal, text)| LabelUnit::new(ordinal, text))
        .collect();

    Segmentation { units, count, rule }
}

/// Split at standalone `^XA`, carrying any leading setup commands into every unit
fn split_label_starts(zpl: &str) -> Vec<String> {
    let starts = standalone_label_starts(zpl);
    let preamble = starts
        .first()
        .map(|first| zpl[..*first].trim())
        .unwrap_or_default();

    slice_at(zpl, &starts)
        .into_iter()
        .map(|label| {
            if preamble.is_empty() {
                label
            } else {
                format!("{preamble}\n{label}")
            }
        })
        .collect()
}

/// Units as sent for previews: graphic blocks get a terminator block instead
/// of synthesized delimiters
pub fn preview_units(zpl: &str) -> Vec<String> {
    let starts = graphic_download_starts(zpl);
    if starts.is_empty() {
        return segment(zpl).units.into_iter().map(|u| u.zpl).collect();
    }
    slice_at(zpl, &starts)
        .into_iter()
        .map(ensure_terminated)
        .collect()
}

/// Group preview units into chunks of at most `chunk_size` labels
pub fn preview_chunks(zpl: &str, chunk_size: usize) -> Vec<String> {
    preview_units(zpl)
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.join("\n\n"))
        .collect()
}

/// Marker statistics for a document
pub fn analyze(zpl: &str) -> LabelAnalysis {
    let (label_count, rule) = count_with_rule(zpl);
    LabelAnalysis {
        total_length: zpl.len(),
        dgr_count: zpl.matches(GRAPHIC_DOWNLOAD).count(),
        xa_count: zpl.matches(LABEL_START).count(),
        standalone_xa_count: standalone_label_starts(zpl).len(),
        xz_count: zpl.matches(LABEL_END).count(),
        pq_count: zpl.matches(PRINT_QUANTITY).count(),
        label_count,
        rule,
    }
}
