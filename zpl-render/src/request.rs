//! Render request shaping
//!
//! Raw caller input ([`RenderForm`]) is validated once at the boundary into an
//! immutable [`RenderRequest`]; everything downstream works on the normalized value.

use crate::error::{RenderError, RenderResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millimeters per inch
const MM_PER_INCH: f64 = 25.4;

/// PDF points per inch
pub const POINTS_PER_INCH: f64 = 72.0;

/// DPI -> dots per millimeter, as understood by the upstream printer path
const DPMM_TABLE: &[(u32, u32)] = &[(203, 8), (300, 12), (600, 24)];

/// Physical unit of the label dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[serde(rename = "in", alias = "inch")]
    Inches,
    #[serde(rename = "mm")]
    Millimeters,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inches => "in",
            Self::Millimeters => "mm",
        }
    }

    fn to_inches(self, value: f64) -> f64 {
        match self {
            Self::Inches => value,
            Self::Millimeters => value / MM_PER_INCH,
        }
    }
}

impl FromStr for Unit {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" | "inch" | "inches" => Ok(Self::Inches),
            "mm" => Ok(Self::Millimeters),
            other => Err(RenderError::validation(format!("Unsupported unit: {other}"))),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    #[serde(rename = "0")]
    Upright,
    #[serde(rename = "90")]
    Rotated,
}

impl Orientation {
    pub fn degrees(&self) -> u16 {
        match self {
            Self::Upright => 0,
            Self::Rotated => 90,
        }
    }

    /// Path segment used by the upstream service
    pub fn path_segment(&self) -> u8 {
        match self {
            Self::Upright => 0,
            Self::Rotated => 1,
        }
    }
}

impl FromStr for Orientation {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(Self::Upright),
            "90" => Ok(Self::Rotated),
            other => Err(RenderError::validation(format!(
                "Unsupported orientation: {other}"
            ))),
        }
    }
}

/// Artifact format requested from the upstream service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Pdf,
}

impl OutputFormat {
    pub fn accept(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Pdf => "application/pdf",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Pdf => "pdf",
        }
    }

    /// Encode rendered bytes as a `data:` URL of this format
    pub fn data_url(&self, bytes: &[u8]) -> String {
        to_data_url(bytes, self.accept())
    }
}

/// `data:{mime};base64,{payload}`
pub fn to_data_url(bytes: &[u8], mime: &str) -> String {
    use base64::Engine as _;
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw render input as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderForm {
    pub zpl: String,
    pub dpi: u32,
    pub width: f64,
    pub height: f64,
    pub unit: String,
    pub orientation: String,
}

/// Validated, immutable render request
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    zpl: String,
    dpi: u32,
    width: f64,
    height: f64,
    unit: Unit,
    orientation: Orientation,
}

impl RenderRequest {
    pub fn new(
        zpl: impl Into<String>,
        dpi: u32,
        width: f64,
        height: f64,
        unit: Unit,
        orientation: Orientation,
    ) -> RenderResult<Self> {
        let zpl = zpl.into();
        if zpl.trim().is_empty() {
            return Err(RenderError::validation("ZPL code cannot be empty"));
        }
        if dpi == 0 {
            return Err(RenderError::validation("DPI must be positive"));
        }
        if !(width.is_finite() && width > 0.0) {
            return Err(RenderError::validation(format!(
                "Width must be positive, got {width}"
            )));
        }
        if !(height.is_finite() && height > 0.0) {
            return Err(RenderError::validation(format!(
                "Height must be positive, got {height}"
            )));
        }

        Ok(Self {
            zpl,
            dpi,
            width,
            height,
            unit,
            orientation,
        })
    }

    /// Same render parameters, different markup (one label unit of the document)
    pub fn with_markup(&self, zpl: impl Into<String>) -> Self {
        Self {
            zpl: zpl.into(),
            ..self.clone()
        }
    }

    pub fn zpl(&self) -> &str {
        &self.zpl
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Dots per millimeter for the requested DPI (unknown values fall back to 8)
    pub fn dpmm(&self) -> u32 {
        dpi_to_dpmm(self.dpi)
    }

    pub fn width_in(&self) -> f64 {
        self.unit.to_inches(self.width)
    }

    pub fn height_in(&self) -> f64 {
        self.unit.to_inches(self.height)
    }

    /// Page size in PDF points (width, height)
    pub fn page_size_pt(&self) -> (f32, f32) {
        (
            (self.width_in() * POINTS_PER_INCH) as f32,
            (self.height_in() * POINTS_PER_INCH) as f32,
        )
    }

    /// Upstream path, e.g. `/v1/printers/8dpmm/labels/4x6/0`
    pub fn upstream_path(&self, label_index: Option<usize>) -> String {
        let mut path = format!(
            "/v1/printers/{}dpmm/labels/{}x{}/{}",
            self.dpmm(),
            self.width_in(),
            self.height_in(),
            self.orientation.path_segment()
        );
        if let Some(index) = label_index {
            path.push('/');
            path.push_str(&index.to_string());
        }
        path
    }
}

impl TryFrom<RenderForm> for RenderRequest {
    type Error = RenderError;

    fn try_from(form: RenderForm) -> Result<Self, Self::Error> {
        let unit = form.unit.parse()?;
        let orientation = form.orientation.parse()?;
        Self::new(form.zpl, form.dpi, form.width, form.height, unit, orientation)
    }
}

/// Map DPI to the upstream's dots-per-millimeter resolution
pub fn dpi_to_dpmm(dpi: u32) -> u32 {
    DPMM_TABLE
        .iter()
        .find(|(d, _)| *d == dpi)
        .or_else(|| DPMM_TABLE.first())
        .map(|(_, dpmm)| *dpmm)
        .unwrap_or(8)
}
