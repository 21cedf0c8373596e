//! Page layout normalization
//!
//! Turns the loose `layout` object of a generation request into a fully
//! resolved [`LayoutSpec`]: orientation, page size in millimeters and margins.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::LayoutError;

/// Page orientation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl FromStr for Orientation {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            other => Err(LayoutError::InvalidOrientation(other.to_string())),
        }
    }
}

/// Named page size presets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PagePreset {
    A0,
    A1,
    A2,
    A3,
    #[default]
    A4,
    A5,
    A6,
    A7,
    A8,
    Letter,
    Legal,
}

impl PagePreset {
    pub const ALL: [PagePreset; 11] = [
        PagePreset::A0,
        PagePreset::A1,
        PagePreset::A2,
        PagePreset::A3,
        PagePreset::A4,
        PagePreset::A5,
        PagePreset::A6,
        PagePreset::A7,
        PagePreset::A8,
        PagePreset::Letter,
        PagePreset::Legal,
    ];

    /// Portrait (width, height) in millimeters
    pub fn portrait_mm(self) -> (f64, f64) {
        match self {
            PagePreset::A0 => (841.0, 1189.0),
            PagePreset::A1 => (594.0, 841.0),
            PagePreset::A2 => (420.0, 594.0),
            PagePreset::A3 => (297.0, 420.0),
            PagePreset::A4 => (210.0, 297.0),
            PagePreset::A5 => (148.5, 210.0),
            PagePreset::A6 => (105.0, 148.5),
            PagePreset::A7 => (74.0, 105.0),
            PagePreset::A8 => (52.0, 74.0),
            PagePreset::Letter => (215.9, 279.4), // 8.5" x 11"
            PagePreset::Legal => (215.9, 335.6),  // 8.5" x 14"
        }
    }

    /// (width, height) in millimeters for the given orientation
    pub fn dimensions_mm(self, orientation: Orientation) -> (f64, f64) {
        let (w, h) = self.portrait_mm();
        match orientation {
            Orientation::Portrait => (w, h),
            Orientation::Landscape => (h, w),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PagePreset::A0 => "A0",
            PagePreset::A1 => "A1",
            PagePreset::A2 => "A2",
            PagePreset::A3 => "A3",
            PagePreset::A4 => "A4",
            PagePreset::A5 => "A5",
            PagePreset::A6 => "A6",
            PagePreset::A7 => "A7",
            PagePreset::A8 => "A8",
            PagePreset::Letter => "Letter",
            PagePreset::Legal => "Legal",
        }
    }
}

impl FromStr for PagePreset {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PagePreset::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| LayoutError::InvalidPreset(s.to_string()))
    }
}

impl fmt::Display for PagePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved page size in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width_mm: f64,
    pub height_mm: f64,
    /// The preset the size was resolved from, if any
    pub preset: Option<PagePreset>,
}

/// Page margins in millimeters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Margins {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Margins {
    pub const fn uniform(mm: f64) -> Self {
        Self {
            left: mm,
            top: mm,
            right: mm,
            bottom: mm,
        }
    }

    fn validate(&self) -> Result<(), LayoutError> {
        for value in [self.left, self.top, self.right, self.bottom] {
            if !value.is_finite() || value < 0.0 {
                return Err(LayoutError::InvalidMargin(value));
            }
        }
        Ok(())
    }
}

/// Fully resolved layout handed to the render backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutSpec {
    pub orientation: Orientation,
    pub size: PageSize,
    pub margins: Margins,
}

/// Requested page size: explicit dimensions or a preset name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeRequest {
    /// `{ "width": mm, "height": mm }`
    Dimensions { width: f64, height: f64 },
    /// One of the [`PagePreset`] names
    Preset(String),
}

/// Loosely specified layout as sent by clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutRequest {
    #[serde(default)]
    pub orientation: Option<String>,
    #[serde(default)]
    pub size: Option<SizeRequest>,
    #[serde(default)]
    pub margin: Option<Margins>,
}

/// Resolves [`LayoutRequest`]s against a configured default margin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutNormalizer {
    default_margins: Margins,
}

impl LayoutNormalizer {
    pub const DEFAULT_MARGIN_MM: f64 = 10.0;

    pub fn new(default_margins: Margins) -> Self {
        Self { default_margins }
    }

    pub fn default_margins(&self) -> Margins {
        self.default_margins
    }

    /// Resolve a request into a [`LayoutSpec`]
    ///
    /// Presets are swapped for landscape; explicit dimensions are taken as-is.
    pub fn normalize(&self, request: &LayoutRequest) -> Result<LayoutSpec, LayoutError> {
        let orientation = match request.orientation.as_deref() {
            Some(raw) => raw.parse()?,
            None => Orientation::Portrait,
        };

        let size = match &request.size {
            None => Self::preset_size(PagePreset::A4, orientation),
            Some(SizeRequest::Preset(name)) => Self::preset_size(name.parse()?, orientation),
            Some(SizeRequest::Dimensions { width, height }) => {
                let valid = |v: f64| v.is_finite() && v > 0.0;
                if !valid(*width) || !valid(*height) {
                    return Err(LayoutError::InvalidSize {
                        width: *width,
                        height: *height,
                    });
                }
                PageSize {
                    width_mm: *width,
                    height_mm: *height,
                    preset: None,
                }
            }
        };

        let margins = request.margin.unwrap_or(self.default_margins);
        margins.validate()?;

        Ok(LayoutSpec {
            orientation,
            size,
            margins,
        })
    }

    fn preset_size(preset: PagePreset, orientation: Orientation) -> PageSize {
        let (width_mm, height_mm) = preset.dimensions_mm(orientation);
        PageSize {
            width_mm,
            height_mm,
            preset: Some(preset),
        }
    }
}

impl Default for LayoutNormalizer {
    fn default() -> Self {
        Self::new(Margins::uniform(Self::DEFAULT_MARGIN_MM))
    }
}
