//! Render backend contract
//!
//! The scheduler only needs "render this URL with this layout". Backends are
//! cancelled by dropping the returned future, so implementations must tear
//! down whatever external process they started when that happens.

#[cfg(feature = "chromium")]
mod chromium;

#[cfg(feature = "chromium")]
pub use chromium::{ChromiumBackend, ChromiumOptions};

use async_trait::async_trait;
use url::Url;

use crate::errors::BackendError;
use crate::layout::{LayoutSpec, Orientation};

const MM_PER_INCH: f64 = 25.4;

pub fn mm_to_inches(mm: f64) -> f64 {
    mm / MM_PER_INCH
}

/// Produces PDF bytes for a URL
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(&self, url: &Url, layout: &LayoutSpec) -> Result<Vec<u8>, BackendError>;
}

/// Print settings in the units a browser print API expects (inches)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintOptions {
    pub landscape: bool,
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin_left: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub print_background: bool,
    pub prefer_css_page_size: bool,
    /// Always false; header/footer decoration is never shown
    pub display_header_footer: bool,
}

impl PrintOptions {
    pub fn from_layout(layout: &LayoutSpec) -> Self {
        Self {
            landscape: layout.orientation == Orientation::Landscape,
            paper_width: mm_to_inches(layout.size.width_mm),
            paper_height: mm_to_inches(layout.size.height_mm),
            margin_left: mm_to_inches(layout.margins.left),
            margin_top: mm_to_inches(layout.margins.top),
            margin_right: mm_to_inches(layout.margins.right),
            margin_bottom: mm_to_inches(layout.margins.bottom),
            print_background: true,
            prefer_css_page_size: true,
            display_header_footer: false,
        }
    }
}
