//! Generation schema sent in the `generation` multipart field
//!
//! ```json
//! {
//!   "html": "index.html",
//!   "assets": ["logo.png", "style.css"],
//!   "layout": {
//!     "orientation": "landscape",
//!     "size": "Letter",
//!     "margin": { "left": 10, "top": 10, "right": 10, "bottom": 10 }
//!   }
//! }
//! ```
//!
//! `size` may also be `{ "width": mm, "height": mm }`. Unknown fields are
//! rejected at every level.

use serde::{Deserialize, Serialize};

use crate::errors::LayoutError;
use crate::layout::{LayoutNormalizer, LayoutRequest, LayoutSpec};

/// Raw generation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationSchema {
    /// Name of the multipart file holding the main HTML document
    #[serde(default)]
    pub html: String,
    /// Names of the multipart files the HTML references
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub layout: Option<LayoutRequest>,
}

/// Normalized version of [`GenerationSchema`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationData {
    pub html: String,
    pub assets: Vec<String>,
    pub layout: LayoutSpec,
}

impl GenerationSchema {
    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn normalize(self, normalizer: &LayoutNormalizer) -> Result<GenerationData, LayoutError> {
        let layout = normalizer.normalize(&self.layout.unwrap_or_default())?;
        Ok(GenerationData {
            html: self.html,
            assets: self.assets,
            layout,
        })
    }
}
