//! Render scheduling and ephemeral workdir staging for pdfgen
//!
//! This crate holds everything the HTTP service needs besides the transport:
//! - Layout normalization (page presets, orientation, margins)
//! - The generation schema sent alongside uploaded bundles
//! - Workdir staging with a concurrent key registry and orphan reaping
//! - A bounded-concurrency scheduler in front of the render backend
//!
//! # Feature Flags
//!
//! - `chromium` (default): Enables [`backend::ChromiumBackend`] (requires chromiumoxide)

pub mod backend;
pub mod errors;
pub mod layout;
pub mod scheduler;
pub mod schema;
pub mod workdir;

pub use backend::{PrintOptions, RenderBackend};
pub use errors::{BackendError, LayoutError, SchedulerError, StageError};
pub use layout::{LayoutNormalizer, LayoutRequest, LayoutSpec, Margins, Orientation, PagePreset};
pub use scheduler::{default_concurrency, RenderJob, Scheduler};
pub use schema::{GenerationData, GenerationSchema};
pub use workdir::{FileSource, StagedWorkdir, WorkdirHandle, WorkdirManager};

#[cfg(feature = "chromium")]
pub use backend::{ChromiumBackend, ChromiumOptions};
