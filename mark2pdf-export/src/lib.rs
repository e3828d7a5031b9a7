//! Mark2PDF Export - Offscreen capture, pagination and PDF assembly
//!
//! This crate turns rendered markup into a PDF:
//! - Offscreen layout host and standalone snapshots
//! - Image loading with bounded waits
//! - Rasterizer seam (external command or pre-captured bitmap)
//! - Page geometry and raster pagination
//! - Image-only PDF writing
//! - The export state machine, notifications and a background worker

pub mod error;
pub mod export;
pub mod geometry;
pub mod host;
pub mod paginate;
pub mod pdf;
pub mod raster;
pub mod resources;
pub mod session;
pub mod snapshot;
pub mod status;
pub mod worker;

#[cfg(feature = "watch")]
pub mod watcher;

// Re-export main types
pub use error::ExportError;
pub use export::{ExportArtifact, ExportSettings, ExportState, Exporter};
pub use geometry::PageGeometry;
pub use host::OffscreenHost;
pub use raster::{CommandRasterizer, ImageFileRasterizer, Rasterizer};
pub use session::Session;
pub use status::{ExportStatus, LogNotifier, Notifier};
pub use worker::ExportWorker;
