//! Error types for the export pipeline

use std::io;
use thiserror::Error;

/// Why an export failed
#[derive(Debug, Error)]
pub enum ExportError {
    /// The offscreen host is not mounted
    #[error("could not find the printable area")]
    MissingTarget,
    #[error("the printable area has no content")]
    EmptyTarget,
    #[error("capture produced a blank canvas ({bytes} bytes for {width}x{height} px)")]
    BlankCapture { bytes: usize, width: u32, height: u32 },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("rasterization failed: {0}")]
    Raster(#[from] RasterError),
    #[error("failed to assemble PDF: {0}")]
    Pdf(#[from] PdfError),
    #[error("failed to encode capture: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("page dimensions must be finite and positive (got {width}x{height} pt, margin {margin} pt)")]
    InvalidPage { width: f64, height: f64, margin: f64 },
    #[error("margins leave no content area ({width}x{height} pt)")]
    NoContentArea { width: f64, height: f64 },
    #[error("cannot paginate an empty raster ({width}x{height} px)")]
    EmptyRaster { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("external rasterizer disabled by security.no_exec")]
    ExecDisabled,
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` did not finish within {secs}s")]
    TimedOut { command: String, secs: u64 },
    #[error("could not decode capture: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PdfError {
    #[error("page {page} already holds an image")]
    PageOccupied { page: usize },
    #[error("image chunk is empty")]
    EmptyImage,
}
