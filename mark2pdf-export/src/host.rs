//! Offscreen layout host
//!
//! A fixed-width surface holding the rendered markup that exports capture.
//! It is never shown; the preview lives elsewhere.

use std::path::{Path, PathBuf};

use mark2pdf_core::config::RasterConfig;
use mark2pdf_core::RenderedMarkup;

use crate::error::ExportError;

/// A4 width at 96 DPI
pub const DEFAULT_WIDTH_PX: u32 = 794;
pub const DEFAULT_PADDING_PX: u32 = 40;

#[derive(Debug, Clone)]
pub struct OffscreenHost {
    width_px: u32,
    padding_px: u32,
    mounted: bool,
    markup: Option<RenderedMarkup>,
    base_dir: Option<PathBuf>,
}

impl OffscreenHost {
    /// A mounted, empty host
    pub fn new(width_px: u32, padding_px: u32) -> Self {
        Self {
            width_px,
            padding_px,
            mounted: true,
            markup: None,
            base_dir: None,
        }
    }

    pub fn from_config(config: &RasterConfig) -> Self {
        Self::new(config.host_width_px, config.host_padding_px)
    }

    pub fn width_px(&self) -> u32 {
        self.width_px
    }

    pub fn padding_px(&self) -> u32 {
        self.padding_px
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn mount(&mut self) {
        self.mounted = true;
    }

    /// Detach the host; its content goes with it
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.markup = None;
    }

    /// Replace the host's content with `markup`
    pub fn populate(
        &mut self,
        markup: RenderedMarkup,
        base_dir: Option<&Path>,
    ) -> Result<(), ExportError> {
        if !self.mounted {
            return Err(ExportError::MissingTarget);
        }
        log::debug!("Populating host with revision {}", markup.rev);
        self.markup = Some(markup);
        self.base_dir = base_dir.map(Path::to_path_buf);
        Ok(())
    }

    /// The markup an export would capture
    pub fn content(&self) -> Result<&RenderedMarkup, ExportError> {
        if !self.mounted {
            return Err(ExportError::MissingTarget);
        }
        match &self.markup {
            Some(markup) if !markup.is_empty() => Ok(markup),
            _ => Err(ExportError::EmptyTarget),
        }
    }

    /// Directory relative image paths resolve against
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }
}

impl Default for OffscreenHost {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH_PX, DEFAULT_PADDING_PX)
    }
}
