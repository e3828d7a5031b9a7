//! Page geometry in PDF points

use mark2pdf_core::config::PageConfig;

use crate::error::GeometryError;

/// A page and its margin-bounded content area
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    width: f64,
    height: f64,
    margin: f64,
}

impl PageGeometry {
    /// Validate and build a geometry; the content area must be positive
    pub fn new(width: f64, height: f64, margin: f64) -> Result<Self, GeometryError> {
        let finite = width.is_finite() && height.is_finite() && margin.is_finite();
        if !finite || width <= 0.0 || height <= 0.0 || margin < 0.0 {
            return Err(GeometryError::InvalidPage {
                width,
                height,
                margin,
            });
        }

        let geometry = Self {
            width,
            height,
            margin,
        };
        if geometry.content_width() <= 0.0 || geometry.content_height() <= 0.0 {
            return Err(GeometryError::NoContentArea {
                width: geometry.content_width(),
                height: geometry.content_height(),
            });
        }

        Ok(geometry)
    }

    /// A4 portrait with a 40pt margin
    pub fn a4() -> Self {
        Self {
            width: 595.0,
            height: 842.0,
            margin: 40.0,
        }
    }

    pub fn from_config(config: &PageConfig) -> Result<Self, GeometryError> {
        Self::new(config.width_pt, config.height_pt, config.margin_pt)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn content_width(&self) -> f64 {
        self.width - 2.0 * self.margin
    }

    pub fn content_height(&self) -> f64 {
        self.height - 2.0 * self.margin
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::a4()
    }
}
