//! Raster-to-page layout arithmetic
//!
//! The raster is scaled to the content-area width. If the scaled height fits
//! the content area it is centered on a single page; otherwise it is cut into
//! horizontal bands of whole pixel rows, one band per page, each flush with
//! the top margin. A trailing band shorter than a point is folded into the
//! page before it rather than getting a page of its own.

use crate::error::GeometryError;
use crate::geometry::PageGeometry;

/// Slack for float comparisons, in points
const EPSILON: f64 = 1e-6;

/// Trailing bands shorter than this, in points, join the previous page
const SLIVER_PT: f64 = 1.0;

/// Where an image lands on a page, measured from the page's top-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// A band of raster rows destined for one page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slice {
    pub src_y: u32,
    pub src_height: u32,
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PagePlan {
    Single(Placement),
    Multi(Vec<Slice>),
}

impl PagePlan {
    pub fn page_count(&self) -> usize {
        match self {
            PagePlan::Single(_) => 1,
            PagePlan::Multi(slices) => slices.len(),
        }
    }

    /// Placement of the image on each page, in page order
    pub fn placements(&self) -> Vec<Placement> {
        match self {
            PagePlan::Single(placement) => vec![*placement],
            PagePlan::Multi(slices) => slices.iter().map(|s| s.placement).collect(),
        }
    }
}

/// Lay out a `width` x `height` pixel raster on pages of `geometry`
pub fn plan(width: u32, height: u32, geometry: &PageGeometry) -> Result<PagePlan, GeometryError> {
    if width == 0 || height == 0 {
        return Err(GeometryError::EmptyRaster { width, height });
    }

    let content_width = geometry.content_width();
    let content_height = geometry.content_height();
    let margin = geometry.margin();

    let aspect = f64::from(width) / f64::from(height);
    let rendered_width = content_width;
    let derived_height = rendered_width / aspect;

    if derived_height <= content_height + EPSILON {
        return Ok(PagePlan::Single(Placement {
            x: margin + (content_width - rendered_width) / 2.0,
            top: margin + (content_height - derived_height) / 2.0,
            width: rendered_width,
            height: derived_height,
        }));
    }

    let scale = content_width / f64::from(width);
    let rows_per_page = rows_per_page(content_height, scale);

    let mut slices = Vec::new();
    let mut src_y = 0u32;
    while src_y < height {
        let src_height = rows_per_page.min(height - src_y);
        slices.push(Slice {
            src_y,
            src_height,
            placement: Placement {
                x: margin,
                top: margin,
                width: content_width,
                height: f64::from(src_height) * scale,
            },
        });
        src_y += src_height;
    }

    if slices.len() > 1 && slices.last().is_some_and(|s| s.placement.height < SLIVER_PT) {
        if let Some(sliver) = slices.pop() {
            if let Some(prev) = slices.last_mut() {
                prev.src_height += sliver.src_height;
                prev.placement.height += sliver.placement.height;
            }
        }
    }

    log::debug!(
        "Paginated {}x{} px raster into {} pages of {} rows",
        width,
        height,
        slices.len(),
        rows_per_page
    );

    Ok(PagePlan::Multi(slices))
}

/// Most raster rows that fit in one content-area height at `scale` pt/px
pub fn rows_per_page(content_height: f64, scale: f64) -> u32 {
    let rows = (content_height / scale + EPSILON).floor();
    (rows as u32).max(1)
}
