//! Image-only PDF assembly
//!
//! Every page carries at most one raster, drawn as an RGB image XObject.
//! Transparent pixels are composited over white before encoding.

use image::RgbaImage;
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, TextStr};

use crate::error::PdfError;
use crate::geometry::PageGeometry;
use crate::paginate::Placement;

const PRODUCER: &str = "mark2pdf";

/// Deflate level shared by image and content streams
const COMPRESSION_LEVEL: u8 = 6;

struct PageImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
    placement: Placement,
}

/// Accumulates pages and their images, then writes the PDF in one go
pub struct PdfBuilder {
    geometry: PageGeometry,
    title: Option<String>,
    pages: Vec<Option<PageImage>>,
}

impl PdfBuilder {
    /// Start a document with one empty page
    pub fn new(geometry: PageGeometry) -> Self {
        Self {
            geometry,
            title: None,
            pages: vec![None],
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Append an empty page; subsequent images land on it
    pub fn add_page(&mut self) {
        self.pages.push(None);
    }

    /// Draw `image` on the current (last) page
    pub fn add_image(&mut self, image: &RgbaImage, placement: Placement) -> Result<(), PdfError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PdfError::EmptyImage);
        }

        let page = self.pages.len();
        let slot = self
            .pages
            .last_mut()
            .ok_or(PdfError::PageOccupied { page })?;
        if slot.is_some() {
            return Err(PdfError::PageOccupied { page });
        }

        let rgb = flatten_on_white(image);
        let data = miniz_oxide::deflate::compress_to_vec_zlib(&rgb, COMPRESSION_LEVEL);
        *slot = Some(PageImage {
            width: image.width(),
            height: image.height(),
            data,
            placement,
        });
        Ok(())
    }

    /// Serialize the document
    pub fn finish(self) -> Vec<u8> {
        let mut next_id = 1;
        let mut alloc = || {
            let r = Ref::new(next_id);
            next_id += 1;
            r
        };

        let catalog_id = alloc();
        let pages_id = alloc();
        let info_id = alloc();

        let mut pdf = Pdf::new();
        let mut page_ids = Vec::with_capacity(self.pages.len());
        let page_width = self.geometry.width() as f32;
        let page_height = self.geometry.height() as f32;

        for (index, page) in self.pages.iter().enumerate() {
            let page_id = alloc();
            let content_id = alloc();
            page_ids.push(page_id);

            let mut content = Content::new();
            let image_name = format!("Im{}", index + 1);
            let image_id = page.as_ref().map(|img| {
                let image_id = alloc();
                {
                    let mut xobj = pdf.image_xobject(image_id, &img.data);
                    xobj.filter(Filter::FlateDecode);
                    xobj.width(img.width as i32);
                    xobj.height(img.height as i32);
                    xobj.color_space().device_rgb();
                    xobj.bits_per_component(8);
                }

                let p = img.placement;
                // PDF user space grows upward from the bottom-left corner
                let bottom = self.geometry.height() - p.top - p.height;
                content.save_state();
                content.transform([
                    p.width as f32,
                    0.0,
                    0.0,
                    p.height as f32,
                    p.x as f32,
                    bottom as f32,
                ]);
                content.x_object(Name(image_name.as_bytes()));
                content.restore_state();
                image_id
            });

            let raw = content.finish();
            let compressed =
                miniz_oxide::deflate::compress_to_vec_zlib(raw.as_slice(), COMPRESSION_LEVEL);
            pdf.stream(content_id, &compressed)
                .filter(Filter::FlateDecode);

            let mut pdf_page = pdf.page(page_id);
            pdf_page
                .media_box(Rect::new(0.0, 0.0, page_width, page_height))
                .parent(pages_id)
                .contents(content_id);
            if let Some(image_id) = image_id {
                pdf_page
                    .resources()
                    .x_objects()
                    .pair(Name(image_name.as_bytes()), image_id);
            }
        }

        pdf.catalog(catalog_id).pages(pages_id);
        pdf.pages(pages_id)
            .kids(page_ids.iter().copied())
            .count(page_ids.len() as i32);

        {
            let mut info = pdf.document_info(info_id);
            if let Some(title) = &self.title {
                info.title(TextStr(title.as_str()));
            }
            info.producer(TextStr(PRODUCER));
        }

        pdf.finish()
    }
}

/// RGB bytes of `image` with alpha composited over white
fn flatten_on_white(image: &RgbaImage) -> Vec<u8> {
    image
        .pixels()
        .flat_map(|p| {
            let [r, g, b, a] = p.0;
            let a = u16::from(a);
            let blend = |c: u8| ((u16::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
            [blend(r), blend(g), blend(b)]
        })
        .collect()
}
