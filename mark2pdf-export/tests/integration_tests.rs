//! Integration tests for mark2pdf-export
//!
//! These tests drive the whole pipeline end-to-end: document text through
//! the renderer, the offscreen host, a test rasterizer and the PDF writer.

use std::cell::RefCell;
use std::rc::Rc;

use image::{Rgba, RgbaImage};
use mark2pdf_core::{Config, Document, Renderer};
use mark2pdf_export::error::RasterError;
use mark2pdf_export::raster::RasterOptions;
use mark2pdf_export::resources::ResourceStatus;
use mark2pdf_export::snapshot::Snapshot;
use mark2pdf_export::{
    ExportError, ExportState, ExportStatus, Exporter, OffscreenHost, Rasterizer, Session,
};

/// Lays out the snapshot as 10 CSS px per block element, like a very plain browser
struct MeasuringRasterizer;

impl Rasterizer for MeasuringRasterizer {
    fn rasterize(
        &self,
        snapshot: &Snapshot,
        options: &RasterOptions,
    ) -> Result<RgbaImage, RasterError> {
        let blocks = ["<p>", "<h1>", "<h2>", "<li>", "<tr>", "<pre>"]
            .iter()
            .map(|tag| snapshot.html.matches(tag).count() as u32)
            .sum::<u32>();
        let css_height = blocks * 10 + 2 * snapshot.padding_px;
        let width = (snapshot.width_px as f32 * options.scale) as u32;
        let height = (css_height as f32 * options.scale) as u32;
        Ok(textured(width, height))
    }
}

/// Pixels that survive PNG compression, so captures are not mistaken for blank
fn textured(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = (x.wrapping_mul(31) ^ y.wrapping_mul(17)).wrapping_mul(2_654_435_761) >> 24;
        Rgba([v as u8, (v >> 2) as u8, (v >> 4) as u8, 255])
    })
}

type StatusLog = Rc<RefCell<Vec<ExportStatus>>>;

/// Helper to create an exporter whose notifications are recorded
fn create_exporter<R: Rasterizer>(
    rasterizer: R,
) -> (Exporter<R, impl Fn(&ExportStatus)>, StatusLog) {
    let log: StatusLog = Rc::default();
    let sink = Rc::clone(&log);
    let exporter = Exporter::from_config(&Config::default(), rasterizer, move |s: &ExportStatus| {
        sink.borrow_mut().push(s.clone())
    })
    .expect("Failed to build exporter");
    (exporter, log)
}

fn create_session(text: &str) -> Session {
    Session::new(
        Document::from_text(text),
        Renderer::default(),
        OffscreenHost::default(),
    )
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn integration_title_and_math_fit_one_page() {
    let session = create_session("# Title\n\n$x^2$");
    let preview = session.preview();
    assert!(preview.html.contains("<h1>Title</h1>"));
    assert!(preview.html.contains("class=\"katex\""));
    assert_eq!(preview.math_spans, 1);
    assert_eq!(preview.math_errors, 0);

    let (mut exporter, log) = create_exporter(MeasuringRasterizer);
    let artifact = session.export(&mut exporter).expect("export");

    assert_eq!(artifact.page_count, 1);
    assert!(artifact.bytes.starts_with(b"%PDF"));
    assert!(contains(&artifact.bytes, b"/Count 1"));
    assert!(contains(&artifact.bytes, b"/Title (Title)"));
    assert_eq!(artifact.file_name, "mark2pdf_document.pdf");
    assert_eq!(
        *log.borrow(),
        vec![
            ExportStatus::Started,
            ExportStatus::Succeeded {
                pages: 1,
                bytes: artifact.bytes.len()
            }
        ]
    );
}

#[test]
fn integration_long_document_spans_pages() {
    let text: String = (1..=200)
        .map(|i| format!("Paragraph number {i} of a long document.\n\n"))
        .collect();
    let session = create_session(&text);

    let (mut exporter, _log) = create_exporter(MeasuringRasterizer);
    let artifact = session.export(&mut exporter).expect("export");

    assert!(artifact.page_count >= 2);
    assert!(contains(
        &artifact.bytes,
        format!("/Count {}", artifact.page_count).as_bytes()
    ));
    assert!(exporter.history().contains(&ExportState::SlicingPages));

    // Every page but the last is full height; the last is shorter
    let content_height = 762.0;
    let (last, full) = artifact.placements.split_last().expect("placements");
    for placement in full {
        assert!((content_height - placement.height) < 1.0);
        assert_eq!(placement.top, 40.0);
    }
    assert!(last.height < content_height);
    assert_eq!(last.top, 40.0);
}

#[test]
fn integration_unmounted_host_leaves_preview_untouched() {
    let mut session = create_session("# Draft\n\nSome $a+b$ text.");
    let before = session.preview().clone();
    let rev = session.document().rev;
    session.unmount_host();

    let (mut exporter, log) = create_exporter(MeasuringRasterizer);
    let err = session.export(&mut exporter).unwrap_err();

    assert!(matches!(err, ExportError::MissingTarget));
    assert_eq!(session.preview(), &before);
    assert_eq!(session.document().rev, rev);
    assert_eq!(exporter.state(), ExportState::Idle);
    assert_eq!(
        *log.borrow(),
        vec![ExportStatus::Failed {
            summary: "could not find the printable area".to_string()
        }]
    );
}

#[test]
fn integration_empty_document_is_empty_target() {
    let session = create_session("   \n");
    let (mut exporter, log) = create_exporter(MeasuringRasterizer);

    let err = session.export(&mut exporter).unwrap_err();
    assert!(matches!(err, ExportError::EmptyTarget));
    assert!(matches!(log.borrow().last(), Some(ExportStatus::Failed { .. })));
}

#[test]
fn integration_failing_rasterizer_is_reported() {
    struct Broken;
    impl Rasterizer for Broken {
        fn rasterize(&self, _: &Snapshot, _: &RasterOptions) -> Result<RgbaImage, RasterError> {
            Err(RasterError::ExecDisabled)
        }
    }

    let session = create_session("# Title\n");
    let (mut exporter, log) = create_exporter(Broken);
    let err = session.export(&mut exporter).unwrap_err();

    assert!(matches!(err, ExportError::Raster(RasterError::ExecDisabled)));
    assert_eq!(log.borrow().len(), 2);
    assert_eq!(log.borrow()[0], ExportStatus::Started);
    assert_eq!(
        exporter.history().last(),
        Some(&ExportState::Idle),
        "failed exports return to idle"
    );
}

#[test]
fn integration_malformed_math_still_exports() {
    let session = create_session("# Oops\n\n$$\\frac{1}{$$\n\nAfter.");
    let preview = session.preview();
    assert_eq!(preview.math_errors, 1);
    assert!(preview.html.contains("math-error"));
    assert!(preview.html.contains("\\frac{1}{"));

    let (mut exporter, _log) = create_exporter(MeasuringRasterizer);
    assert!(session.export(&mut exporter).is_ok());
}

#[test]
fn integration_edit_then_export_uses_new_revision() {
    let mut session = create_session("# One\n");
    session.edit("---\ntitle: Notes\n---\n# Two\n");

    let (mut exporter, _log) = create_exporter(MeasuringRasterizer);
    let artifact = session.export(&mut exporter).expect("export");

    assert_eq!(artifact.rev, 2);
    assert!(contains(&artifact.bytes, b"/Title (Notes)"));
}

#[test]
fn integration_local_images_are_embedded() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("figure.svg"),
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"4\" height=\"4\"></svg>",
    )
    .expect("write image");
    let doc_path = dir.path().join("doc.md");
    std::fs::write(&doc_path, "# Figures\n\n![figure](figure.svg)\n\n![gone](gone.png)\n")
        .expect("write doc");

    let session = Session::new(
        Document::load(&doc_path).expect("load"),
        Renderer::default(),
        OffscreenHost::default(),
    );
    let (mut exporter, _log) = create_exporter(MeasuringRasterizer);
    let artifact = session.export(&mut exporter).expect("export");

    assert_eq!(artifact.resources.len(), 2);
    assert!(matches!(
        artifact.resources[0].status,
        ResourceStatus::Loaded { .. }
    ));
    assert_eq!(artifact.resources[1].status, ResourceStatus::Refused);
}

#[test]
fn integration_quoted_math_and_refused_remote_image() {
    let session = create_session(
        "# Quoted\n\n> $$\n> a+b\n> $$\n\n![tracker](https://tracker.example/pixel.png)\n",
    );
    let preview = session.preview();
    assert_eq!(preview.math_spans, 1);
    assert_eq!(preview.math_errors, 0);
    assert!(!preview.html.contains("&gt; a+b"));

    let (mut exporter, _log) = create_exporter(MeasuringRasterizer);
    let artifact = session.export(&mut exporter).expect("export");

    assert_eq!(artifact.resources[0].status, ResourceStatus::Refused);
    assert_eq!(artifact.security.len(), 1);
    assert!(artifact.security[0].message.contains("tracker.example"));
}
