//! The export state machine
//!
//! `Idle -> CapturingDom -> ComputingLayout -> (PlacingSinglePage |
//! SlicingPages) -> Finalizing -> Done`, with any failure going through
//! `ReportedError` back to `Idle`. Every run records the states it visits.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{imageops, ImageFormat, RgbaImage};
use mark2pdf_core::config::{Config, DEFAULT_FILE_NAME};
use mark2pdf_core::SecurityEvent;

use crate::error::{ExportError, GeometryError};
use crate::geometry::PageGeometry;
use crate::host::OffscreenHost;
use crate::paginate::{self, PagePlan, Placement};
use crate::pdf::PdfBuilder;
use crate::raster::{RasterOptions, Rasterizer};
use crate::resources::{ResourceLoader, ResourceRecord};
use crate::snapshot::{self, SnapshotPolicy};
use crate::status::{ExportStatus, LogNotifier, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    CapturingDom,
    ComputingLayout,
    PlacingSinglePage,
    SlicingPages,
    Finalizing,
    Done,
    ReportedError,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub geometry: PageGeometry,
    pub raster: RasterOptions,
    /// PNG-encoded captures smaller than this are blank
    pub min_image_bytes: usize,
    pub file_name: String,
}

impl ExportSettings {
    pub fn from_config(config: &Config) -> Result<Self, GeometryError> {
        Ok(Self {
            geometry: PageGeometry::from_config(&config.page)?,
            raster: RasterOptions::from_config(&config.raster),
            min_image_bytes: config.raster.min_image_bytes,
            file_name: config.output.file_name.clone(),
        })
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            geometry: PageGeometry::a4(),
            raster: RasterOptions::default(),
            min_image_bytes: 1024,
            file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }
}

/// A finished PDF and what went into it
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    pub file_name: String,
    /// Image placement on each page
    pub placements: Vec<Placement>,
    /// Revision of the markup that was captured
    pub rev: u64,
    pub resources: Vec<ResourceRecord>,
    pub security: Vec<SecurityEvent>,
}

impl ExportArtifact {
    /// Write the PDF into `dir` under its file name
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

/// Drives one export at a time from an offscreen host to PDF bytes
pub struct Exporter<R, N = LogNotifier> {
    rasterizer: R,
    notifier: N,
    settings: ExportSettings,
    policy: SnapshotPolicy,
    loader: ResourceLoader,
    state: ExportState,
    history: Vec<ExportState>,
}

impl<R: Rasterizer, N: Notifier> Exporter<R, N> {
    pub fn new(
        rasterizer: R,
        notifier: N,
        settings: ExportSettings,
        policy: SnapshotPolicy,
        loader: ResourceLoader,
    ) -> Self {
        Self {
            rasterizer,
            notifier,
            settings,
            policy,
            loader,
            state: ExportState::Idle,
            history: vec![ExportState::Idle],
        }
    }

    pub fn from_config(config: &Config, rasterizer: R, notifier: N) -> Result<Self> {
        Ok(Self::new(
            rasterizer,
            notifier,
            ExportSettings::from_config(config)?,
            SnapshotPolicy::from_config(&config.styles)?,
            ResourceLoader::new(&config.images),
        ))
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    /// States visited by the most recent export
    pub fn history(&self) -> &[ExportState] {
        &self.history
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Capture `host` and build the PDF
    pub fn export(
        &mut self,
        host: &OffscreenHost,
        title: Option<&str>,
    ) -> Result<ExportArtifact, ExportError> {
        self.history.clear();
        self.transition(ExportState::Idle);

        // A missing target is reported before the export is announced
        if let Err(err) = host.content() {
            return Err(self.fail(err));
        }

        self.notifier.notify(&ExportStatus::Started);
        match self.run(host, title) {
            Ok(artifact) => {
                log::info!(
                    "Exported revision {} as {} page(s), {} bytes",
                    artifact.rev,
                    artifact.page_count,
                    artifact.bytes.len()
                );
                self.notifier.notify(&ExportStatus::Succeeded {
                    pages: artifact.page_count,
                    bytes: artifact.bytes.len(),
                });
                Ok(artifact)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn run(
        &mut self,
        host: &OffscreenHost,
        title: Option<&str>,
    ) -> Result<ExportArtifact, ExportError> {
        self.transition(ExportState::CapturingDom);
        let snapshot = snapshot::capture(host, &self.policy, &mut self.loader)?;
        let raster = self
            .rasterizer
            .rasterize(&snapshot, &self.settings.raster)?;
        check_capture(&raster, self.settings.min_image_bytes)?;

        self.transition(ExportState::ComputingLayout);
        let geometry = self.settings.geometry;
        let plan = paginate::plan(raster.width(), raster.height(), &geometry)?;

        let mut builder = PdfBuilder::new(geometry);
        if let Some(title) = title {
            builder = builder.with_title(title);
        }

        match &plan {
            PagePlan::Single(placement) => {
                self.transition(ExportState::PlacingSinglePage);
                builder.add_image(&raster, *placement)?;
            }
            PagePlan::Multi(slices) => {
                self.transition(ExportState::SlicingPages);
                for (index, slice) in slices.iter().enumerate() {
                    if index > 0 {
                        builder.add_page();
                    }
                    let chunk =
                        imageops::crop_imm(&raster, 0, slice.src_y, raster.width(), slice.src_height)
                            .to_image();
                    builder.add_image(&chunk, slice.placement)?;
                }
            }
        }

        self.transition(ExportState::Finalizing);
        let page_count = builder.page_count();
        let bytes = builder.finish();
        self.transition(ExportState::Done);

        Ok(ExportArtifact {
            bytes,
            page_count,
            file_name: self.settings.file_name.clone(),
            placements: plan.placements(),
            rev: snapshot.rev,
            resources: snapshot.resources,
            security: snapshot.security,
        })
    }

    fn fail(&mut self, err: ExportError) -> ExportError {
        self.transition(ExportState::ReportedError);
        log::warn!("Export failed: {}", err);
        self.notifier.notify(&ExportStatus::Failed {
            summary: err.to_string(),
        });
        self.transition(ExportState::Idle);
        err
    }

    fn transition(&mut self, state: ExportState) {
        log::debug!("Export state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.history.push(state);
    }
}

/// Reject zero-sized captures and ones whose PNG encoding is implausibly small
fn check_capture(raster: &RgbaImage, min_bytes: usize) -> Result<(), ExportError> {
    let (width, height) = raster.dimensions();
    if width == 0 || height == 0 {
        return Err(ExportError::BlankCapture {
            bytes: 0,
            width,
            height,
        });
    }

    let mut encoded = Cursor::new(Vec::new());
    raster.write_to(&mut encoded, ImageFormat::Png)?;
    let bytes = encoded.into_inner().len();
    if bytes < min_bytes {
        return Err(ExportError::BlankCapture {
            bytes,
            width,
            height,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::BitmapRasterizer;
    use image::Rgba;
    use mark2pdf_core::config::ImageConfig;
    use mark2pdf_core::RenderedMarkup;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// A bitmap that does not compress into nothing
    fn textured(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(31) ^ y.wrapping_mul(17)).wrapping_mul(2_654_435_761) >> 24;
            Rgba([v as u8, (v >> 1) as u8, (v >> 2) as u8, 255])
        })
    }

    fn host() -> OffscreenHost {
        let mut host = OffscreenHost::default();
        host.populate(
            RenderedMarkup {
                html: "<h1>Title</h1>\n".to_string(),
                rev: 2,
                math_spans: 0,
                math_errors: 0,
            },
            None,
        )
        .unwrap();
        host
    }

    type Log = Rc<RefCell<Vec<ExportStatus>>>;

    fn exporter(raster: RgbaImage) -> (Exporter<BitmapRasterizer, impl Notifier>, Log) {
        let log: Log = Rc::default();
        let sink = Rc::clone(&log);
        let exporter = Exporter::new(
            BitmapRasterizer(raster),
            move |status: &ExportStatus| sink.borrow_mut().push(status.clone()),
            ExportSettings::default(),
            SnapshotPolicy::default(),
            ResourceLoader::new(&ImageConfig::default()),
        );
        (exporter, log)
    }

    #[test]
    fn test_single_page_export() {
        let (mut exporter, log) = exporter(textured(794, 400));
        let artifact = exporter.export(&host(), Some("Title")).unwrap();

        assert_eq!(artifact.page_count, 1);
        assert_eq!(artifact.rev, 2);
        assert_eq!(artifact.file_name, "mark2pdf_document.pdf");
        assert!(artifact.bytes.starts_with(b"%PDF-"));
        assert_eq!(
            exporter.history(),
            &[
                ExportState::Idle,
                ExportState::CapturingDom,
                ExportState::ComputingLayout,
                ExportState::PlacingSinglePage,
                ExportState::Finalizing,
                ExportState::Done,
            ]
        );
        assert_eq!(exporter.state(), ExportState::Done);
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
    fn test_tall_raster_slices_pages() {
        let (mut exporter, _) = exporter(textured(400, 2000));
        let artifact = exporter.export(&host(), None).unwrap();

        // 515pt over 400px: 591 rows per page
        assert_eq!(artifact.page_count, 4);
        assert_eq!(artifact.placements.len(), 4);
        assert!(artifact.placements[3].height < artifact.placements[0].height);
        assert!(exporter.history().contains(&ExportState::SlicingPages));
    }

    #[test]
    fn test_missing_target_reported_without_start() {
        let (mut exporter, log) = exporter(textured(794, 400));
        let mut host = host();
        host.unmount();

        let err = exporter.export(&host, None).unwrap_err();
        assert!(matches!(err, ExportError::MissingTarget));
        assert_eq!(
            exporter.history(),
            &[
                ExportState::Idle,
                ExportState::ReportedError,
                ExportState::Idle
            ]
        );
        assert_eq!(
            *log.borrow(),
            vec![ExportStatus::Failed {
                summary: "could not find the printable area".to_string()
            }]
        );
    }

    #[test]
    fn test_blank_capture_fails() {
        let blank = RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 255]));
        let (mut exporter, log) = exporter(blank);

        let err = exporter.export(&host(), None).unwrap_err();
        assert!(matches!(err, ExportError::BlankCapture { .. }));
        assert_eq!(exporter.state(), ExportState::Idle);
        assert_eq!(
            exporter.history(),
            &[
                ExportState::Idle,
                ExportState::CapturingDom,
                ExportState::ReportedError,
                ExportState::Idle
            ]
        );
        assert_eq!(log.borrow().len(), 2);
        assert!(matches!(log.borrow()[1], ExportStatus::Failed { .. }));
    }

    #[test]
    fn test_zero_sized_capture_fails() {
        assert!(matches!(
            check_capture(&RgbaImage::new(0, 10), 1),
            Err(ExportError::BlankCapture { bytes: 0, .. })
        ));
    }

    #[test]
    fn test_history_resets_between_runs() {
        let (mut exporter, _) = exporter(textured(794, 400));
        exporter.export(&host(), None).unwrap();
        exporter.export(&host(), None).unwrap();
        assert_eq!(exporter.history().len(), 6);
    }

    #[test]
    fn test_artifact_written_with_fixed_name() {
        let (mut exporter, _) = exporter(textured(794, 400));
        let artifact = exporter.export(&host(), None).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = artifact.write_to(&dir.path().join("out")).unwrap();
        assert!(path.ends_with("mark2pdf_document.pdf"));
        assert_eq!(fs::read(path).unwrap(), artifact.bytes);
    }
}
