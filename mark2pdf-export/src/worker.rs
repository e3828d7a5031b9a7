//! Background export worker thread
//!
//! Owns an exporter and its own offscreen host. Requests arriving while an
//! export runs are coalesced: only the newest revision per document is
//! exported, and revisions older than one already seen are dropped.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use mark2pdf_core::RenderedMarkup;

use crate::error::ExportError;
use crate::export::{ExportArtifact, Exporter};
use crate::host::OffscreenHost;
use crate::raster::Rasterizer;
use crate::status::Notifier;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const COALESCE_WINDOW: Duration = Duration::from_millis(75);

/// Request to export one revision of a document
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub doc_id: usize,
    pub rev: u64,
    pub markup: RenderedMarkup,
    pub base_dir: Option<PathBuf>,
    pub title: Option<String>,
}

#[derive(Debug)]
pub struct ExportResult {
    pub doc_id: usize,
    pub rev: u64,
    pub outcome: Result<ExportArtifact, ExportError>,
}

/// Export worker handle
pub struct ExportWorker {
    request_tx: Option<Sender<ExportRequest>>,
    result_rx: Receiver<ExportResult>,
    worker_thread: Option<thread::JoinHandle<()>>,
}

impl ExportWorker {
    /// Spawn a worker thread that owns `exporter`
    pub fn spawn<R, N>(exporter: Exporter<R, N>, host: OffscreenHost) -> Self
    where
        R: Rasterizer + Send + 'static,
        N: Notifier + Send + 'static,
    {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        let worker_thread = thread::spawn(move || {
            worker_loop(exporter, host, request_rx, result_tx);
        });

        Self {
            request_tx: Some(request_tx),
            result_rx,
            worker_thread: Some(worker_thread),
        }
    }

    /// Queue an export
    pub fn request_export(&self, req: ExportRequest) {
        if let Some(tx) = &self.request_tx {
            let _ = tx.send(req);
        }
    }

    /// Try to receive an export result (non-blocking)
    pub fn try_recv_result(&self) -> Option<ExportResult> {
        self.result_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for an export result
    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<ExportResult> {
        self.result_rx.recv_timeout(timeout).ok()
    }

    /// Run whatever is still queued, then stop the thread
    pub fn shutdown(mut self) -> Vec<ExportResult> {
        self.request_tx = None;
        if let Some(handle) = self.worker_thread.take() {
            if handle.join().is_err() {
                log::error!("Export worker panicked");
            }
        }
        self.result_rx.try_iter().collect()
    }
}

impl Drop for ExportWorker {
    fn drop(&mut self) {
        self.request_tx = None;
        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Worker thread main loop
fn worker_loop<R: Rasterizer, N: Notifier>(
    mut exporter: Exporter<R, N>,
    mut host: OffscreenHost,
    request_rx: Receiver<ExportRequest>,
    result_tx: Sender<ExportResult>,
) {
    let mut pending: HashMap<usize, ExportRequest> = HashMap::new();
    let mut newest: HashMap<usize, u64> = HashMap::new();
    let mut last_request = Instant::now();

    loop {
        match request_rx.recv_timeout(POLL_INTERVAL) {
            Ok(req) => {
                let seen = newest.entry(req.doc_id).or_insert(0);
                if req.rev < *seen {
                    log::debug!("Dropping stale export of doc {} rev {}", req.doc_id, req.rev);
                    continue;
                }
                *seen = req.rev;
                // Coalesce: keep only the latest request per doc_id
                pending.insert(req.doc_id, req);
                last_request = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                if !pending.is_empty() && last_request.elapsed() >= COALESCE_WINDOW {
                    run_pending(&mut exporter, &mut host, &mut pending, &result_tx);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                run_pending(&mut exporter, &mut host, &mut pending, &result_tx);
                break;
            }
        }
    }
}

fn run_pending<R: Rasterizer, N: Notifier>(
    exporter: &mut Exporter<R, N>,
    host: &mut OffscreenHost,
    pending: &mut HashMap<usize, ExportRequest>,
    result_tx: &Sender<ExportResult>,
) {
    for (doc_id, req) in pending.drain() {
        let outcome = host
            .populate(req.markup, req.base_dir.as_deref())
            .and_then(|()| exporter.export(host, req.title.as_deref()));
        let _ = result_tx.send(ExportResult {
            doc_id,
            rev: req.rev,
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportSettings;
    use crate::raster::BitmapRasterizer;
    use crate::resources::ResourceLoader;
    use crate::snapshot::SnapshotPolicy;
    use crate::status::LogNotifier;
    use image::{Rgba, RgbaImage};
    use mark2pdf_core::config::ImageConfig;

    fn worker() -> ExportWorker {
        let raster = RgbaImage::from_fn(300, 200, |x, y| {
            let v = (x.wrapping_mul(31) ^ y.wrapping_mul(17)).wrapping_mul(2_654_435_761) >> 24;
            Rgba([v as u8, (v >> 3) as u8, (x ^ y) as u8, 255])
        });
        let exporter = Exporter::new(
            BitmapRasterizer(raster),
            LogNotifier,
            ExportSettings::default(),
            SnapshotPolicy::default(),
            ResourceLoader::new(&ImageConfig::default()),
        );
        ExportWorker::spawn(exporter, OffscreenHost::default())
    }

    fn request(doc_id: usize, rev: u64) -> ExportRequest {
        ExportRequest {
            doc_id,
            rev,
            markup: RenderedMarkup {
                html: format!("<p>revision {rev}</p>\n"),
                rev,
                math_spans: 0,
                math_errors: 0,
            },
            base_dir: None,
            title: None,
        }
    }

    #[test]
    fn test_worker_processes_request() {
        let worker = worker();
        worker.request_export(request(0, 1));

        let result = worker
            .recv_result_timeout(Duration::from_secs(5))
            .expect("export result");
        assert_eq!(result.doc_id, 0);
        assert_eq!(result.rev, 1);
        let artifact = result.outcome.unwrap();
        assert_eq!(artifact.page_count, 1);
        assert_eq!(artifact.rev, 1);
    }

    #[test]
    fn test_worker_coalesces_requests() {
        let worker = worker();
        for rev in 1..=5 {
            worker.request_export(request(0, rev));
        }

        let results = worker.shutdown();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rev, 5);
    }

    #[test]
    fn test_stale_revision_dropped() {
        let worker = worker();
        worker.request_export(request(0, 4));
        worker.request_export(request(0, 2));
        worker.request_export(request(1, 1));

        let mut results = worker.shutdown();
        results.sort_by_key(|r| r.doc_id);
        assert_eq!(results.len(), 2);
        assert_eq!((results[0].doc_id, results[0].rev), (0, 4));
        assert_eq!((results[1].doc_id, results[1].rev), (1, 1));
    }

    #[test]
    fn test_empty_markup_reports_error() {
        let worker = worker();
        let mut req = request(0, 1);
        req.markup.html = String::new();
        worker.request_export(req);

        let results = worker.shutdown();
        assert!(matches!(
            results[0].outcome,
            Err(ExportError::EmptyTarget)
        ));
    }
}
