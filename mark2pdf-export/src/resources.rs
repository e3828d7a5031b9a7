//! Image loading for snapshots
//!
//! Each load runs on a helper thread and is waited on with `recv_timeout`,
//! so a slow disk or server delays an export by at most the configured wait.
//! Loaded bytes are kept in an LRU keyed by path + mtime (or URL).
//!
//! A helper that outlives its wait keeps running until its read returns.
//! Once `MAX_STALLED_LOADS` of them are outstanding, new loads are skipped.

use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use crossbeam_channel::{bounded, RecvTimeoutError};
use lru::LruCache;
use mark2pdf_core::config::ImageConfig;
use mark2pdf_core::image::{ImageNode, ImagePolicy, ImageSource};
use mark2pdf_core::SecurityEvent;

const CACHE_CAPACITY: usize = 32;

pub const MAX_STALLED_LOADS: usize = 4;

/// What happened to one `<img>` during a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Inlined as a data URI
    Loaded { bytes: usize },
    /// Already a data URI
    Inline,
    /// Refused by the image policy, or the file does not exist
    Refused,
    TooLarge { bytes: u64 },
    TimedOut,
    Failed(String),
}

impl ResourceStatus {
    /// Whether the image made it into the snapshot
    pub fn is_embedded(&self) -> bool {
        matches!(self, ResourceStatus::Loaded { .. } | ResourceStatus::Inline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub src: String,
    pub status: ResourceStatus,
}

/// Cache key for loaded images
#[derive(Hash, PartialEq, Eq, Clone, Debug)]
struct ResourceKey {
    /// Blake3 hash of path + mtime, or of the URL
    hash: [u8; 32],
}

impl ResourceKey {
    fn from_path(path: &Path) -> Option<Self> {
        let mtime = fs::metadata(path).ok()?.modified().ok()?;
        let mtime_nanos = mtime
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?
            .as_nanos();

        let mut hasher = blake3::Hasher::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&mtime_nanos.to_le_bytes());
        Some(Self {
            hash: *hasher.finalize().as_bytes(),
        })
    }

    fn from_url(url: &str) -> Self {
        Self {
            hash: *blake3::hash(url.as_bytes()).as_bytes(),
        }
    }
}

#[derive(Debug)]
struct LoadedImage {
    data_uri: String,
    bytes: usize,
}

type Fetch = Box<dyn FnOnce(u64) -> FetchOutcome + Send>;

enum FetchOutcome {
    Bytes(Vec<u8>),
    TooLarge(u64),
    Failed(String),
}

/// Resolves, loads and inlines snapshot images
pub struct ResourceLoader {
    enabled: bool,
    policy: ImagePolicy,
    max_bytes: u64,
    timeout: Duration,
    cache: LruCache<ResourceKey, Arc<LoadedImage>>,
    /// Helper threads whose fetch has not returned yet
    in_flight: Arc<AtomicUsize>,
    events: Vec<SecurityEvent>,
}

impl ResourceLoader {
    pub fn new(config: &ImageConfig) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            enabled: config.enabled,
            policy: ImagePolicy {
                allow_absolute: config.allow_absolute,
                allow_remote: config.allow_remote,
            },
            max_bytes: config.max_bytes,
            timeout: Duration::from_millis(config.load_timeout_ms),
            cache: LruCache::new(capacity),
            in_flight: Arc::new(AtomicUsize::new(0)),
            events: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Helper threads still blocked in a read that was given up on
    pub fn stalled_loads(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Security events raised since the last call
    pub fn take_events(&mut self) -> Vec<SecurityEvent> {
        std::mem::take(&mut self.events)
    }

    /// Load `src` and return its data URI, if it could be embedded
    pub fn load(&mut self, src: &str, base_dir: Option<&Path>) -> (ResourceRecord, Option<String>) {
        let record = |status| ResourceRecord {
            src: src.to_string(),
            status,
        };

        if !self.enabled {
            return (record(ResourceStatus::Refused), None);
        }

        let source = ImageNode::new(src, "").resolve(base_dir, self.policy);
        let (key, fetch) = match source {
            None => {
                match self.policy.refusal(src) {
                    Some(refusal) => self.events.push(SecurityEvent::image_refused(src, refusal)),
                    None => log::debug!("Image missing or outside the document: {}", src),
                }
                return (record(ResourceStatus::Refused), None);
            }
            Some(ImageSource::Inline) => return (record(ResourceStatus::Inline), None),
            Some(ImageSource::Local(path)) => {
                let Some(key) = ResourceKey::from_path(&path) else {
                    return (record(ResourceStatus::Refused), None);
                };
                let fetch: Fetch = Box::new(move |max| read_local(&path, max));
                (key, fetch)
            }
            Some(ImageSource::Remote(url)) => {
                let key = ResourceKey::from_url(&url);
                let timeout = self.timeout;
                let fetch: Fetch = Box::new(move |max| fetch_remote(&url, max, timeout));
                (key, fetch)
            }
        };

        if let Some(hit) = self.cache.get(&key) {
            log::debug!("Image cache hit: {}", src);
            let hit = Arc::clone(hit);
            return (
                record(ResourceStatus::Loaded { bytes: hit.bytes }),
                Some(hit.data_uri.clone()),
            );
        }

        let stalled = self.stalled_loads();
        if stalled >= MAX_STALLED_LOADS {
            self.events.push(SecurityEvent::image_loads_stalled(src, stalled));
            return (
                record(ResourceStatus::Failed(format!(
                    "{stalled} earlier image loads have not finished"
                ))),
                None,
            );
        }

        let (tx, rx) = bounded(1);
        let max_bytes = self.max_bytes;
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::AcqRel);
        thread::spawn(move || {
            let outcome = fetch(max_bytes);
            in_flight.fetch_sub(1, Ordering::AcqRel);
            // The receiver may have given up already
            let _ = tx.send(outcome);
        });

        let outcome = match rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Image load timed out after {} ms, helper left running ({} stalled): {}",
                    self.timeout.as_millis(),
                    self.stalled_loads(),
                    src
                );
                return (record(ResourceStatus::TimedOut), None);
            }
            Err(RecvTimeoutError::Disconnected) => {
                return (
                    record(ResourceStatus::Failed("loader thread exited".to_string())),
                    None,
                );
            }
        };

        match outcome {
            FetchOutcome::Bytes(bytes) => match mime_type(&bytes) {
                Some(mime) => {
                    let loaded = Arc::new(LoadedImage {
                        data_uri: format!("data:{};base64,{}", mime, STANDARD.encode(&bytes)),
                        bytes: bytes.len(),
                    });
                    self.cache.put(key, Arc::clone(&loaded));
                    (
                        record(ResourceStatus::Loaded {
                            bytes: loaded.bytes,
                        }),
                        Some(loaded.data_uri.clone()),
                    )
                }
                None => {
                    log::warn!("Unrecognized image format: {}", src);
                    (
                        record(ResourceStatus::Failed("unrecognized image format".to_string())),
                        None,
                    )
                }
            },
            FetchOutcome::TooLarge(bytes) => {
                log::warn!("Image exceeds {} bytes ({}): {}", self.max_bytes, bytes, src);
                (record(ResourceStatus::TooLarge { bytes }), None)
            }
            FetchOutcome::Failed(reason) => {
                log::warn!("Failed to load image {}: {}", src, reason);
                (record(ResourceStatus::Failed(reason)), None)
            }
        }
    }
}

fn read_local(path: &Path, max_bytes: u64) -> FetchOutcome {
    let size = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(err) => return FetchOutcome::Failed(err.to_string()),
    };
    if size > max_bytes {
        return FetchOutcome::TooLarge(size);
    }
    match fs::read(path) {
        Ok(bytes) => FetchOutcome::Bytes(bytes),
        Err(err) => FetchOutcome::Failed(err.to_string()),
    }
}

#[cfg(feature = "remote-images")]
fn fetch_remote(url: &str, max_bytes: u64, timeout: Duration) -> FetchOutcome {
    use std::io::Read;

    let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(err) => return FetchOutcome::Failed(err.to_string()),
    };
    let response = match client.get(url).send().and_then(|r| r.error_for_status()) {
        Ok(response) => response,
        Err(err) => return FetchOutcome::Failed(err.to_string()),
    };
    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return FetchOutcome::TooLarge(len);
        }
    }

    let mut bytes = Vec::new();
    // Read one byte past the limit to detect oversized bodies without a length
    if let Err(err) = response.take(max_bytes + 1).read_to_end(&mut bytes) {
        return FetchOutcome::Failed(err.to_string());
    }
    if bytes.len() as u64 > max_bytes {
        return FetchOutcome::TooLarge(bytes.len() as u64);
    }
    FetchOutcome::Bytes(bytes)
}

#[cfg(not(feature = "remote-images"))]
fn fetch_remote(_url: &str, _max_bytes: u64, _timeout: Duration) -> FetchOutcome {
    FetchOutcome::Failed("built without remote image support".to_string())
}

/// Sniff the MIME type of image bytes
fn mime_type(bytes: &[u8]) -> Option<&'static str> {
    if let Ok(format) = image::guess_format(bytes) {
        return Some(format.to_mime_type());
    }

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    let head = head.trim_start();
    if head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg")) {
        return Some("image/svg+xml");
    }
    None
}
