//! Image references found in rendered markup

use std::fmt;
use std::path::{Path, PathBuf};

/// An `<img>` reference in the rendered document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNode {
    /// Image source as written (path, URL or data URI)
    pub src: String,
    pub alt: String,
}

/// Where an image's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Local file path (absolute, canonical)
    Local(PathBuf),
    /// Remote URL
    Remote(String),
    /// Already inline; nothing to load
    Inline,
}

/// Policy knobs for resolving image sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePolicy {
    pub allow_absolute: bool,
    pub allow_remote: bool,
}

/// Why the policy turned a source down without touching the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    RemoteDisabled,
    AbsoluteDisabled,
    Traversal,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Refusal::RemoteDisabled => "remote images are disabled",
            Refusal::AbsoluteDisabled => "absolute paths are disabled",
            Refusal::Traversal => "path leaves the document directory",
        })
    }
}

impl ImagePolicy {
    pub fn permissive() -> Self {
        Self {
            allow_absolute: true,
            allow_remote: true,
        }
    }

    /// The rule `src` breaks, if any
    pub fn refusal(&self, src: &str) -> Option<Refusal> {
        if src.starts_with("data:") {
            return None;
        }
        if is_remote(src) {
            return (!self.allow_remote).then_some(Refusal::RemoteDisabled);
        }

        let path = src.strip_prefix("file://").unwrap_or(src);
        if path.contains("..") {
            return Some(Refusal::Traversal);
        }
        if Path::new(path).is_absolute() && !self.allow_absolute {
            return Some(Refusal::AbsoluteDisabled);
        }
        None
    }
}

fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

impl ImageNode {
    pub fn new(src: impl Into<String>, alt: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            alt: alt.into(),
        }
    }

    /// Resolve the source against the document directory under `policy`.
    ///
    /// Returns `None` when the policy refuses the source or a local file does
    /// not exist.
    pub fn resolve(&self, base_dir: Option<&Path>, policy: ImagePolicy) -> Option<ImageSource> {
        if self.src.starts_with("data:") {
            return Some(ImageSource::Inline);
        }
        if policy.refusal(&self.src).is_some() {
            return None;
        }
        if is_remote(&self.src) {
            return Some(ImageSource::Remote(self.src.clone()));
        }

        let src_path = Path::new(self.src.strip_prefix("file://").unwrap_or(&self.src));
        if src_path.is_absolute() {
            return src_path.canonicalize().ok().map(ImageSource::Local);
        }

        let base_dir = base_dir?;
        let canonical = base_dir.join(src_path).canonicalize().ok()?;

        if !policy.allow_absolute {
            let canonical_base = base_dir.canonicalize().ok()?;
            if !canonical.starts_with(canonical_base) {
                return None;
            }
        }

        Some(ImageSource::Local(canonical))
    }
}
