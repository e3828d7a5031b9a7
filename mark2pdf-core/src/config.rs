//! Configuration management for mark2pdf

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::security::SecurityEvent;

/// File name offered for every exported document
pub const DEFAULT_FILE_NAME: &str = "mark2pdf_document.pdf";

/// Stylesheet linked into snapshots so KaTeX markup lays out correctly
pub const DEFAULT_KATEX_CSS: &str =
    "https://cdn.jsdelivr.net/npm/katex@0.16.9/dist/katex.min.css";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub page: PageConfig,
    pub markdown: MarkdownConfig,
    pub math: MathConfig,
    pub raster: RasterConfig,
    pub images: ImageConfig,
    pub styles: StyleConfig,
    pub security: SecurityConfig,
    pub output: OutputConfig,
    pub watch: WatchConfig,
}

/// Page size and margin, in PDF points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub width_pt: f64,
    pub height_pt: f64,
    pub margin_pt: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkdownConfig {
    /// Render soft line breaks as `<br />`
    pub hard_breaks: bool,
    pub tables: bool,
    pub strikethrough: bool,
    pub tasklists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MathConfig {
    pub enabled: bool,
    /// Allow KaTeX commands such as `\href` and `\includegraphics`
    pub trust: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// External HTML-to-image tool
    pub command: String,
    /// Arguments; `{input}`, `{output}`, `{width}` and `{scale}` are expanded
    pub args: Vec<String>,
    /// Oversampling factor applied by the rasterizer
    pub scale: f32,
    pub host_width_px: u32,
    pub host_padding_px: u32,
    pub timeout_secs: u64,
    /// Captures whose PNG encoding is smaller than this are treated as blank
    pub min_image_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    pub allow_absolute: bool,
    pub allow_remote: bool,
    pub max_bytes: u64,
    /// Bounded wait for each embedded image
    pub load_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// URL (linked) or local path (inlined) of the KaTeX stylesheet
    pub katex_css: String,
    /// Include the built-in print stylesheet in snapshots
    pub print_css: bool,
    /// Additional local stylesheet to inline
    pub extra_css: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Refuse remote and absolute image sources
    pub safe_mode: bool,
    /// Never spawn the external rasterizer command
    pub no_exec: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub file_name: String,
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

impl Default for PageConfig {
    fn default() -> Self {
        // A4 portrait
        Self {
            width_pt: 595.0,
            height_pt: 842.0,
            margin_pt: 40.0,
        }
    }
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            hard_breaks: true,
            tables: true,
            strikethrough: true,
            tasklists: true,
        }
    }
}

impl Default for MathConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust: false,
        }
    }
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            command: "wkhtmltoimage".to_string(),
            args: vec![
                "--quiet".to_string(),
                "--format".to_string(),
                "png".to_string(),
                "--width".to_string(),
                "{width}".to_string(),
                "--zoom".to_string(),
                "{scale}".to_string(),
                "{input}".to_string(),
                "{output}".to_string(),
            ],
            scale: 2.0,
            host_width_px: 794,
            host_padding_px: 40,
            timeout_secs: 60,
            min_image_bytes: 1024,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_absolute: false,
            allow_remote: false,
            max_bytes: 10 * 1024 * 1024,
            load_timeout_ms: 5_000,
        }
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            katex_css: DEFAULT_KATEX_CSS.to_string(),
            print_css: true,
            extra_css: None,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            safe_mode: true,
            no_exec: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_FILE_NAME.to_string(),
            directory: None,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}

impl Config {
    /// Get the platform-specific config file path
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "mark2pdf")
            .map(|proj_dirs| proj_dirs.config_dir().join("mark2pdf.toml"))
    }

    /// Load configuration from the platform path, falling back to defaults if missing
    pub fn load() -> Result<(Self, Vec<SecurityEvent>)> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                let mut config = Self::default();
                let events = config.apply_security("defaults");
                Ok((config, events))
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<(Self, Vec<SecurityEvent>)> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = std::fs::metadata(path)
                .with_context(|| format!("Failed to stat config file: {}", path.display()))?;
            if metadata.permissions().mode() & 0o002 != 0 {
                anyhow::bail!(
                    "Config file {} is world-writable (insecure permissions)",
                    path.display()
                );
            }
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        let events = config.apply_security(&path.display().to_string());
        Ok((config, events))
    }

    /// Enforce safe mode on the image policy and describe the active settings
    fn apply_security(&mut self, origin: &str) -> Vec<SecurityEvent> {
        let mut events = Vec::new();

        if self.security.safe_mode {
            let mut overridden = Vec::new();
            if self.images.allow_remote {
                overridden.push("images.allow_remote");
            }
            if self.images.allow_absolute {
                overridden.push("images.allow_absolute");
            }
            if !overridden.is_empty() {
                events.push(SecurityEvent::safe_mode_override(&overridden));
            }
            self.images.allow_remote = false;
            self.images.allow_absolute = false;
            events.push(SecurityEvent::safe_mode(origin));
        }
        if self.security.no_exec {
            events.push(SecurityEvent::exec_disabled(origin));
        }

        events
    }
}
