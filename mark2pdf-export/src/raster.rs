//! HTML-to-bitmap rasterizers

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbaImage;
use mark2pdf_core::config::{Config, RasterConfig};
use mark2pdf_core::SecurityEvent;

use crate::error::RasterError;
use crate::snapshot::Snapshot;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest stderr excerpt carried in an error
const STDERR_LIMIT: usize = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterOptions {
    /// Oversampling factor
    pub scale: f32,
    pub width_px: u32,
    pub timeout: Duration,
}

impl RasterOptions {
    pub fn from_config(config: &RasterConfig) -> Self {
        Self {
            scale: config.scale,
            width_px: config.host_width_px,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self::from_config(&RasterConfig::default())
    }
}

/// Turns a snapshot into pixels
pub trait Rasterizer {
    fn rasterize(&self, snapshot: &Snapshot, options: &RasterOptions)
        -> Result<RgbaImage, RasterError>;
}

impl<R: Rasterizer + ?Sized> Rasterizer for Box<R> {
    fn rasterize(
        &self,
        snapshot: &Snapshot,
        options: &RasterOptions,
    ) -> Result<RgbaImage, RasterError> {
        (**self).rasterize(snapshot, options)
    }
}

/// Runs an external HTML-to-image tool on a temp copy of the snapshot
#[derive(Debug, Clone)]
pub struct CommandRasterizer {
    command: String,
    args: Vec<String>,
    no_exec: bool,
    events: Vec<SecurityEvent>,
}

impl CommandRasterizer {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            no_exec: false,
            events: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let command = resolve_command(&config.raster.command);
        let mut events = Vec::new();
        if let Some(var) = config.raster.command.strip_prefix('$') {
            if std::env::var_os(var).is_some() {
                events.push(SecurityEvent::command_from_env(var, &command));
            }
        }

        Self {
            command,
            args: config.raster.args.clone(),
            no_exec: config.security.no_exec,
            events,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// How the command was chosen, for the user to review
    pub fn security_events(&self) -> &[SecurityEvent] {
        &self.events
    }
}

impl Rasterizer for CommandRasterizer {
    fn rasterize(
        &self,
        snapshot: &Snapshot,
        options: &RasterOptions,
    ) -> Result<RgbaImage, RasterError> {
        if self.no_exec {
            SecurityEvent::exec_blocked(&self.command).log();
            return Err(RasterError::ExecDisabled);
        }

        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("snapshot.html");
        let output = workdir.path().join("capture.png");
        let stderr_path = workdir.path().join("stderr.log");
        fs::write(&input, &snapshot.html)?;

        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| expand_template(arg, &input, &output, options))
            .collect();

        log::debug!("Running rasterizer: {} {}", self.command, args.join(" "));

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(File::create(&stderr_path)?)
            .spawn()
            .map_err(|source| RasterError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let deadline = Instant::now() + options.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                // The process may have exited between the checks
                let _ = child.kill();
                let _ = child.wait();
                return Err(RasterError::TimedOut {
                    command: self.command.clone(),
                    secs: options.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();
            let mut stderr = stderr.trim().to_string();
            if stderr.len() > STDERR_LIMIT {
                let mut cut = STDERR_LIMIT;
                while !stderr.is_char_boundary(cut) {
                    cut -= 1;
                }
                stderr.truncate(cut);
            }
            return Err(RasterError::Failed {
                command: self.command.clone(),
                status: status.to_string(),
                stderr,
            });
        }

        Ok(image::open(&output)?.to_rgba8())
    }
}

/// Loads a bitmap captured ahead of time
#[derive(Debug, Clone)]
pub struct ImageFileRasterizer {
    path: PathBuf,
}

impl ImageFileRasterizer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Rasterizer for ImageFileRasterizer {
    fn rasterize(&self, _: &Snapshot, _: &RasterOptions) -> Result<RgbaImage, RasterError> {
        log::debug!("Loading pre-captured raster {}", self.path.display());
        Ok(image::open(&self.path)?.to_rgba8())
    }
}

/// Hands out a fixed in-memory bitmap
#[derive(Debug, Clone)]
pub struct BitmapRasterizer(pub RgbaImage);

impl Rasterizer for BitmapRasterizer {
    fn rasterize(&self, _: &Snapshot, _: &RasterOptions) -> Result<RgbaImage, RasterError> {
        Ok(self.0.clone())
    }
}

/// Resolve `$VAR` commands from the environment, falling back to the default tool
pub fn resolve_command(config_command: &str) -> String {
    match config_command.strip_prefix('$') {
        Some(var) => std::env::var(var).unwrap_or_else(|_| RasterConfig::default().command),
        None => config_command.to_string(),
    }
}

/// Expand template variables in rasterizer arguments
pub fn expand_template(
    template: &str,
    input: &Path,
    output: &Path,
    options: &RasterOptions,
) -> String {
    template
        .replace("{input}", &input.to_string_lossy())
        .replace("{output}", &output.to_string_lossy())
        .replace("{width}", &options.width_px.to_string())
        .replace("{scale}", &options.scale.to_string())
}
