//! Policy decisions worth telling the user about
//!
//! Config loading, image loading and the external rasterizer each raise
//! events when a security setting changes what an export will do.

use std::fmt;

use crate::image::Refusal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityEventLevel {
    Info,
    Warning,
    Error,
}

/// Subsystem that made the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Config,
    Images,
    Raster,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventSource::Config => "config",
            EventSource::Images => "images",
            EventSource::Raster => "raster",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityEvent {
    pub level: SecurityEventLevel,
    pub source: EventSource,
    pub message: String,
}

impl SecurityEvent {
    fn new(level: SecurityEventLevel, source: EventSource, message: String) -> Self {
        Self {
            level,
            source,
            message,
        }
    }

    /// Safe mode is active; `origin` names the config it came from
    pub fn safe_mode(origin: &str) -> Self {
        Self::new(
            SecurityEventLevel::Info,
            EventSource::Config,
            format!("Safe mode enabled ({origin})"),
        )
    }

    /// Safe mode replaced a permissive image setting
    pub fn safe_mode_override(settings: &[&str]) -> Self {
        Self::new(
            SecurityEventLevel::Warning,
            EventSource::Config,
            format!("Safe mode overrides {}", settings.join(" and ")),
        )
    }

    pub fn exec_disabled(origin: &str) -> Self {
        Self::new(
            SecurityEventLevel::Info,
            EventSource::Config,
            format!("External rasterizer execution disabled ({origin})"),
        )
    }

    /// An image source the policy would not load
    pub fn image_refused(src: &str, refusal: Refusal) -> Self {
        Self::new(
            SecurityEventLevel::Warning,
            EventSource::Images,
            format!("Refused image {src}: {refusal}"),
        )
    }

    /// Loads from earlier exports are still blocked; new ones are not started
    pub fn image_loads_stalled(src: &str, stalled: usize) -> Self {
        Self::new(
            SecurityEventLevel::Warning,
            EventSource::Images,
            format!("Skipped image {src}: {stalled} earlier loads have not finished"),
        )
    }

    /// The rasterizer command was taken from an environment variable
    pub fn command_from_env(var: &str, command: &str) -> Self {
        Self::new(
            SecurityEventLevel::Info,
            EventSource::Raster,
            format!("Rasterizer command `{command}` taken from ${var}"),
        )
    }

    /// An export tried to run the rasterizer while execution is disabled
    pub fn exec_blocked(command: &str) -> Self {
        Self::new(
            SecurityEventLevel::Error,
            EventSource::Raster,
            format!("Blocked running `{command}` (security.no_exec)"),
        )
    }

    /// Forward the event to the `log` facade at the matching level
    pub fn log(&self) {
        match self.level {
            SecurityEventLevel::Info => log::info!("{self}"),
            SecurityEventLevel::Warning => log::warn!("{self}"),
            SecurityEventLevel::Error => log::error!("{self}"),
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source, self.message)
    }
}
