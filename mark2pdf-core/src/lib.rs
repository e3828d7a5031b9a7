//! Mark2PDF Core - Document model, Markdown+Math rendering, and configuration
//!
//! This crate contains the export-independent logic of mark2pdf:
//! - Document model and front matter handling
//! - Markdown rendering (pulldown-cmark, GFM extensions)
//! - LaTeX span detection and KaTeX typesetting
//! - Image source resolution under a security policy
//! - Configuration management

pub mod config;
pub mod doc;
pub mod front_matter;
pub mod image;
pub mod markdown;
pub mod math;
pub mod render;
pub mod security;

// Re-export commonly used types
pub use config::Config;
pub use doc::Document;
pub use render::{RenderedMarkup, Renderer};
pub use security::SecurityEvent;
