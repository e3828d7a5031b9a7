//! Standalone HTML snapshots of the offscreen host
//!
//! A snapshot is what the rasterizer sees: the host's markup wrapped in a
//! complete document carrying only the stylesheets named by the policy, with
//! images inlined as data URIs. An image that could not be inlined gets an
//! empty `src` so the rasterizer never fetches it on its own; the original
//! value moves to `data-mark2pdf-src`.

use std::fs;

use anyhow::{Context, Result};
use mark2pdf_core::config::StyleConfig;
use mark2pdf_core::math::escape_html;
use mark2pdf_core::SecurityEvent;

use crate::error::ExportError;
use crate::host::OffscreenHost;
use crate::resources::{ResourceLoader, ResourceRecord, ResourceStatus};

/// Holds the original source of an image left out of the snapshot
pub const ORIGINAL_SRC_ATTR: &str = "data-mark2pdf-src";

/// Print stylesheet bundled into every snapshot unless disabled
pub const PRINT_CSS: &str = r#"
body { margin: 0; background: #ffffff; }
#printableArea {
  font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif;
  font-size: 16px;
  line-height: 1.5;
  color: #24292f;
  word-wrap: break-word;
}
#printableArea h1, #printableArea h2 { border-bottom: 1px solid #d0d7de; padding-bottom: .3em; }
#printableArea pre { background: #f6f8fa; padding: 16px; overflow: hidden; white-space: pre-wrap; }
#printableArea code { font-family: ui-monospace, Menlo, Consolas, monospace; font-size: 85%; }
#printableArea table { border-collapse: collapse; }
#printableArea th, #printableArea td { border: 1px solid #d0d7de; padding: 6px 13px; }
#printableArea blockquote { margin: 0; padding: 0 1em; color: #57606a; border-left: .25em solid #d0d7de; }
#printableArea img { max-width: 100%; }
#printableArea .katex-display { overflow: hidden; }
#printableArea .math-error { color: #cf222e; font-family: ui-monospace, monospace; }
"#;

/// A stylesheet the snapshot may carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSource {
    Link(String),
    Inline { name: String, css: String },
}

/// Everything a snapshot is allowed to copy besides the host markup
#[derive(Debug, Clone, Default)]
pub struct SnapshotPolicy {
    pub stylesheets: Vec<StyleSource>,
}

impl SnapshotPolicy {
    /// Build the stylesheet allow-list, reading local stylesheets from disk
    pub fn from_config(styles: &StyleConfig) -> Result<Self> {
        let mut stylesheets = Vec::new();

        let katex = styles.katex_css.trim();
        if katex.starts_with("http://") || katex.starts_with("https://") {
            stylesheets.push(StyleSource::Link(katex.to_string()));
        } else if !katex.is_empty() {
            let css = fs::read_to_string(katex)
                .with_context(|| format!("Failed to read KaTeX stylesheet: {}", katex))?;
            stylesheets.push(StyleSource::Inline {
                name: "katex".to_string(),
                css,
            });
        }

        if styles.print_css {
            stylesheets.push(StyleSource::Inline {
                name: "print".to_string(),
                css: PRINT_CSS.to_string(),
            });
        }

        if let Some(path) = &styles.extra_css {
            let css = fs::read_to_string(path)
                .with_context(|| format!("Failed to read stylesheet: {}", path.display()))?;
            stylesheets.push(StyleSource::Inline {
                name: "extra".to_string(),
                css,
            });
        }

        Ok(Self { stylesheets })
    }
}

/// A self-contained HTML document ready for rasterization
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub html: String,
    pub width_px: u32,
    pub padding_px: u32,
    /// Revision of the markup captured
    pub rev: u64,
    /// One entry per `<img>` encountered, in document order
    pub resources: Vec<ResourceRecord>,
    /// Policy decisions made while loading images
    pub security: Vec<SecurityEvent>,
}

/// Capture the host's current content as a standalone document
pub fn capture(
    host: &OffscreenHost,
    policy: &SnapshotPolicy,
    loader: &mut ResourceLoader,
) -> Result<Snapshot, ExportError> {
    let markup = host.content()?;
    let (body, resources) = inline_images(&markup.html, |src| loader.load(src, host.base_dir()));
    let security = loader.take_events();
    for event in &security {
        event.log();
    }

    let loaded = resources.iter().filter(|r| r.status.is_embedded()).count();
    log::debug!(
        "Captured snapshot of revision {} ({} of {} images embedded)",
        markup.rev,
        loaded,
        resources.len()
    );

    Ok(Snapshot {
        html: wrap_document(&body, policy, host.width_px(), host.padding_px()),
        width_px: host.width_px(),
        padding_px: host.padding_px(),
        rev: markup.rev,
        resources,
        security,
    })
}

fn wrap_document(body: &str, policy: &SnapshotPolicy, width_px: u32, padding_px: u32) -> String {
    let mut head = String::new();
    for style in &policy.stylesheets {
        match style {
            StyleSource::Link(href) => {
                head.push_str(&format!(
                    "<link rel=\"stylesheet\" href=\"{}\">\n",
                    escape_html(href)
                ));
            }
            StyleSource::Inline { name, css } => {
                head.push_str(&format!(
                    "<style data-source=\"{}\">{}</style>\n",
                    escape_html(name),
                    css.replace("</style", "<\\/style")
                ));
            }
        }
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n{head}\
         <style>#printableArea {{ width: {width_px}px; padding: {padding_px}px; \
         box-sizing: border-box; background: #ffffff; }}</style>\n\
         </head>\n<body>\n<div id=\"printableArea\">\n{body}</div>\n</body>\n</html>\n"
    )
}

/// Rewrite every `<img src>` through `load`, collecting one record per image
fn inline_images<F>(html: &str, mut load: F) -> (String, Vec<ResourceRecord>)
where
    F: FnMut(&str) -> (ResourceRecord, Option<String>),
{
    let mut out = String::with_capacity(html.len());
    let mut records = Vec::new();
    let mut rest = html;

    while let Some(tag_start) = rest.find("<img") {
        let Some(tag_len) = rest[tag_start..].find('>') else {
            break;
        };
        let tag = &rest[tag_start..tag_start + tag_len];

        out.push_str(&rest[..tag_start]);
        match src_attribute(tag) {
            Some((value_start, value_end)) => {
                let raw = &tag[value_start..value_end];
                let (record, data_uri) = load(&unescape_attr(raw));
                out.push_str(&tag[..value_start]);
                match (data_uri, &record.status) {
                    (Some(uri), _) => out.push_str(&uri),
                    (None, ResourceStatus::Inline) => out.push_str(raw),
                    (None, _) => {
                        out.push_str("\" ");
                        out.push_str(ORIGINAL_SRC_ATTR);
                        out.push_str("=\"");
                        out.push_str(raw);
                    }
                }
                out.push_str(&tag[value_end..]);
                records.push(record);
            }
            None => out.push_str(tag),
        }
        rest = &rest[tag_start + tag_len..];
    }
    out.push_str(rest);

    (out, records)
}

/// Byte range of the `src` attribute's value inside an `<img` tag
fn src_attribute(tag: &str) -> Option<(usize, usize)> {
    let start = tag.find(" src=\"")? + " src=\"".len();
    let len = tag[start..].find('"')?;
    Some((start, start + len))
}

fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
