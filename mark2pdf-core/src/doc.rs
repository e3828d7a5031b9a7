//! Document model: the Markdown source being converted

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::front_matter::{self, FrontMatter};
use crate::markdown;

/// Markdown shown when no input file is given
pub const DEMO_MARKDOWN: &str = r#"# Mark2PDF Demo

This is a demonstration of **Mark2PDF**, a tool to convert Markdown to PDF.

## Features

- Supports standard Markdown syntax.
- Renders tables beautifully.
- Handles LaTeX math expressions.

### Example Table

| Feature         | Status      | Notes                       |
|-----------------|-------------|-----------------------------|
| Markdown        | Supported   | Basic & Extended Syntax     |
| Tables          | Supported   | Using GFM table syntax      |
| LaTeX Math      | Supported   | Inline & Display modes      |
| PDF Export      | Supported   | Run `mark2pdf export`       |

### LaTeX Math Examples

Inline math: $E = mc^2$

Display math:
$$
\int_0^\infty e^{-x^2} dx = \frac{\sqrt{\pi}}{2}
$$

Edit this file and export it again!
"#;

/// The document text plus the bookkeeping needed to re-render it
#[derive(Clone, Debug)]
pub struct Document {
    /// Source file, if the text came from disk
    pub path: Option<PathBuf>,
    text: String,
    /// Incremented every time the text is replaced
    pub rev: u64,
    pub loaded_mtime: Option<SystemTime>,
}

impl Document {
    /// Create an in-memory document
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            path: None,
            text: text.into(),
            rev: 1,
            loaded_mtime: None,
        }
    }

    /// The built-in demo document
    pub fn demo() -> Self {
        Self::from_text(DEMO_MARKDOWN)
    }

    /// Load a document from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let abs_path = path
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize path: {}", path.display()))?;

        let text = fs::read_to_string(&abs_path)
            .with_context(|| format!("Failed to read file: {}", abs_path.display()))?;

        let mtime = fs::metadata(&abs_path).and_then(|m| m.modified()).ok();

        Ok(Self {
            path: Some(abs_path),
            text,
            rev: 1,
            loaded_mtime: mtime,
        })
    }

    /// Reload the document from disk
    pub fn reload(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            anyhow::bail!("Document has no backing file to reload");
        };

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to reload file: {}", path.display()))?;
        self.loaded_mtime = fs::metadata(&path).and_then(|m| m.modified()).ok();
        self.set_text(text);

        Ok(())
    }

    /// Replace the text wholesale
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.rev += 1;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Directory that relative image paths resolve against
    pub fn base_dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    /// Front matter and the Markdown body that follows it
    pub fn split(&self) -> (Option<FrontMatter>, &str) {
        front_matter::split_front_matter(&self.text)
    }

    /// Title from front matter, falling back to the first level-1 heading
    pub fn title(&self) -> Option<String> {
        let (front_matter, body) = self.split();
        if let Some(title) = front_matter.and_then(|fm| fm.title) {
            return Some(title);
        }

        markdown::first_heading(body)
    }
}
