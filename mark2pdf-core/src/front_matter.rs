//! Front matter detection and metadata extraction.

use std::fmt;

/// Front matter formats mark2pdf recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontMatterKind {
    Yaml,
    Toml,
}

impl FrontMatterKind {
    fn as_str(&self) -> &'static str {
        match self {
            FrontMatterKind::Yaml => "yaml",
            FrontMatterKind::Toml => "toml",
        }
    }

    fn marker(&self) -> &'static str {
        match self {
            FrontMatterKind::Yaml => "---",
            FrontMatterKind::Toml => "+++",
        }
    }
}

impl fmt::Display for FrontMatterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected front matter block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub kind: FrontMatterKind,
    /// Raw content between the markers
    pub raw: String,
    /// Byte offset where the Markdown body starts
    pub body_start: usize,
    pub title: Option<String>,
}

/// Split leading front matter from the Markdown body.
///
/// A block without a closing marker is not front matter; the whole input is
/// returned as the body.
pub fn split_front_matter(text: &str) -> (Option<FrontMatter>, &str) {
    let mut lines = LineCursor::new(text);
    let Some((first, _)) = lines.next() else {
        return (None, text);
    };

    let first = first.trim().trim_start_matches('\u{feff}');
    let kind = match first {
        "---" => FrontMatterKind::Yaml,
        "+++" => FrontMatterKind::Toml,
        _ => return (None, text),
    };

    let raw_start = lines.offset;
    while let Some((line, line_start)) = lines.next() {
        if line.trim() == kind.marker() {
            let raw = text[raw_start..line_start].to_string();
            let title = parse_title(kind, &raw);
            let body_start = lines.offset;
            return (
                Some(FrontMatter {
                    kind,
                    raw,
                    body_start,
                    title,
                }),
                &text[body_start..],
            );
        }
    }

    (None, text)
}

fn parse_title(kind: FrontMatterKind, raw: &str) -> Option<String> {
    let title = match kind {
        FrontMatterKind::Yaml => serde_yaml::from_str::<serde_yaml::Value>(raw)
            .ok()?
            .get("title")?
            .as_str()
            .map(str::to_string),
        FrontMatterKind::Toml => toml::from_str::<toml::Table>(raw)
            .ok()?
            .get("title")?
            .as_str()
            .map(str::to_string),
    };

    if title.is_none() {
        log::debug!("{kind} front matter has no string title");
    }
    title.filter(|t| !t.trim().is_empty())
}

/// Iterates lines together with their starting byte offset.
struct LineCursor<'a> {
    text: &'a str,
    offset: usize,
}

impl<'a> LineCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, offset: 0 }
    }

    fn next(&mut self) -> Option<(&'a str, usize)> {
        if self.offset >= self.text.len() {
            return None;
        }
        let start = self.offset;
        let rest = &self.text[start..];
        let (line, advance) = match rest.find('\n') {
            Some(idx) => (&rest[..idx], idx + 1),
            None => (rest, rest.len()),
        };
        self.offset += advance;
        Some((line.trim_end_matches('\r'), start))
    }
}
