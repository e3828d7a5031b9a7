//! Markdown+Math renderer

use crate::config::Config;
use crate::doc::Document;
use crate::markdown::{self, MarkdownOptions};
use crate::math::{self, KatexTypesetter, MathMode, MathSpan, Typesetter};

/// First placeholder pair tried; later pairs follow in the private use area
const TOKEN_OPEN: char = '\u{E000}';
const TOKEN_CLOSE: char = '\u{E001}';
const PRIVATE_USE_END: u32 = 0xF8FF;

/// HTML derived from a document revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMarkup {
    pub html: String,
    /// Revision of the document this was rendered from
    pub rev: u64,
    pub math_spans: usize,
    /// Spans that were replaced by an error marker
    pub math_errors: usize,
}

impl RenderedMarkup {
    pub fn is_empty(&self) -> bool {
        self.html.trim().is_empty()
    }
}

/// Turns Markdown with LaTeX spans into HTML.
///
/// Stateless: the same input always produces the same output.
pub struct Renderer<T = KatexTypesetter> {
    options: MarkdownOptions,
    typesetter: Option<T>,
}

impl Renderer<KatexTypesetter> {
    pub fn new(config: &Config) -> Self {
        let typesetter = config
            .math
            .enabled
            .then(|| KatexTypesetter::new(config.math.trust));
        Self {
            options: MarkdownOptions::from(&config.markdown),
            typesetter,
        }
    }
}

impl Default for Renderer<KatexTypesetter> {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl<T: Typesetter> Renderer<T> {
    pub fn with_typesetter(options: MarkdownOptions, typesetter: T) -> Self {
        Self {
            options,
            typesetter: Some(typesetter),
        }
    }

    /// Render without math processing
    pub fn markdown_only(options: MarkdownOptions) -> Self {
        Self {
            options,
            typesetter: None,
        }
    }

    /// Render the document body (front matter stripped)
    pub fn render_document(&self, doc: &Document) -> RenderedMarkup {
        let (_, body) = doc.split();
        let mut markup = self.render(body);
        markup.rev = doc.rev;
        markup
    }

    /// Render Markdown source to HTML
    pub fn render(&self, source: &str) -> RenderedMarkup {
        let Some(typesetter) = &self.typesetter else {
            return RenderedMarkup {
                html: markdown::to_html(source, &self.options),
                rev: 0,
                math_spans: 0,
                math_errors: 0,
            };
        };

        let protected = markdown::code_ranges(source, &self.options);
        let spans = math::find_math_spans(source, &protected);
        if spans.is_empty() {
            return RenderedMarkup {
                html: markdown::to_html(source, &self.options),
                rev: 0,
                math_spans: 0,
                math_errors: 0,
            };
        }

        let inline_starts = markdown::inline_starts(source, &self.options);
        let sentinel = Sentinel::for_source(source);
        let masked = sentinel.mask(source, &spans);
        let html = markdown::to_html(&masked, &self.options);

        let mut errors = 0;
        let html = sentinel.substitute(&html, |idx, in_tag| {
            let span = spans.get(idx)?;
            if in_tag {
                return Some(math::escape_html(&source[span.range.clone()]));
            }
            let latex = math::span_latex(source, span, &inline_starts);
            Some(match typesetter.typeset(&latex, span.mode) {
                Ok(rendered) => rendered,
                Err(err) => {
                    errors += 1;
                    log::warn!("Failed to typeset {} math `{}`: {}", mode_name(span.mode), latex, err);
                    math::error_marker(&latex, &err)
                }
            })
        });

        log::debug!("Rendered {} math spans ({} failed)", spans.len(), errors);

        RenderedMarkup {
            html,
            rev: 0,
            math_spans: spans.len(),
            math_errors: errors,
        }
    }
}

fn mode_name(mode: MathMode) -> &'static str {
    match mode {
        MathMode::Inline => "inline",
        MathMode::Display => "display",
    }
}

/// Placeholder delimiters for one render.
///
/// The opener never occurs in the source, literally or as a numeric
/// character reference, so every opener in the rendered HTML is one of ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sentinel {
    open: char,
    close: char,
}

impl Default for Sentinel {
    fn default() -> Self {
        Self {
            open: TOKEN_OPEN,
            close: TOKEN_CLOSE,
        }
    }
}

impl Sentinel {
    fn for_source(source: &str) -> Self {
        let referenced = char_references(source);
        (TOKEN_OPEN as u32..PRIVATE_USE_END)
            .step_by(2)
            .filter_map(|cp| Some((char::from_u32(cp)?, char::from_u32(cp + 1)?)))
            .find(|(open, _)| !source.contains(*open) && !referenced.contains(open))
            .map(|(open, close)| Self { open, close })
            .unwrap_or_default()
    }

    /// Replace each span with a placeholder token the Markdown parser leaves alone
    fn mask(&self, source: &str, spans: &[MathSpan]) -> String {
        let mut masked = String::with_capacity(source.len());
        let mut cursor = 0;
        for (idx, span) in spans.iter().enumerate() {
            masked.push_str(&source[cursor..span.range.start]);
            masked.push(self.open);
            masked.push_str(&idx.to_string());
            masked.push(self.close);
            cursor = span.range.end;
        }
        masked.push_str(&source[cursor..]);
        masked
    }

    /// Swap tokens in `html` for `replace(index, inside_tag)`.
    ///
    /// Text that only looks like a token is copied through unchanged.
    fn substitute<F>(&self, html: &str, mut replace: F) -> String
    where
        F: FnMut(usize, bool) -> Option<String>,
    {
        let mut out = String::with_capacity(html.len() * 2);
        let mut in_tag = false;
        let mut rest = html;

        while let Some(c) = rest.chars().next() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                c if c == self.open => {
                    let body = &rest[c.len_utf8()..];
                    if let Some(end) = body.find(self.close) {
                        if let Ok(idx) = body[..end].parse::<usize>() {
                            if let Some(rendered) = replace(idx, in_tag) {
                                out.push_str(&rendered);
                                rest = &body[end + self.close.len_utf8()..];
                                continue;
                            }
                        }
                    }
                }
                _ => {}
            }
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }

        out
    }
}

/// Characters written as `&#NNN;` or `&#xHHH;` in the source
fn char_references(source: &str) -> Vec<char> {
    let mut chars = Vec::new();
    let mut rest = source;
    while let Some(pos) = rest.find("&#") {
        rest = &rest[pos + 2..];
        let (radix, digits) = match rest.strip_prefix(|c: char| c == 'x' || c == 'X') {
            Some(hex) => (16, hex),
            None => (10, rest),
        };
        let len = digits
            .find(|c: char| !c.is_digit(radix))
            .unwrap_or(digits.len());
        if let Some(c) = u32::from_str_radix(&digits[..len], radix)
            .ok()
            .and_then(char::from_u32)
        {
            chars.push(c);
        }
    }
    chars
}
