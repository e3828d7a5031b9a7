//! LaTeX span detection and typesetting
//!
//! Spans are located on the Markdown source, outside code:
//!
//! - `$$...$$` is display math. It may span lines but not a blank line.
//! - `$...$` is inline math on a single line. The opener must not be followed
//!   by whitespace; the closer must not be preceded by whitespace nor followed
//!   by a digit, so `$5 and $10` stays literal.
//! - A `$` preceded by an unescaped backslash is never a delimiter.
//! - A run of three or more `$` is literal.
//!
//! Display math inside a blockquote or list item carries the container's
//! line prefixes in the source; [`span_latex`] removes them.

use std::borrow::Cow;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathMode {
    Inline,
    Display,
}

/// A located math span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathSpan {
    pub mode: MathMode,
    /// Whole span including delimiters
    pub range: Range<usize>,
    /// LaTeX between the delimiters
    pub latex: Range<usize>,
}

#[derive(Debug, Error)]
pub enum MathError {
    #[error("invalid typesetting options: {0}")]
    Options(String),
    #[error("{message}")]
    Typeset { message: String },
}

/// A math typesetting engine
pub trait Typesetter {
    /// Typeset `latex` to HTML
    fn typeset(&self, latex: &str, mode: MathMode) -> Result<String, MathError>;
}

/// KaTeX running in an embedded JS engine
#[derive(Debug, Clone, Default)]
pub struct KatexTypesetter {
    trust: bool,
}

impl KatexTypesetter {
    pub fn new(trust: bool) -> Self {
        Self { trust }
    }
}

impl Typesetter for KatexTypesetter {
    fn typeset(&self, latex: &str, mode: MathMode) -> Result<String, MathError> {
        let opts = katex::Opts::builder()
            .display_mode(mode == MathMode::Display)
            .throw_on_error(true)
            .trust(self.trust)
            .build()
            .map_err(|err| MathError::Options(err.to_string()))?;

        katex::render_with_opts(latex, &opts).map_err(|err| MathError::Typeset {
            message: err.to_string(),
        })
    }
}

/// Visible marker that replaces a span KaTeX rejected
pub fn error_marker(latex: &str, error: &MathError) -> String {
    format!(
        r#"<span class="math-error" title="{}">Error rendering: {}</span>"#,
        escape_html(&error.to_string()),
        escape_html(latex)
    )
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Find math spans in `source`, skipping `protected` ranges (sorted by start)
pub fn find_math_spans(source: &str, protected: &[Range<usize>]) -> Vec<MathSpan> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let guard = Protected::new(protected);
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = guard.skip_to(i) {
            i = end;
            continue;
        }
        if bytes[i] != b'$' || is_escaped(bytes, i) {
            i += 1;
            continue;
        }

        let run = dollar_run(bytes, i);
        match run {
            1 => match inline_close(bytes, i + 1, &guard) {
                Some(close) => {
                    spans.push(MathSpan {
                        mode: MathMode::Inline,
                        range: i..close + 1,
                        latex: i + 1..close,
                    });
                    i = close + 1;
                }
                None => i += 1,
            },
            2 => match display_close(bytes, i + 2) {
                Some(close) => {
                    spans.push(MathSpan {
                        mode: MathMode::Display,
                        range: i..close + 2,
                        latex: i + 2..close,
                    });
                    i = close + 2;
                }
                None => i += 2,
            },
            _ => i += run,
        }
    }

    spans
}

/// The LaTeX of `span` with container prefixes (`>` and indentation) removed
/// from its continuation lines.
///
/// `inline_starts` comes from [`crate::markdown::inline_starts`]; only the
/// part of a line before its first inline content can be stripped.
pub fn span_latex<'a>(source: &'a str, span: &MathSpan, inline_starts: &[usize]) -> Cow<'a, str> {
    let latex = &source[span.latex.clone()];
    if !latex.contains('\n') {
        return Cow::Borrowed(latex);
    }

    let mut out = String::with_capacity(latex.len());
    let mut line_start = span.latex.start;
    for (n, line) in latex.split_inclusive('\n').enumerate() {
        let line_end = line_start + line.len();
        if n == 0 {
            out.push_str(line);
        } else {
            let idx = inline_starts.partition_point(|&s| s < line_start);
            let content = inline_starts.get(idx).map_or(line_end, |&s| s.min(line_end));
            let prefix = line.as_bytes()[..content - line_start]
                .iter()
                .take_while(|b| matches!(b, b' ' | b'\t' | b'>'))
                .count();
            out.push_str(&line[prefix..]);
        }
        line_start = line_end;
    }

    Cow::Owned(out)
}

/// Walks the protected ranges alongside the scanner
struct Protected<'a> {
    ranges: &'a [Range<usize>],
    next: std::cell::Cell<usize>,
}

impl<'a> Protected<'a> {
    fn new(ranges: &'a [Range<usize>]) -> Self {
        Self {
            ranges,
            next: std::cell::Cell::new(0),
        }
    }

    /// If `pos` is inside a protected range, return where that range ends
    fn skip_to(&self, pos: usize) -> Option<usize> {
        let mut idx = self.next.get();
        while idx < self.ranges.len() && self.ranges[idx].end <= pos {
            idx += 1;
        }
        self.next.set(idx);
        self.ranges
            .get(idx)
            .filter(|r| r.start <= pos)
            .map(|r| r.end)
    }

    /// Whether any protected range starts inside `start..end`
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.ranges[self.next.get()..]
            .iter()
            .take_while(|r| r.start < end)
            .any(|r| r.end > start)
    }
}

fn is_escaped(bytes: &[u8], pos: usize) -> bool {
    let backslashes = bytes[..pos].iter().rev().take_while(|&&b| b == b'\\').count();
    backslashes % 2 == 1
}

fn dollar_run(bytes: &[u8], pos: usize) -> usize {
    bytes[pos..].iter().take_while(|&&b| b == b'$').count()
}

fn inline_close(bytes: &[u8], start: usize, guard: &Protected<'_>) -> Option<usize> {
    let first = *bytes.get(start)?;
    if first.is_ascii_whitespace() {
        return None;
    }

    let mut j = start;
    while j < bytes.len() {
        match bytes[j] {
            b'\n' => return None,
            b'$' if !is_escaped(bytes, j) => {
                if dollar_run(bytes, j) > 1 {
                    return None;
                }
                let after_digit = bytes.get(j + 1).is_some_and(u8::is_ascii_digit);
                if !bytes[j - 1].is_ascii_whitespace() && !after_digit {
                    if guard.overlaps(start, j) {
                        return None;
                    }
                    return Some(j);
                }
            }
            _ => {}
        }
        j += 1;
    }

    None
}

fn display_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut j = start;
    while j < bytes.len() {
        match bytes[j] {
            b'\n' if next_line_is_blank(bytes, j + 1) => return None,
            b'$' if !is_escaped(bytes, j) => {
                let run = dollar_run(bytes, j);
                if run >= 2 {
                    let blank = bytes[start..j].iter().all(u8::is_ascii_whitespace);
                    return (!blank).then_some(j);
                }
                j += run;
                continue;
            }
            _ => {}
        }
        j += 1;
    }

    None
}

fn next_line_is_blank(bytes: &[u8], from: usize) -> bool {
    bytes[from..]
        .iter()
        .take_while(|&&b| b != b'\n')
        .all(|b| b.is_ascii_whitespace())
        && bytes[from..].contains(&b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(source: &str) -> Vec<(MathMode, &str)> {
        find_math_spans(source, &[])
            .into_iter()
            .map(|s| (s.mode, &source[s.latex]))
            .collect()
    }

    #[test]
    fn test_inline_span() {
        assert_eq!(spans("Area is $x^2$."), vec![(MathMode::Inline, "x^2")]);
    }

    #[test]
    fn test_display_span_across_lines() {
        assert_eq!(
            spans("$$\n\\int_0^1 x\\,dx\n$$"),
            vec![(MathMode::Display, "\n\\int_0^1 x\\,dx\n")]
        );
    }

    #[test]
    fn test_display_not_split_into_inline() {
        let found = spans("before $$a + b$$ after $c$");
        assert_eq!(
            found,
            vec![(MathMode::Display, "a + b"), (MathMode::Inline, "c")]
        );
    }

    #[test]
    fn test_escaped_dollar_is_literal() {
        assert!(spans(r"Price: \$5 and \$10").is_empty());
        assert!(spans(r"\$100").is_empty());
    }

    #[test]
    fn test_double_backslash_does_not_escape() {
        assert_eq!(spans(r"\\$x$"), vec![(MathMode::Inline, "x")]);
    }

    #[test]
    fn test_currency_is_literal() {
        assert!(spans("It costs $5 and $10 today").is_empty());
        assert!(spans("between $ 3 and 4 $").is_empty());
    }

    #[test]
    fn test_three_dollars_are_literal() {
        assert!(spans("$$$x$$$").is_empty());
        assert!(spans("cost $$$").is_empty());
    }

    #[test]
    fn test_multiple_inline_on_one_line() {
        assert_eq!(
            spans("$a$, $b$ and $c$"),
            vec![
                (MathMode::Inline, "a"),
                (MathMode::Inline, "b"),
                (MathMode::Inline, "c")
            ]
        );
    }

    #[test]
    fn test_inline_does_not_cross_lines() {
        assert!(spans("$a\nb$").is_empty());
    }

    #[test]
    fn test_display_stops_at_blank_line() {
        assert!(spans("$$ a\n\nb $$").is_empty());
    }

    #[test]
    fn test_empty_display_is_literal() {
        assert!(spans("$$  $$").is_empty());
    }

    #[test]
    fn test_protected_ranges_are_skipped() {
        let source = "`$x$` and $y$";
        let protected = vec![0..5];
        let found: Vec<_> = find_math_spans(source, &protected)
            .into_iter()
            .map(|s| &source[s.latex])
            .collect();
        assert_eq!(found, vec!["y"]);
    }

    #[test]
    fn test_inline_cannot_swallow_code() {
        let source = "$a `b` c$";
        let protected = vec![3..6];
        assert!(find_math_spans(source, &protected).is_empty());
    }

    fn stripped(source: &str) -> Vec<String> {
        let starts = crate::markdown::inline_starts(source, &Default::default());
        find_math_spans(source, &[])
            .iter()
            .map(|span| span_latex(source, span, &starts).into_owned())
            .collect()
    }

    #[test]
    fn test_blockquote_prefixes_removed_from_display_math() {
        assert_eq!(stripped("> $$\n> a+b\n> $$\n"), vec!["\na+b\n"]);
        assert_eq!(stripped("> > $$\n> > x > 0\n> > $$\n"), vec!["\nx > 0\n"]);
    }

    #[test]
    fn test_list_indentation_removed_from_display_math() {
        assert_eq!(stripped("- item\n\n  $$\n  a+b\n  $$\n"), vec!["\na+b\n"]);
    }

    #[test]
    fn test_single_line_latex_is_borrowed() {
        let source = "> $$a > b$$";
        let span = &find_math_spans(source, &[])[0];
        assert!(matches!(span_latex(source, span, &[2]), Cow::Borrowed("a > b")));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b & \"c\""), "a &lt; b &amp; &quot;c&quot;");
    }

    #[test]
    fn test_error_marker_contains_source() {
        let err = MathError::Typeset {
            message: "Undefined control sequence".to_string(),
        };
        let marker = error_marker(r"\frac{1}{<", &err);
        assert!(marker.contains("math-error"));
        assert!(marker.contains(r"\frac{1}{&lt;"));
    }

    #[test]
    fn test_katex_inline() {
        let html = KatexTypesetter::default()
            .typeset("x^2", MathMode::Inline)
            .unwrap();
        assert!(html.contains("katex"));
        assert!(!html.contains("katex-display"));
    }

    #[test]
    fn test_katex_display() {
        let html = KatexTypesetter::default()
            .typeset(r"\frac{a}{b}", MathMode::Display)
            .unwrap();
        assert!(html.contains("katex-display"));
    }

    #[test]
    fn test_katex_rejects_malformed() {
        let result = KatexTypesetter::default().typeset(r"\frac{1}{", MathMode::Display);
        assert!(result.is_err());
    }
}
