//! Markdown to HTML via pulldown-cmark

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use std::ops::Range;

use crate::config::MarkdownConfig;

/// Parser switches, derived from [`MarkdownConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkdownOptions {
    pub hard_breaks: bool,
    pub tables: bool,
    pub strikethrough: bool,
    pub tasklists: bool,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self::from(&MarkdownConfig::default())
    }
}

impl From<&MarkdownConfig> for MarkdownOptions {
    fn from(config: &MarkdownConfig) -> Self {
        Self {
            hard_breaks: config.hard_breaks,
            tables: config.tables,
            strikethrough: config.strikethrough,
            tasklists: config.tasklists,
        }
    }
}

impl MarkdownOptions {
    fn parser_options(&self) -> Options {
        let mut options = Options::empty();
        options.set(Options::ENABLE_TABLES, self.tables);
        options.set(Options::ENABLE_STRIKETHROUGH, self.strikethrough);
        options.set(Options::ENABLE_TASKLISTS, self.tasklists);
        options
    }
}

/// Render Markdown to an HTML fragment
pub fn to_html(source: &str, options: &MarkdownOptions) -> String {
    let hard_breaks = options.hard_breaks;
    let events = Parser::new_ext(source, options.parser_options()).map(|event| match event {
        Event::SoftBreak if hard_breaks => Event::HardBreak,
        other => other,
    });

    let mut html = String::with_capacity(source.len() + source.len() / 2);
    pulldown_cmark::html::push_html(&mut html, events);
    html
}

/// Byte ranges of code spans and code blocks, sorted by start.
///
/// Math delimiters inside these ranges are literal text.
pub fn code_ranges(source: &str, options: &MarkdownOptions) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Parser::new_ext(source, options.parser_options())
        .into_offset_iter()
        .filter_map(|(event, range)| match event {
            Event::Code(_) | Event::Start(Tag::CodeBlock(_)) => Some(range),
            _ => None,
        })
        .collect();

    ranges.sort_by_key(|r| r.start);
    ranges
}

/// Plain text of the first level-1 heading, ATX or setext
pub fn first_heading(source: &str) -> Option<String> {
    let mut events = Parser::new(source).skip_while(|event| {
        !matches!(
            event,
            Event::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            })
        )
    });
    events.next()?;

    let mut title = String::new();
    for event in events {
        match event {
            Event::End(TagEnd::Heading(_)) => break,
            Event::Text(text) | Event::Code(text) => title.push_str(&text),
            Event::SoftBreak | Event::HardBreak => title.push(' '),
            _ => {}
        }
    }

    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Start offsets of inline content, sorted.
///
/// On a line inside a blockquote or list item, the first of these marks
/// where the container's prefix (`> `, indentation) ends.
pub fn inline_starts(source: &str, options: &MarkdownOptions) -> Vec<usize> {
    let mut starts: Vec<usize> = Parser::new_ext(source, options.parser_options())
        .into_offset_iter()
        .filter_map(|(event, range)| match event {
            Event::Text(_) | Event::Code(_) | Event::InlineHtml(_) | Event::Html(_) => {
                Some(range.start)
            }
            Event::Start(
                Tag::Emphasis
                | Tag::Strong
                | Tag::Strikethrough
                | Tag::Link { .. }
                | Tag::Image { .. },
            ) => Some(range.start),
            _ => None,
        })
        .collect();

    starts.sort_unstable();
    starts
}
