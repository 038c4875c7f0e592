//! Markdown to HTML for `.md` previews.
//!
//! Fenced code, tables and strikethrough come from pulldown-cmark. Headings
//! get slug ids, and a `[TOC]` line is replaced by a list of links to them.
//! Without the `markdown` feature every call reports [`MarkdownError::Unavailable`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarkdownError {
    #[error("markdown source is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
    #[error("markdown rendering is not compiled in")]
    Unavailable,
}

/// Whether this build can render markdown.
pub const fn available() -> bool {
    cfg!(feature = "markdown")
}

/// Renders raw file bytes. Non-UTF-8 input is a decode error.
pub fn render(source: Vec<u8>) -> Result<String, MarkdownError> {
    let text = String::from_utf8(source)?;
    render_str(&text)
}

#[cfg(not(feature = "markdown"))]
fn render_str(_text: &str) -> Result<String, MarkdownError> {
    Err(MarkdownError::Unavailable)
}

#[cfg(feature = "markdown")]
fn render_str(text: &str) -> Result<String, MarkdownError> {
    Ok(imp::to_html(text))
}

#[cfg(feature = "markdown")]
mod imp {
    use pulldown_cmark::{html, CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
    use std::collections::HashMap;

    const TOC_MARKER: &str = "<!-- dirshare:toc -->";

    struct Heading {
        level: HeadingLevel,
        text: String,
        id: String,
    }

    pub fn to_html(text: &str) -> String {
        let source = mark_toc(text);
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        let mut events: Vec<Event> = Parser::new_ext(&source, options).collect();
        let headings = assign_heading_ids(&mut events);
        let toc = toc_html(&headings);

        let events = events.into_iter().map(|event| match event {
            Event::Html(ref raw) if raw.trim() == TOC_MARKER => Event::Html(toc.clone().into()),
            other => other,
        });

        let mut out = String::with_capacity(source.len() * 3 / 2);
        html::push_html(&mut out, events);
        out
    }

    /// Swaps each `[TOC]` line for an html comment the event pass can find.
    fn mark_toc(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            if line.trim() == "[TOC]" {
                out.push('\n');
                out.push_str(TOC_MARKER);
                out.push_str("\n\n");
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    fn assign_heading_ids(events: &mut [Event]) -> Vec<Heading> {
        let mut headings = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut i = 0;
        while i < events.len() {
            let Event::Start(Tag::Heading { level, id, .. }) = &events[i] else {
                i += 1;
                continue;
            };
            let level = *level;
            let explicit = id.as_ref().map(|s| s.to_string());

            let mut text = String::new();
            let mut j = i + 1;
            while j < events.len() {
                match &events[j] {
                    Event::End(TagEnd::Heading(_)) => break,
                    Event::Text(t) | Event::Code(t) => text.push_str(t),
                    _ => {}
                }
                j += 1;
            }

            let id = explicit.unwrap_or_else(|| unique_slug(&text, &mut seen));
            if let Event::Start(Tag::Heading { id: slot, .. }) = &mut events[i] {
                *slot = Some(CowStr::from(id.clone()));
            }
            headings.push(Heading { level, text, id });
            i = j + 1;
        }
        headings
    }

    fn unique_slug(text: &str, seen: &mut HashMap<String, usize>) -> String {
        let mut slug = String::new();
        for c in text.trim().chars().flat_map(char::to_lowercase) {
            if c.is_alphanumeric() || c == '_' {
                slug.push(c);
            } else if (c.is_whitespace() || c == '-') && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_matches('-').to_string();
        let slug = if slug.is_empty() { "section".to_string() } else { slug };

        let count = seen.entry(slug.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            slug
        } else {
            format!("{}_{}", slug, *count - 1)
        }
    }

    fn toc_html(headings: &[Heading]) -> String {
        if headings.is_empty() {
            return String::new();
        }
        let base = headings.iter().map(|h| h.level as usize).min().unwrap_or(1);
        let mut out = String::from("<div class=\"toc\">\n");
        let mut depth = 0;
        for heading in headings {
            let target = heading.level as usize - base + 1;
            while depth < target {
                out.push_str("<ul>\n");
                depth += 1;
            }
            while depth > target {
                out.push_str("</ul>\n");
                depth -= 1;
            }
            out.push_str("<li><a href=\"#");
            html::push_html(&mut out, std::iter::once(Event::Text(heading.id.as_str().into())));
            out.push_str("\">");
            html::push_html(&mut out, std::iter::once(Event::Text(heading.text.as_str().into())));
            out.push_str("</a></li>\n");
        }
        while depth > 0 {
            out.push_str("</ul>\n");
            depth -= 1;
        }
        out.push_str("</div>\n");
        out
    }
}
