use readability::extractor;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::LazyLock;
use url::Url;

use crate::extractor::model::normalize_whitespace;

/// Subtrees never part of an article body.
const SKIPPED_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "svg", "button",
];

/// Elements that end a line of text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "br", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "pre",
    "blockquote", "table", "tr", "dl", "dt", "dd", "figure",
];

/// Containers shorter than this are considered chrome, not content.
const MIN_CONTAINER_TEXT: usize = 20;

static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[property='og:title']").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());

#[derive(Debug)]
pub struct ReadResult {
    pub title: String,
    pub text: String,
}

/// Pull title and main body text out of an article page.
///
/// The configured content container wins; readability is the fallback for
/// pages that have none.
pub fn extract(html: &str, url: &Url, content_selector: &Selector) -> Option<ReadResult> {
    let document = Html::parse_document(html);
    let title = extract_title(&document);

    let container_text = document
        .select(content_selector)
        .map(collect_text)
        .find(|text| text.chars().count() >= MIN_CONTAINER_TEXT);

    let text = match container_text {
        Some(text) => text,
        None => readability_text(html, url).or_else(|| {
            document
                .select(&BODY)
                .next()
                .map(collect_text)
                .filter(|t| !t.is_empty())
        })?,
    };

    Some(ReadResult {
        title: title.unwrap_or_default(),
        text,
    })
}

fn readability_text(html: &str, url: &Url) -> Option<String> {
    let product = extractor::extract(&mut html.as_bytes(), url).ok()?;
    let text = normalize_whitespace(&product.text);
    (!text.is_empty()).then_some(text)
}

fn extract_title(document: &Html) -> Option<String> {
    if let Some(content) = document
        .select(&OG_TITLE)
        .filter_map(|e| e.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
    {
        return Some(content.to_string());
    }

    if let Some(title) = document.select(&TITLE).map(element_text).find(|t| !t.is_empty()) {
        return Some(strip_site_suffix(&title).to_string());
    }

    document.select(&H1).map(element_text).find(|t| !t.is_empty())
}

/// "Article Title | Site Name" and "Article Title - Site Name" become "Article Title".
fn strip_site_suffix(title: &str) -> &str {
    for separator in [" | ", " - ", " – "] {
        if let Some(pos) = title.rfind(separator)
            && pos > 0
        {
            return title[..pos].trim();
        }
    }
    title
}

fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Visible text of `root` with navigation and scripts removed and one line
/// per block element.
fn collect_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(root, &mut out);
    normalize_whitespace(&out)
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_inline(text, out),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                let is_block = BLOCK_TAGS.contains(&name);
                if is_block {
                    end_line(out);
                }
                if name == "li" {
                    out.push_str("- ");
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    push_text(child_el, out);
                }
                if is_block {
                    end_line(out);
                }
            }
            _ => {}
        }
    }
}

/// Source newlines inside a text node are layout, not content: collapse them.
fn push_inline(text: &str, out: &mut String) {
    let words: Vec<&str> = text.split_whitespace().collect();
    let needs_space = !out.is_empty() && !out.ends_with(char::is_whitespace);
    if words.is_empty() {
        if needs_space {
            out.push(' ');
        }
        return;
    }
    if needs_space && text.starts_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(&words.join(" "));
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn end_line(out: &mut String) {
    out.truncate(out.trim_end_matches(' ').len());
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}
