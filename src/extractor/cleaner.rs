use regex::Regex;
use std::sync::LazyLock;

use crate::extractor::model::normalize_whitespace;

/// Closing boilerplate appended to every help-center article.
static PROMO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(#+\s*)?(that's all!?|that’s all!?|if you have any additional questions|feel free to reach out|.* is the leader in digital signage)",
    )
    .unwrap()
});

static BULLET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*+]\s+").unwrap());

/// Bullet runs longer than this near the top of a page are tables of contents.
const MAX_TOC_BULLETS: usize = 8;
/// How far into the body a table of contents may start.
const TOC_WINDOW_LINES: usize = 20;

/// Strip promotional trailers and leading tables of contents from body text.
pub fn strip_boilerplate(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| !PROMO_REGEX.is_match(line.trim()))
        .collect();

    let mut kept = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if BULLET_REGEX.is_match(lines[i]) {
            let start = i;
            while i < lines.len() && BULLET_REGEX.is_match(lines[i]) {
                i += 1;
            }
            let run = &lines[start..i];
            if !(start < TOC_WINDOW_LINES && run.len() > MAX_TOC_BULLETS) {
                kept.extend_from_slice(run);
            }
        } else {
            kept.push(lines[i]);
            i += 1;
        }
    }

    normalize_whitespace(&kept.join("\n"))
}
