//! Post-processing applied to streamed assistant text, and page-mention detection.

use once_cell::sync::Lazy;
use regex::Regex;

pub const HIGHLIGHT_MARK: &str = "==";

static PAGE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:page|slide)\s+(\d{1,3})\b").expect("valid page pattern"));

static HIGHLIGHTABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:==)?\b(page|slide)[ \t]+(\d{1,3})\b(?:==)?").expect("valid highlight pattern")
});

static CITATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"【[^】]*?†[^】]*】|\[\d+(?::\d+)?†[^\]]*\]").expect("valid citation pattern")
});

static NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\. ").expect("valid numbered item pattern"));

/// First "page N" / "slide N" reference in the text, if any.
pub fn detect_page_mention(text: &str) -> Option<usize> {
    PAGE_MENTION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

/// Display form of accumulated assistant text. `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let stripped = strip_citations(text);
    let spaced = space_lists(&stripped);
    highlight_page_mentions(&spaced)
}

pub fn strip_citations(text: &str) -> String {
    CITATION.replace_all(text, "").into_owned()
}

/// Puts a blank line before every list item that directly follows a non-blank line.
pub fn space_lists(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut previous_blank = true;
    for (idx, line) in text.split('\n').enumerate() {
        if idx > 0 {
            if is_list_item(line) && !previous_blank {
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str(line);
        previous_blank = line.is_empty();
    }
    out
}

pub fn highlight_page_mentions(text: &str) -> String {
    HIGHLIGHTABLE
        .replace_all(text, "==${1} ${2}==")
        .into_owned()
}

fn is_list_item(line: &str) -> bool {
    line.starts_with("- ") || NUMBERED_ITEM.is_match(line)
}
