//! Numbering styles for ordered lists.
//!
//! CommonMark only knows decimal list markers, but quiz sources are written with pandoc's
//! `fancy_lists` markers (`(A)`, `b.`, `iv)`, `(@)`, `#.` ...). [normalize_list_markers]
//! rewrites those markers into same-width decimal markers before the markdown parser sees the
//! text, and remembers the style of every rewritten line so the AST adapter can label list items
//! the way the author numbered them.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Item numbers above this fall back to the raw integer as their label.
pub const MAX_STYLED_ITEM: usize = 25;

// Longest marker that still fits a CommonMark ordered list start (9 digits + delimiter)
const MAX_MARKER_WIDTH: usize = 10;

static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^( {0,3})(\(([A-Za-z]+|@|#|[0-9]+)\)|([A-Za-z]+|#)[.)])[ \t]")
        .expect("list marker regex is valid")
});

static ROMAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:m{0,3}(cm|cd|d?c{0,3})(xc|xl|l?x{0,3})(ix|iv|v?i{0,3}))$")
        .expect("roman numeral regex is valid")
});

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListStyle {
    #[default]
    Decimal,
    Example,
    LowerAlpha,
    UpperAlpha,
    LowerRoman,
    UpperRoman,
}

impl ListStyle {
    /// Label for the `n`th (1-based) item of a list numbered in this style.
    pub fn label(&self, n: usize) -> String {
        if n == 0 || n > MAX_STYLED_ITEM {
            return n.to_string();
        }
        match self {
            ListStyle::Decimal | ListStyle::Example => n.to_string(),
            ListStyle::LowerAlpha => char::from(b'a' + (n - 1) as u8).to_string(),
            ListStyle::UpperAlpha => char::from(b'A' + (n - 1) as u8).to_string(),
            ListStyle::LowerRoman => to_roman(n).to_lowercase(),
            ListStyle::UpperRoman => to_roman(n),
        }
    }

    /// Style implied by a single marker token (the part between the parentheses or before the
    /// delimiter). Returns None for tokens that are not list numbers.
    pub fn from_token(token: &str) -> Option<ListStyle> {
        match token {
            "@" => return Some(ListStyle::Example),
            "#" => return Some(ListStyle::Decimal),
            _ => {}
        }
        if token.chars().all(|c| c.is_ascii_digit()) {
            return Some(ListStyle::Decimal);
        }
        if !token.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let lower = token.chars().all(|c| c.is_ascii_lowercase());
        let upper = token.chars().all(|c| c.is_ascii_uppercase());
        if !lower && !upper {
            return None;
        }
        if token.len() == 1 && !token.eq_ignore_ascii_case("i") {
            return Some(if lower {
                ListStyle::LowerAlpha
            } else {
                ListStyle::UpperAlpha
            });
        }
        if ROMAN.is_match(token) {
            return Some(if lower {
                ListStyle::LowerRoman
            } else {
                ListStyle::UpperRoman
            });
        }
        None
    }
}

/// Roman numeral for 1..=3999, the raw integer otherwise.
pub fn to_roman(mut num: usize) -> String {
    if num == 0 || num >= 4000 {
        return num.to_string();
    }
    const NUMERALS: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut result = String::new();
    for (value, numeral) in NUMERALS {
        while num >= value {
            result.push_str(numeral);
            num -= value;
        }
    }
    result
}

/// Source text with fancy list markers rewritten, plus the style recorded for each rewritten
/// line (keyed by the byte offset of the line start).
#[derive(Debug, Default, Clone)]
pub struct NormalizedSource {
    pub text: String,
    styles: BTreeMap<usize, ListStyle>,
}

impl NormalizedSource {
    /// Style of the list marker on the line holding `offset`. Lines that were not rewritten
    /// carry plain decimal markers.
    pub fn style_at(&self, offset: usize) -> ListStyle {
        let offset = offset.min(self.text.len());
        let line_start = self.text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        self.styles.get(&line_start).copied().unwrap_or_default()
    }

    pub fn rewritten_lines(&self) -> usize {
        self.styles.len()
    }
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start_matches(' ');
    line.len() - trimmed.len() < 4 && (trimmed.starts_with("```") || trimmed.starts_with("~~~"))
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_atx_header(line: &str) -> bool {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 || !trimmed.starts_with('#') {
        return false;
    }
    let rest = trimmed.trim_start_matches('#');
    trimmed.len() - rest.len() <= 6 && (rest.is_empty() || rest.starts_with([' ', '\t', '\r', '\n']))
}

/// Number of lines of the leading YAML metadata block, if the document opens with one.
///
/// Same rule as the markdown parser: `---` on the first line, a non-blank second line and a
/// closing `---` or `...` line. A document opening with a bare thematic break has none.
fn metadata_lines(content: &str) -> Option<usize> {
    let mut lines = content.split_inclusive('\n');
    if lines.next()?.trim_end() != "---" {
        return None;
    }
    let mut count = 1;
    for line in lines {
        count += 1;
        if count == 2 && is_blank(line) {
            return None;
        }
        let bare = line.trim_end();
        if count > 2 && (bare == "---" || bare == "...") {
            return Some(count);
        }
    }
    None
}

/// Rewrite pandoc style list markers into decimal markers of the same byte width.
///
/// A marker only opens a list at a block boundary: after a blank line, a header, a code fence
/// or the start of the document. Inside a list every following item marker is rewritten too, so
/// a line like `A. Smith` continuing a paragraph stays prose. Fenced code and a leading YAML
/// metadata block are left untouched.
pub fn normalize_list_markers(content: &str) -> NormalizedSource {
    let mut text = String::with_capacity(content.len());
    let mut styles = BTreeMap::new();
    let metadata = metadata_lines(content).unwrap_or(0);
    let mut in_fence = false;
    let mut boundary = true;
    let mut in_list = false;

    for (nr, line) in content.split_inclusive('\n').enumerate() {
        let line_start = text.len();
        if nr < metadata {
            text.push_str(line);
            continue;
        }
        if is_fence(line) {
            in_fence = !in_fence;
            boundary = !in_fence;
            in_list = false;
            text.push_str(line);
            continue;
        }
        if in_fence {
            text.push_str(line);
            continue;
        }
        if is_blank(line) {
            boundary = true;
            text.push_str(line);
            continue;
        }
        let rewritten = if boundary || in_list {
            rewrite_marker(line)
        } else {
            None
        };
        match rewritten {
            Some((rewritten, style)) => {
                styles.insert(line_start, style);
                text.push_str(&rewritten);
                in_list = true;
            }
            None => {
                // An unindented line after a blank ends the list; lazy continuations keep it
                if boundary && !line.starts_with([' ', '\t']) {
                    in_list = false;
                }
                text.push_str(line);
            }
        }
        boundary = is_atx_header(line);
    }
    NormalizedSource { text, styles }
}

fn rewrite_marker(line: &str) -> Option<(String, ListStyle)> {
    let caps = MARKER.captures(line)?;
    let indent = caps.get(1)?.as_str();
    let marker = caps.get(2)?;
    let token = caps.get(3).or_else(|| caps.get(4))?.as_str();
    let parenthesized = caps.get(3).is_some();
    let rest = &line[marker.end()..];

    // Native CommonMark markers (`1.`, `2)`) need no rewrite
    if !parenthesized && token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // `A. Smith` reads as an initial: a capital letter with a period needs two spaces or a tab
    let initial = !parenthesized
        && marker.as_str().ends_with('.')
        && token.len() == 1
        && token.chars().all(|c| c.is_ascii_uppercase());
    if initial && !(rest.starts_with("  ") || rest.starts_with('\t')) {
        return None;
    }
    let style = ListStyle::from_token(token)?;
    let width = marker.as_str().len();
    if width > MAX_MARKER_WIDTH {
        return None;
    }
    let decimal = format!("{:0>digits$}.", 1, digits = width - 1);
    let mut rewritten = String::with_capacity(line.len());
    rewritten.push_str(indent);
    rewritten.push_str(&decimal);
    rewritten.push_str(rest);
    Some((rewritten, style))
}
