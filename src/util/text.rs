use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Tags whose removal should leave a word boundary behind.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "li", "ul", "ol", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6",
    "blockquote", "pre", "hr", "section", "article", "figure", "figcaption", "img",
];

/// Elements whose text content is never prose.
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

/// Display width of a string in terminal columns (CJK and emoji count as 2).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncates a string to at most `max_width` terminal columns, appending
/// `...` when something was cut.
///
/// Widths of 3 or less have no room for an ellipsis and are filled with as
/// many whole characters as fit.
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let (budget, ellipsis) = if max_width <= 3 {
        (max_width, "")
    } else {
        (max_width - 3, "...")
    };

    let mut used = 0;
    let mut cut = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        cut = idx + c.len_utf8();
    }

    Cow::Owned(format!("{}{}", &s[..cut], ellipsis))
}

/// Truncates to at most `max_chars` Unicode scalar values. No ellipsis is
/// added, so the result length is a hard bound.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(s[..idx].to_string()),
        None => Cow::Borrowed(s),
    }
}

/// Removes ASCII control characters and ANSI escape sequences from
/// feed-supplied text before it reaches the terminal.
///
/// Tab, newline and carriage return are preserved.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_unsafe = |c: char| c == '\x1b' || c == '\x7f' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_unsafe) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                // CSI: parameters until a final byte in 0x40..=0x7e
                Some('[') => {
                    chars.next();
                    for n in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&n) {
                            break;
                        }
                    }
                }
                // OSC: until BEL or ESC \
                Some(']') => {
                    chars.next();
                    while let Some(n) = chars.next() {
                        if n == '\x07' {
                            break;
                        }
                        if n == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_unsafe(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}

/// Decodes the handful of HTML entities that show up in feed text:
/// the XML builtins, `&nbsp;`, and numeric references.
///
/// Unknown entities are left untouched.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail[1..]
            .char_indices()
            .take(10)
            .find(|&(_, c)| c == ';')
            .and_then(|(semi, _)| decode_entity(&tail[1..1 + semi]).map(|c| (c, semi + 2)));
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Strips HTML markup, dropping `<script>`/`<style>` bodies and leaving a
/// space where block-level tags stood.
///
/// Runs until no tag-shaped sequence remains, so input such as `<<b>b>`
/// cannot reassemble into a tag after one pass.
pub fn strip_html_tags(s: &str) -> Cow<'_, str> {
    if !s.contains('<') {
        return Cow::Borrowed(s);
    }

    let mut current = strip_tags_once(s);
    loop {
        let next = strip_tags_once(&current);
        if next == current {
            return Cow::Owned(current);
        }
        current = next;
    }
}

fn strip_tags_once(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];

        if !starts_tag(tail) {
            out.push('<');
            rest = &tail[1..];
            continue;
        }

        match raw_text_element(tail) {
            Some(RawText::Closed(skip)) => {
                rest = &tail[skip..];
                continue;
            }
            // Never closed, so it is text that only looks like a tag
            Some(RawText::Unclosed) => {
                out.push('<');
                rest = &tail[1..];
                continue;
            }
            None => {}
        }

        match tail.find('>') {
            Some(close) => {
                if is_block_tag(&tail[1..close]) {
                    out.push(' ');
                }
                rest = &tail[close + 1..];
            }
            // Unterminated tag swallows the remainder
            None => rest = "",
        }
    }

    out.push_str(rest);
    out
}

fn starts_tag(tail: &str) -> bool {
    tail[1..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
}

fn tag_name(inner: &str) -> &str {
    let inner = inner.trim_start_matches('/');
    let end = inner
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(inner.len());
    &inner[..end]
}

fn is_block_tag(inner: &str) -> bool {
    let name = tag_name(inner);
    BLOCK_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name))
}

enum RawText {
    /// Byte length of the whole element, closing tag included.
    Closed(usize),
    Unclosed,
}

/// A `<script>` or `<style>` element opening at the start of `tail`.
fn raw_text_element(tail: &str) -> Option<RawText> {
    let name = tag_name(&tail[1..]);
    let raw = RAW_TEXT_TAGS.iter().find(|t| t.eq_ignore_ascii_case(name))?;
    if tail[1..].starts_with('/') {
        return None;
    }

    let lower = tail.to_ascii_lowercase();
    let closing = format!("</{}", raw);
    match lower.find(&closing) {
        Some(pos) => {
            let end = lower[pos..].find('>').map(|g| pos + g + 1).unwrap_or(tail.len());
            Some(RawText::Closed(end))
        }
        None => Some(RawText::Unclosed),
    }
}

/// Collapses every run of whitespace to a single space and trims the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
