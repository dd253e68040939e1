//! Structural HTML checks.
//!
//! This is not a conforming HTML parser. It walks tags in document order and
//! verifies that the element tree is balanced, which catches truncated or
//! hand-edited pages before they reach a provider. End tags that HTML allows
//! to be omitted are closed implicitly.

use std::fmt;

/// Elements that never have content or an end tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose end tag may be omitted
const OPTIONAL_END_ELEMENTS: &[&str] = &[
    "head", "p", "li", "dt", "dd", "option", "optgroup", "tr", "td", "th", "thead", "tbody",
    "tfoot", "colgroup", "rb", "rt", "rtc", "rp",
];

/// Elements whose content is raw text up to the matching end tag
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// A structural problem in a markup document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupError {
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for MarkupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

struct OpenElement {
    name: String,
    offset: usize,
}

/// Check that `src` is a balanced element tree
pub fn check_markup(src: &str) -> Result<(), MarkupError> {
    let lower = src.to_ascii_lowercase();
    let bytes = src.as_bytes();
    let err = |offset: usize, reason: String| MarkupError {
        line: line_of(src, offset),
        reason,
    };

    let mut stack: Vec<OpenElement> = Vec::new();
    let mut elements = 0usize;
    let mut pos = 0usize;

    while let Some(found) = src[pos..].find('<') {
        let start = pos + found;
        let rest = &lower[start..];

        if rest.starts_with("<!--") {
            let end = lower[start + 4..]
                .find("-->")
                .ok_or_else(|| err(start, "unterminated comment".to_string()))?;
            pos = start + 4 + end + 3;
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = lower[start..]
                .find('>')
                .ok_or_else(|| err(start, "unterminated declaration".to_string()))?;
            pos = start + end + 1;
            continue;
        }

        if rest.starts_with("</") {
            let name = tag_name(&lower[start + 2..]);
            if name.is_empty() {
                return Err(err(start, "malformed closing tag".to_string()));
            }
            let end = lower[start..]
                .find('>')
                .ok_or_else(|| err(start, format!("unterminated </{}> tag", name)))?;
            close_element(&mut stack, name, start, src)?;
            pos = start + end + 1;
            continue;
        }

        let opens_tag = bytes
            .get(start + 1)
            .map(|b| b.is_ascii_alphabetic())
            .unwrap_or(false);
        if !opens_tag {
            // A literal '<' in text
            pos = start + 1;
            continue;
        }

        let name = tag_name(&lower[start + 1..]).to_string();
        let tag_end = find_tag_end(bytes, start + 1 + name.len())
            .ok_or_else(|| err(start, format!("unterminated <{}> tag", name)))?;
        let self_closing = tag_end > start && bytes[tag_end - 1] == b'/';
        elements += 1;
        pos = tag_end + 1;

        if VOID_ELEMENTS.contains(&name.as_str()) || self_closing {
            continue;
        }

        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            let closing = format!("</{}", name);
            let end = lower[pos..]
                .find(&closing)
                .ok_or_else(|| err(start, format!("unclosed <{}> element", name)))?;
            stack.push(OpenElement { name, offset: start });
            pos += end;
            continue;
        }

        stack.push(OpenElement { name, offset: start });
    }

    if elements == 0 {
        return Err(err(0, "document contains no elements".to_string()));
    }

    if let Some(open) = stack
        .iter()
        .find(|e| !OPTIONAL_END_ELEMENTS.contains(&e.name.as_str()))
    {
        return Err(err(open.offset, format!("unclosed <{}> element", open.name)));
    }

    Ok(())
}

fn close_element(
    stack: &mut Vec<OpenElement>,
    name: &str,
    offset: usize,
    src: &str,
) -> Result<(), MarkupError> {
    if VOID_ELEMENTS.contains(&name) {
        return Ok(());
    }

    let Some(index) = stack.iter().rposition(|e| e.name == name) else {
        return Err(MarkupError {
            line: line_of(src, offset),
            reason: format!("unexpected closing tag </{}>", name),
        });
    };

    if let Some(blocking) = stack[index + 1..]
        .iter()
        .rev()
        .find(|e| !OPTIONAL_END_ELEMENTS.contains(&e.name.as_str()))
    {
        return Err(MarkupError {
            line: line_of(src, offset),
            reason: format!(
                "closing tag </{}> does not match open <{}> from line {}",
                name,
                blocking.name,
                line_of(src, blocking.offset)
            ),
        });
    }

    stack.truncate(index);
    Ok(())
}

fn tag_name(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == ':' || c == '_'))
        .unwrap_or(s.len());
    &s[..end]
}

/// Index of the `>` closing a start tag, skipping quoted attribute values
fn find_tag_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i),
            None => {}
        }
    }
    None
}

fn line_of(src: &str, offset: usize) -> usize {
    src.as_bytes()[..offset.min(src.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}
