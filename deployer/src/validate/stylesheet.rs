//! Syntactic CSS checks.
//!
//! Walks rules, at-rules and declaration blocks and rejects input a browser
//! would silently drop: unbalanced braces, unterminated strings or comments,
//! declarations without a value.

use std::fmt;

/// At-rules whose block contains further rules rather than declarations
const GROUPING_AT_RULES: &[&str] = &[
    "media",
    "supports",
    "document",
    "-moz-document",
    "layer",
    "container",
    "scope",
    "starting-style",
    "keyframes",
    "-webkit-keyframes",
    "-moz-keyframes",
];

/// A syntax problem in a stylesheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssError {
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for CssError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// Check that `src` is a syntactically valid stylesheet
pub fn check_stylesheet(src: &str) -> Result<(), CssError> {
    let mut parser = Parser { src, pos: 0 };
    parser.rule_list(false)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

/// Result of scanning forward to a stop character at nesting depth zero
struct Scan {
    start: usize,
    end: usize,
    stop: Option<u8>,
}

impl<'a> Parser<'a> {
    fn error(&self, offset: usize, reason: impl Into<String>) -> CssError {
        let line = self.src.as_bytes()[..offset.min(self.src.len())]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1;
        CssError {
            line,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_trivia(&mut self) -> Result<(), CssError> {
        let bytes = self.src.as_bytes();
        loop {
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.src[self.pos..].starts_with("<!--") {
                self.pos += 4;
            } else if self.src[self.pos..].starts_with("-->") {
                self.pos += 3;
            } else if self.src[self.pos..].starts_with("/*") {
                self.pos = self.comment_end(self.pos)?;
            } else {
                return Ok(());
            }
        }
    }

    fn comment_end(&self, start: usize) -> Result<usize, CssError> {
        self.src[start + 2..]
            .find("*/")
            .map(|i| start + 2 + i + 2)
            .ok_or_else(|| self.error(start, "unterminated comment"))
    }

    /// Advance to the first of `stops` outside strings, comments and brackets
    fn scan_until(&mut self, stops: &[u8]) -> Result<Scan, CssError> {
        let bytes = self.src.as_bytes();
        let start = self.pos;
        let mut brackets: Vec<(u8, usize)> = Vec::new();

        while self.pos < bytes.len() {
            let b = bytes[self.pos];
            match b {
                b'"' | b'\'' => {
                    self.pos = self.string_end(self.pos, b)?;
                    continue;
                }
                b'/' if bytes.get(self.pos + 1) == Some(&b'*') => {
                    self.pos = self.comment_end(self.pos)?;
                    continue;
                }
                b'\\' => {
                    self.pos = (self.pos + 2).min(bytes.len());
                    continue;
                }
                b'(' | b'[' => brackets.push((b, self.pos)),
                b')' | b']' => {
                    let expected = if b == b')' { b'(' } else { b'[' };
                    match brackets.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => {
                            return Err(self.error(
                                self.pos,
                                format!("unbalanced '{}'", b as char),
                            ))
                        }
                    }
                }
                _ if brackets.is_empty() && stops.contains(&b) => {
                    return Ok(Scan {
                        start,
                        end: self.pos,
                        stop: Some(b),
                    });
                }
                _ => {}
            }
            self.pos += 1;
        }

        if let Some((open, offset)) = brackets.pop() {
            return Err(self.error(offset, format!("unclosed '{}'", open as char)));
        }

        Ok(Scan {
            start,
            end: self.pos,
            stop: None,
        })
    }

    fn string_end(&self, start: usize, quote: u8) -> Result<usize, CssError> {
        let bytes = self.src.as_bytes();
        let mut i = start + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'\n' => break,
                b if b == quote => return Ok(i + 1),
                _ => i += 1,
            }
        }
        Err(self.error(start, "unterminated string"))
    }

    fn rule_list(&mut self, nested: bool) -> Result<(), CssError> {
        loop {
            self.skip_trivia()?;
            match self.peek() {
                None if nested => return Err(self.error(self.pos, "unclosed block")),
                None => return Ok(()),
                Some(b'}') if nested => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(b'}') => return Err(self.error(self.pos, "unexpected '}'")),
                Some(b'@') => self.at_rule()?,
                Some(_) => self.qualified_rule()?,
            }
        }
    }

    fn qualified_rule(&mut self) -> Result<(), CssError> {
        let scan = self.scan_until(b"{;}")?;
        let selector = strip_comments(&self.src[scan.start..scan.end]);
        match scan.stop {
            Some(b'{') if selector.trim().is_empty() => {
                Err(self.error(scan.start, "rule has an empty selector"))
            }
            Some(b'{') => {
                self.pos += 1;
                self.declaration_block()
            }
            _ => Err(self.error(
                scan.start,
                format!("expected '{{' after `{}`", selector.trim()),
            )),
        }
    }

    fn at_rule(&mut self) -> Result<(), CssError> {
        let at = self.pos;
        self.pos += 1;
        let name_len = self.src[self.pos..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(self.src.len() - self.pos);
        if name_len == 0 {
            return Err(self.error(at, "at-rule without a name"));
        }
        let name = self.src[self.pos..self.pos + name_len].to_ascii_lowercase();
        self.pos += name_len;

        let scan = self.scan_until(b"{;}")?;
        match scan.stop {
            Some(b';') => {
                self.pos += 1;
                Ok(())
            }
            Some(b'{') => {
                self.pos += 1;
                if GROUPING_AT_RULES.contains(&name.as_str()) {
                    self.rule_list(true)
                } else {
                    self.declaration_block()
                }
            }
            _ => Err(self.error(at, format!("unterminated @{} rule", name))),
        }
    }

    fn declaration_block(&mut self) -> Result<(), CssError> {
        loop {
            self.skip_trivia()?;
            match self.peek() {
                None => return Err(self.error(self.pos, "unclosed declaration block")),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(b';') => {
                    self.pos += 1;
                    continue;
                }
                Some(b'@') => {
                    self.at_rule()?;
                    continue;
                }
                Some(_) => {}
            }

            let scan = self.scan_until(b";{}")?;
            let text = strip_comments(&self.src[scan.start..scan.end]);

            if scan.stop == Some(b'{') {
                // Nested style rule
                if text.trim().is_empty() {
                    return Err(self.error(scan.start, "rule has an empty selector"));
                }
                self.pos += 1;
                self.declaration_block()?;
                continue;
            }

            self.declaration(&text, scan.start)?;
            if scan.stop.is_none() {
                return Err(self.error(self.pos, "unclosed declaration block"));
            }
        }
    }

    fn declaration(&self, text: &str, offset: usize) -> Result<(), CssError> {
        let Some((property, value)) = text.split_once(':') else {
            return Err(self.error(
                offset,
                format!("declaration `{}` is missing ':'", text.trim()),
            ));
        };

        let property = property.trim();
        if property.is_empty() {
            return Err(self.error(offset, "declaration has an empty property name"));
        }
        if property.contains(char::is_whitespace) {
            return Err(self.error(offset, format!("invalid property name `{}`", property)));
        }

        let value = value.trim();
        let value = value
            .strip_suffix("!important")
            .map(str::trim_end)
            .unwrap_or(value);
        if value.is_empty() && !property.starts_with("--") {
            return Err(self.error(
                offset,
                format!("property `{}` has an empty value", property),
            ));
        }

        Ok(())
    }
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
