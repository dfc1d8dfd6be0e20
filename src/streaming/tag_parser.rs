//! Tag structure validation
//!
//! The tag matchers only know where a candidate tag starts (`<name`) and
//! ends (`>`). Whether the run in between is a well-formed tag is decided by
//! a [`TagParser`], which also extracts the tag name and attributes.
//!
//! [`SimpleTagParser`] is a small hand-written scanner (no regex). It is not
//! an HTML parser: it looks at a single tag and nothing else.

/// Start tag (`<a>`, `<br/>`) or end tag (`</a>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Start,
    End,
}

/// A tag confirmed by a [`TagParser`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTag {
    /// Tag name, lowercased
    pub name: String,
    pub kind: TagKind,
    /// Whether the tag ends with `/>`
    pub self_closing: bool,
    /// Attributes in source order, names lowercased, first occurrence wins
    pub attributes: Vec<(String, String)>,
}

impl ParsedTag {
    /// Value of an attribute (name compared case-insensitively)
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check the tag name (case-insensitive)
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Given a candidate tag string, return the tag or `None` if it is not a tag
pub trait TagParser: Send + Sync {
    fn parse(&self, candidate: &str) -> Option<ParsedTag>;
}

/// Default single-tag parser
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTagParser;

impl SimpleTagParser {
    pub fn new() -> Self {
        Self
    }

    /// Characters allowed in a tag name after the first letter
    #[inline]
    fn is_name_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')
    }

    #[inline]
    fn is_attribute_name_char(c: char) -> bool {
        !c.is_whitespace() && !matches!(c, '=' | '>' | '/' | '<' | '"' | '\'')
    }
}

impl TagParser for SimpleTagParser {
    fn parse(&self, candidate: &str) -> Option<ParsedTag> {
        let inner = candidate.strip_prefix('<')?.strip_suffix('>')?;
        let (kind, rest) = match inner.strip_prefix('/') {
            Some(rest) => (TagKind::End, rest),
            None => (TagKind::Start, inner),
        };

        // tag name: letter followed by name characters
        let first = rest.chars().next()?;
        if !first.is_ascii_alphabetic() {
            return None;
        }
        let name_end = rest
            .find(|c: char| !Self::is_name_char(c))
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        let mut scanner = Scanner::new(&rest[name_end..]);

        if kind == TagKind::End {
            scanner.skip_whitespace();
            return scanner.is_done().then(|| ParsedTag {
                name,
                kind,
                self_closing: false,
                attributes: Vec::new(),
            });
        }

        // name must be followed by whitespace, `/` or the end of the tag
        match scanner.peek() {
            None | Some('/') => {}
            Some(c) if c.is_whitespace() => {}
            Some(_) => return None,
        }

        let mut attributes: Vec<(String, String)> = Vec::new();
        let mut self_closing = false;
        loop {
            scanner.skip_whitespace();
            match scanner.peek() {
                None => break,
                Some('/') => {
                    scanner.bump();
                    scanner.skip_whitespace();
                    if !scanner.is_done() {
                        return None;
                    }
                    self_closing = true;
                    break;
                }
                Some(c) if Self::is_attribute_name_char(c) => {
                    let attr_name = scanner.take_while(Self::is_attribute_name_char).to_lowercase();
                    scanner.skip_whitespace();
                    let value = if scanner.peek() == Some('=') {
                        scanner.bump();
                        scanner.skip_whitespace();
                        scanner.attribute_value()?
                    } else {
                        String::new()
                    };
                    if !attributes.iter().any(|(n, _)| *n == attr_name) {
                        attributes.push((attr_name, value));
                    }
                }
                Some(_) => return None,
            }
        }

        Some(ParsedTag {
            name,
            kind,
            self_closing,
            attributes,
        })
    }
}

/// Cursor over the remainder of a tag
struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(rest: &'a str) -> Self {
        Self { rest }
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.rest = &self.rest[c.len_utf8()..];
        }
    }

    fn is_done(&self) -> bool {
        self.rest.is_empty()
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> &'a str {
        let end = self.rest.find(|c: char| !accept(c)).unwrap_or(self.rest.len());
        let (taken, rest) = self.rest.split_at(end);
        self.rest = rest;
        taken
    }

    /// Quoted or unquoted attribute value. `None` for an unterminated quote
    /// or a stray `<`.
    fn attribute_value(&mut self) -> Option<String> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                let end = self.rest.find(quote)?;
                let value = &self.rest[..end];
                self.rest = &self.rest[end + quote.len_utf8()..];
                Some(value.to_string())
            }
            _ => {
                let value = self.take_while(|c| !c.is_whitespace() && c != '>');
                // an unquoted value may not swallow the closing `/`
                let value = if self.is_done() {
                    value.strip_suffix('/').map_or(value, |v| {
                        self.rest = "/";
                        v
                    })
                } else {
                    value
                };
                if value.contains('<') || value.contains('"') || value.contains('\'') {
                    return None;
                }
                Some(value.to_string())
            }
        }
    }
}
