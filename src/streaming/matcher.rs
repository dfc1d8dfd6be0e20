//! Stream Pattern Matchers
//!
//! A matcher classifies an accumulating character buffer: does it start a
//! match, still partially match, fully match, or not match at all.
//!
//! Matchers are stateless with respect to stream position. The buffer they
//! classify is owned by the engine's matching slot, which appends one
//! character at a time and resets it when a match fails or completes.

use std::sync::Arc;

use super::tag_parser::{SimpleTagParser, TagKind, TagParser};
use crate::error::MatchConfigError;

/// Outcome of classifying a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// Buffer does not match
    None,
    /// Last character starts a potential match
    First,
    /// More than one character matched, not complete yet
    Partially,
    /// Buffer is a complete match
    Fully,
}

impl MatchStatus {
    /// First or Partially
    pub fn is_partial(&self) -> bool {
        matches!(self, MatchStatus::First | MatchStatus::Partially)
    }
}

/// Identifies text in a stream of characters.
///
/// `classify` first receives a buffer with a single character and then the
/// same buffer growing by one character per call. It must return
/// [`MatchStatus::First`] when the last character starts a new candidate,
/// [`MatchStatus::Partially`] while the buffer is a proper prefix of a
/// match, [`MatchStatus::Fully`] on a complete match and
/// [`MatchStatus::None`] as soon as the buffer cannot match anymore.
pub trait StreamMatcher {
    fn classify(&self, buffer: &str) -> MatchStatus;

    /// Check the matcher definition before the engine starts
    fn validate(&self) -> Result<(), MatchConfigError> {
        Ok(())
    }
}

/// Compare two characters, optionally ignoring case
#[inline]
fn chars_equal(a: char, b: char, case_sensitive: bool) -> bool {
    a == b
        || (!case_sensitive
            && (a.to_lowercase().eq(b.to_lowercase()) || a.to_uppercase().eq(b.to_uppercase())))
}

/// Matches a static text
#[derive(Clone, Debug)]
pub struct TextMatcher {
    text: String,
    /// Pattern length in characters
    text_len: usize,
    case_sensitive: bool,
}

impl TextMatcher {
    /// Create a matcher for `text`
    pub fn new(text: &str, case_sensitive: bool) -> Self {
        Self {
            text: text.to_string(),
            text_len: text.chars().count(),
            case_sensitive,
        }
    }

    /// Create a case-insensitive matcher
    pub fn case_insensitive(text: &str) -> Self {
        Self::new(text, false)
    }

    /// Pattern text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Pattern length in characters
    pub fn len(&self) -> usize {
        self.text_len
    }

    pub fn is_empty(&self) -> bool {
        self.text_len == 0
    }
}

impl StreamMatcher for TextMatcher {
    fn classify(&self, buffer: &str) -> MatchStatus {
        let mut expected = self.text.chars();
        let mut matched = 0;

        for c in buffer.chars() {
            match expected.next() {
                Some(e) if chars_equal(c, e, self.case_sensitive) => matched += 1,
                _ => return MatchStatus::None,
            }
        }

        if matched == 0 {
            MatchStatus::None
        } else if matched == self.text_len {
            MatchStatus::Fully
        } else if matched == 1 {
            MatchStatus::First
        } else {
            MatchStatus::Partially
        }
    }

    fn validate(&self) -> Result<(), MatchConfigError> {
        if self.text.is_empty() {
            return Err(MatchConfigError::EmptyPattern);
        }
        Ok(())
    }
}

/// Two-phase tag matching shared by the opening and closing tag matchers.
///
/// `<name` (or `</name`) must match literally; after that the content is
/// buffered opaquely until `>`, and the complete run goes to the parser.
#[derive(Clone)]
struct TagShape {
    tag_name: String,
    prefix: TextMatcher,
    parser: Arc<dyn TagParser>,
}

impl TagShape {
    fn new(tag_name: &str, prefix: String, parser: Arc<dyn TagParser>) -> Self {
        Self {
            tag_name: tag_name.to_string(),
            prefix: TextMatcher::case_insensitive(&prefix),
            parser,
        }
    }

    fn classify(&self, buffer: &str, kind: TagKind) -> MatchStatus {
        let mut chars = buffer.chars();
        if chars.next() != Some('<') {
            return MatchStatus::None;
        }
        let last = chars.next_back();
        let len = buffer.chars().count();

        if len == 1 {
            MatchStatus::First
        } else if len <= self.prefix.len() {
            if self.prefix.classify(buffer) == MatchStatus::None {
                MatchStatus::None
            } else {
                MatchStatus::Partially
            }
        } else if last == Some('>') {
            match self.parser.parse(buffer) {
                Some(tag) if tag.kind == kind && tag.is_named(&self.tag_name) => MatchStatus::Fully,
                _ => MatchStatus::None,
            }
        } else if last == Some('<') {
            // a new tag starts before this one closed: track from the new `<`
            MatchStatus::First
        } else {
            MatchStatus::Partially
        }
    }

    fn validate(&self) -> Result<(), MatchConfigError> {
        let valid = self
            .tag_name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && self
                .tag_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'));
        if valid {
            Ok(())
        } else {
            Err(MatchConfigError::InvalidTagName(self.tag_name.clone()))
        }
    }
}

/// Matches an opening tag like `<a href="..">` or a self-closing tag like `<br/>`.
/// Inner content is not processed: matching finishes at the first `>`.
#[derive(Clone)]
pub struct HtmlTagMatcher {
    shape: TagShape,
}

impl HtmlTagMatcher {
    /// Match `<tag_name ...>` validated by the default parser
    pub fn new(tag_name: &str) -> Self {
        Self::with_parser(tag_name, Arc::new(SimpleTagParser::new()))
    }

    /// Match `<tag_name ...>` validated by a custom parser
    pub fn with_parser(tag_name: &str, parser: Arc<dyn TagParser>) -> Self {
        Self {
            shape: TagShape::new(tag_name, format!("<{}", tag_name), parser),
        }
    }

    pub fn tag_name(&self) -> &str {
        &self.shape.tag_name
    }
}

impl StreamMatcher for HtmlTagMatcher {
    fn classify(&self, buffer: &str) -> MatchStatus {
        self.shape.classify(buffer, TagKind::Start)
    }

    fn validate(&self) -> Result<(), MatchConfigError> {
        self.shape.validate()
    }
}

/// Matches a closing tag like `</body>`
#[derive(Clone)]
pub struct HtmlCloseTagMatcher {
    shape: TagShape,
}

impl HtmlCloseTagMatcher {
    /// Match `</tag_name>` validated by the default parser
    pub fn new(tag_name: &str) -> Self {
        Self::with_parser(tag_name, Arc::new(SimpleTagParser::new()))
    }

    /// Match `</tag_name>` validated by a custom parser
    pub fn with_parser(tag_name: &str, parser: Arc<dyn TagParser>) -> Self {
        Self {
            shape: TagShape::new(tag_name, format!("</{}", tag_name), parser),
        }
    }

    pub fn tag_name(&self) -> &str {
        &self.shape.tag_name
    }
}

impl StreamMatcher for HtmlCloseTagMatcher {
    fn classify(&self, buffer: &str) -> MatchStatus {
        self.shape.classify(buffer, TagKind::End)
    }

    fn validate(&self) -> Result<(), MatchConfigError> {
        self.shape.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MatchStatus::{First, Fully, None as NoMatch, Partially};

    /// Feed `text` one character at a time the way a matching slot does:
    /// the buffer restarts after None/Fully and at the last character on First.
    fn assert_statuses(matcher: &dyn StreamMatcher, text: &str, expected: &[MatchStatus]) {
        let chars: Vec<char> = text.chars().collect();
        assert_eq!(chars.len(), expected.len(), "one status per character");
        let mut start = 0;

        for (i, want) in expected.iter().enumerate() {
            let buffer: String = chars[start..=i].iter().collect();
            let got = matcher.classify(&buffer);
            assert_eq!(got, *want, "'{}' at position {} (buffer '{}')", text, i + 1, buffer);
            match got {
                NoMatch | Fully => start = i + 1,
                First => start = i,
                Partially => {}
            }
        }
    }

    #[test]
    fn test_text_simple_match() {
        assert_statuses(&TextMatcher::new("bla", true), "bla", &[First, Partially, Fully]);
    }

    #[test]
    fn test_text_fail_from_beginning() {
        assert_statuses(&TextMatcher::new("bla", true), "cla", &[NoMatch, NoMatch, NoMatch]);
    }

    #[test]
    fn test_text_fail_in_the_middle() {
        assert_statuses(&TextMatcher::new("bla", true), "bra", &[First, NoMatch, NoMatch]);
        assert_statuses(&TextMatcher::new("bla", true), "blu", &[First, Partially, NoMatch]);
    }

    #[test]
    fn test_text_match_in_the_middle() {
        assert_statuses(
            &TextMatcher::new("bla", true),
            "lablalabl",
            &[NoMatch, NoMatch, First, Partially, Fully, NoMatch, NoMatch, First, Partially],
        );
    }

    #[test]
    fn test_text_match_in_sequence() {
        assert_statuses(
            &TextMatcher::new("bla", true),
            "blabla",
            &[First, Partially, Fully, First, Partially, Fully],
        );
    }

    #[test]
    fn test_text_multibyte() {
        assert_statuses(
            &TextMatcher::new("blá", true),
            "blábla",
            &[First, Partially, Fully, First, Partially, NoMatch],
        );
        assert_statuses(
            &TextMatcher::new("blá", true),
            "bláéblá",
            &[First, Partially, Fully, NoMatch, First, Partially, Fully],
        );
    }

    #[test]
    fn test_text_case_insensitive() {
        assert_statuses(
            &TextMatcher::new("BlÁ", false),
            "bláéblá",
            &[First, Partially, Fully, NoMatch, First, Partially, Fully],
        );
    }

    #[test]
    fn test_text_single_character() {
        assert_statuses(
            &TextMatcher::case_insensitive("X"),
            "uuxuxX",
            &[NoMatch, NoMatch, Fully, NoMatch, Fully, Fully],
        );
    }

    #[test]
    fn test_text_empty_pattern_rejected() {
        assert_eq!(TextMatcher::new("", true).validate(), Err(MatchConfigError::EmptyPattern));
        assert!(TextMatcher::new("a", true).validate().is_ok());
    }

    #[test]
    fn test_text_accessors_and_partial_statuses() {
        let matcher = TextMatcher::case_insensitive("Bla");
        assert_eq!(matcher.text(), "Bla");
        assert_eq!(matcher.len(), 3);

        assert!(matcher.classify("b").is_partial());
        assert!(matcher.classify("bL").is_partial());
        assert!(!matcher.classify("bla").is_partial());
        assert!(!matcher.classify("x").is_partial());
    }

    #[test]
    fn test_tag_simple() {
        let matcher = HtmlTagMatcher::new("table");
        assert_statuses(
            &matcher,
            "<table>",
            &[First, Partially, Partially, Partially, Partially, Partially, Fully],
        );
        assert_statuses(
            &matcher,
            "<table />",
            &[
                First, Partially, Partially, Partially, Partially, Partially, Partially, Partially,
                Fully,
            ],
        );
    }

    #[test]
    fn test_tag_with_attribute() {
        let mut expected = vec![First];
        expected.extend(std::iter::repeat(Partially).take(13));
        expected.push(Fully);
        assert_statuses(&HtmlTagMatcher::new("table"), "<table id=\"10\">", &expected);
    }

    #[test]
    fn test_tag_failures() {
        let matcher = HtmlTagMatcher::new("table");
        assert_statuses(&matcher, "table", &[NoMatch; 5]);
        assert_statuses(
            &matcher,
            "<tuble>",
            &[First, Partially, NoMatch, NoMatch, NoMatch, NoMatch, NoMatch],
        );
        assert_statuses(
            &matcher,
            "<table2>",
            &[First, Partially, Partially, Partially, Partially, Partially, Partially, NoMatch],
        );
    }

    #[test]
    fn test_tag_match_in_the_middle() {
        let mut expected = vec![First, NoMatch, NoMatch, NoMatch, NoMatch, NoMatch];
        expected.extend([First, Partially, Partially, Partially, Partially, Partially, Fully]);
        expected.extend([First, NoMatch, NoMatch, NoMatch, NoMatch, NoMatch]);
        assert_statuses(&HtmlTagMatcher::new("table"), "<head><table><html>", &expected);
    }

    #[test]
    fn test_tag_restarts_on_new_bracket() {
        assert_statuses(
            &HtmlTagMatcher::new("table"),
            "<table <a>",
            &[
                First, Partially, Partially, Partially, Partially, Partially, Partially, First,
                NoMatch, NoMatch,
            ],
        );
    }

    #[test]
    fn test_tag_multibyte_attribute() {
        let mut expected = vec![First];
        expected.extend(std::iter::repeat(Partially).take(14));
        expected.push(Fully);
        assert_statuses(&HtmlTagMatcher::new("bigpipe"), "<bigpipe é=\"é\"/>", &expected);
    }

    #[test]
    fn test_tag_prefix_case_insensitive() {
        assert_eq!(HtmlTagMatcher::new("table").classify("<TABLE>"), Fully);
    }

    #[test]
    fn test_close_tag() {
        let matcher = HtmlCloseTagMatcher::new("table");
        assert_statuses(
            &matcher,
            "</table>",
            &[First, Partially, Partially, Partially, Partially, Partially, Partially, Fully],
        );
        assert_eq!(matcher.classify("</table >"), Fully);
        assert_eq!(matcher.classify("</tables>"), NoMatch);
    }

    #[test]
    fn test_open_and_close_are_distinct() {
        assert_eq!(HtmlTagMatcher::new("body").classify("</body>"), NoMatch);
        assert_eq!(HtmlCloseTagMatcher::new("body").classify("<body>"), NoMatch);
    }

    #[test]
    fn test_custom_parser_rejects() {
        struct RejectAll;
        impl TagParser for RejectAll {
            fn parse(&self, _candidate: &str) -> Option<crate::streaming::ParsedTag> {
                None
            }
        }

        let matcher = HtmlTagMatcher::with_parser("table", Arc::new(RejectAll));
        assert_eq!(matcher.classify("<table"), Partially);
        assert_eq!(matcher.classify("<table>"), NoMatch);
    }

    #[test]
    fn test_invalid_tag_name() {
        assert!(HtmlTagMatcher::new("placeholder").validate().is_ok());
        assert_eq!(
            HtmlCloseTagMatcher::new("bo dy").validate(),
            Err(MatchConfigError::InvalidTagName("bo dy".to_string()))
        );
        assert!(HtmlTagMatcher::new("").validate().is_err());
    }
}
