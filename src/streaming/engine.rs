//! Multi-pattern stream engine
//!
//! Every character is appended to a global buffer and to the buffer of each
//! matching slot, then classified by every slot's matcher in binding order.
//!
//! - A FULLY matching slot stops the scan (first registered wins). The part
//!   of the global buffer before the match is written, the slot listener
//!   runs on the matched text, the (possibly rewritten) text is written and
//!   everything is reset.
//! - With no slot matching at all, the global buffer is written out.
//! - Otherwise only the part of the global buffer longer than the longest
//!   partial match is written, the rest stays buffered.
//!
//! Slot buffers are always suffixes of the global buffer, so the part to
//! write is a plain byte offset into it.

use std::io;

use super::matcher::{MatchStatus, StreamMatcher};
use super::sink::OutputSink;
use crate::error::MatchConfigError;

/// Characters a slot may buffer before a partial match is abandoned
pub const DEFAULT_BUFFER_LIMIT: usize = 64;

/// Callback invoked with the fully matched text
pub type Listener = Box<dyn FnMut(&mut MatchContext<'_>) -> io::Result<()>>;

/// What a listener sees of a match.
///
/// The content is written to the output once the listener returns, so a
/// listener rewrites the match by changing it. Text written through
/// [`MatchContext::output`] goes out before the content.
pub struct MatchContext<'a> {
    content: &'a mut String,
    output: &'a mut (dyn OutputSink + 'a),
    flush_requested: bool,
}

impl<'a> MatchContext<'a> {
    pub fn new(content: &'a mut String, output: &'a mut (dyn OutputSink + 'a)) -> Self {
        Self {
            content,
            output,
            flush_requested: false,
        }
    }

    /// Matched text
    pub fn content(&self) -> &str {
        self.content.as_str()
    }

    pub fn content_mut(&mut self) -> &mut String {
        &mut *self.content
    }

    /// Drop the matched text from the output
    pub fn clear(&mut self) {
        self.content.clear();
    }

    /// Write `text` instead of the matched text
    pub fn replace(&mut self, text: impl Into<String>) {
        *self.content = text.into();
    }

    pub fn prepend(&mut self, text: &str) {
        self.content.insert_str(0, text);
    }

    pub fn append(&mut self, text: &str) {
        self.content.push_str(text);
    }

    /// Sink the engine writes to
    pub fn output(&mut self) -> &mut (dyn OutputSink + 'a) {
        &mut *self.output
    }

    /// Flush the output after the content is written
    pub fn request_flush(&mut self) {
        self.flush_requested = true;
    }

    pub fn flush_requested(&self) -> bool {
        self.flush_requested
    }
}

/// Accumulation state of one (matcher, listener) binding
struct MatchingSlot {
    matcher: Box<dyn StreamMatcher>,
    listener: Listener,
    buffer: String,
    /// Buffer length in characters
    chars: usize,
}

impl MatchingSlot {
    fn new(matcher: Box<dyn StreamMatcher>, listener: Listener) -> Self {
        Self {
            matcher,
            listener,
            buffer: String::new(),
            chars: 0,
        }
    }

    /// Append a character and classify the buffer.
    ///
    /// The buffer is left holding the current candidate: empty after a
    /// failure, restarted at the last character when that character opens a
    /// new candidate.
    fn push(&mut self, c: char, limit: usize) -> MatchStatus {
        self.buffer.push(c);
        self.chars += 1;

        let mut status = self.matcher.classify(&self.buffer);
        if status == MatchStatus::None && self.chars > 1 {
            // the character that broke the match may start a new one
            self.restart_at_last();
            status = self.matcher.classify(&self.buffer);
        }
        if status == MatchStatus::First && self.chars > 1 {
            self.restart_at_last();
        }

        match status {
            MatchStatus::None => {
                self.reset();
                MatchStatus::None
            }
            MatchStatus::Fully => MatchStatus::Fully,
            _ if self.chars >= limit => {
                self.reset();
                MatchStatus::None
            }
            partial => partial,
        }
    }

    fn restart_at_last(&mut self) {
        if let Some(last) = self.buffer.chars().next_back() {
            let start = self.buffer.len() - last.len_utf8();
            self.buffer.drain(..start);
            self.chars = 1;
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.chars = 0;
    }
}

/// Collects bindings, finalized once into a [`StreamEngine`]
pub struct EngineBuilder {
    bindings: Vec<(Box<dyn StreamMatcher>, Listener)>,
    buffer_limit: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }

    /// Bind a listener to a matcher. Binding order breaks ties between
    /// matchers completing on the same character.
    pub fn bind<M, F>(mut self, matcher: M, listener: F) -> Self
    where
        M: StreamMatcher + 'static,
        F: FnMut(&mut MatchContext<'_>) -> io::Result<()> + 'static,
    {
        self.bindings.push((Box::new(matcher), Box::new(listener)));
        self
    }

    /// Maximum characters buffered per slot
    pub fn buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit;
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Validate the bindings and start an engine writing to `output`
    pub fn build<S: OutputSink>(self, output: S) -> Result<StreamEngine<S>, MatchConfigError> {
        if self.buffer_limit == 0 {
            return Err(MatchConfigError::ZeroBufferLimit);
        }
        for (matcher, _) in &self.bindings {
            matcher.validate()?;
        }

        Ok(StreamEngine {
            slots: self
                .bindings
                .into_iter()
                .map(|(matcher, listener)| MatchingSlot::new(matcher, listener))
                .collect(),
            global: String::new(),
            limit: self.buffer_limit,
            output,
        })
    }
}

/// Character-driven matching engine
pub struct StreamEngine<S> {
    slots: Vec<MatchingSlot>,
    /// Characters not yet written to the output
    global: String,
    limit: usize,
    output: S,
}

impl<S: OutputSink> StreamEngine<S> {
    /// Process one character
    pub fn process_char(&mut self, c: char) -> io::Result<()> {
        self.global.push(c);

        let mut full = None;
        let mut partial = false;
        let mut longest = 0;

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            match slot.push(c, self.limit) {
                MatchStatus::Fully => {
                    full = Some(idx);
                    break;
                }
                MatchStatus::First | MatchStatus::Partially => {
                    partial = true;
                    longest = longest.max(slot.buffer.len());
                }
                MatchStatus::None => {}
            }
        }

        if let Some(idx) = full {
            self.emit_match(idx)
        } else if !partial {
            self.flush_buffer()
        } else if longest < self.global.len() {
            let excess = self.global.len() - longest;
            self.output.write_str(&self.global[..excess])?;
            self.global.drain(..excess);
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Process every character of `text`
    pub fn process_str(&mut self, text: &str) -> io::Result<()> {
        for c in text.chars() {
            self.process_char(c)?;
        }
        Ok(())
    }

    fn emit_match(&mut self, idx: usize) -> io::Result<()> {
        let slot = &mut self.slots[idx];
        let prefix = self.global.len() - slot.buffer.len();
        if prefix > 0 {
            self.output.write_str(&self.global[..prefix])?;
        }

        let mut content = std::mem::take(&mut slot.buffer);
        let mut ctx = MatchContext::new(&mut content, &mut self.output);
        let outcome = (slot.listener)(&mut ctx);
        let flush = ctx.flush_requested();
        self.reset();
        outcome?;

        self.output.write_str(&content)?;
        if flush {
            self.output.flush()?;
        }
        Ok(())
    }

    /// Write the global buffer out and abandon all partial matches
    pub fn flush_buffer(&mut self) -> io::Result<()> {
        if !self.global.is_empty() {
            self.output.write_str(&self.global)?;
        }
        self.reset();
        Ok(())
    }

    /// Propagate a flush to the output without writing the buffer
    pub fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }

    fn reset(&mut self) {
        self.global.clear();
        for slot in &mut self.slots {
            slot.reset();
        }
    }

    /// Characters held back while a match is pending
    pub fn buffered(&self) -> &str {
        &self.global
    }

    pub fn buffer_limit(&self) -> usize {
        self.limit
    }

    pub fn binding_count(&self) -> usize {
        self.slots.len()
    }

    pub fn output(&self) -> &S {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut S {
        &mut self.output
    }

    /// Drop the engine and return its output. Buffered text is discarded,
    /// call [`StreamEngine::flush_buffer`] first to keep it.
    pub fn into_output(self) -> S {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{HtmlCloseTagMatcher, HtmlTagMatcher, TextMatcher};

    fn parens(ctx: &mut MatchContext<'_>) -> io::Result<()> {
        let wrapped = format!("({})", ctx.content());
        ctx.replace(wrapped);
        Ok(())
    }

    fn brackets(ctx: &mut MatchContext<'_>) -> io::Result<()> {
        ctx.prepend("[");
        ctx.append("]");
        Ok(())
    }

    fn run(builder: EngineBuilder, input: &str) -> String {
        let mut engine = builder.build(String::new()).unwrap();
        engine.process_str(input).unwrap();
        engine.flush_buffer().unwrap();
        engine.into_output()
    }

    fn bla_and(other: &str) -> EngineBuilder {
        EngineBuilder::new()
            .bind(TextMatcher::new("bla", true), parens)
            .bind(TextMatcher::new(other, true), brackets)
    }

    /// Sink recording how much text had been written at each flush
    #[derive(Default)]
    struct FlushRecorder {
        text: String,
        flushed_at: Vec<usize>,
    }

    impl OutputSink for FlushRecorder {
        fn write_str(&mut self, text: &str) -> io::Result<()> {
            self.text.push_str(text);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushed_at.push(self.text.len());
            Ok(())
        }
    }

    #[test]
    fn test_no_bindings_is_identity() {
        let input = "<html><body>Olá 🦀 <placeholder id=\"x\"/></body></html>";
        assert_eq!(run(EngineBuilder::new(), input), input);
    }

    #[test]
    fn test_builder_settings_carried_to_engine() {
        let engine = bla_and("lol").build(String::new()).unwrap();
        assert_eq!(engine.buffer_limit(), DEFAULT_BUFFER_LIMIT);
        assert_eq!(engine.binding_count(), 2);

        let engine = bla_and("lol").buffer_limit(5).build(String::new()).unwrap();
        assert_eq!(engine.buffer_limit(), 5);
    }

    #[test]
    fn test_match_in_the_middle() {
        let builder = EngineBuilder::new().bind(TextMatcher::new("bla", true), parens);
        assert_eq!(run(builder, "lablala"), "la(bla)la");

        let builder = EngineBuilder::new().bind(TextMatcher::new("bla", true), brackets);
        assert_eq!(run(builder, "lablala"), "la[bla]la");
    }

    #[test]
    fn test_two_candidates_one_completes() {
        assert_eq!(run(bla_and("blu"), "lablala"), "la(bla)la");
        assert_eq!(run(bla_and("blu"), "lablula"), "la[blu]la");
    }

    #[test]
    fn test_first_registered_wins() {
        assert_eq!(run(bla_and("bla2"), "labla2la"), "la(bla)2la");
    }

    #[test]
    fn test_overlapping_candidates() {
        assert_eq!(run(bla_and("lol"), "lablola"), "lab[lol]a");
        assert_eq!(run(bla_and("lol"), "lablalolbla"), "la(bla)[lol](bla)");
    }

    #[test]
    fn test_buffer_limit_abandons_longer_pattern() {
        assert_eq!(
            run(bla_and("lol2").buffer_limit(3), "lablalol2bla"),
            "la(bla)lol2(bla)"
        );
        assert_eq!(
            run(bla_and("labla").buffer_limit(3), "lablalol2bla"),
            "la(bla)lol2(bla)"
        );
    }

    #[test]
    fn test_buffer_limit_eviction() {
        let builder = EngineBuilder::new()
            .bind(TextMatcher::new("bla", true), parens)
            .buffer_limit(2);
        assert_eq!(run(builder, "blblala"), "blblala");
    }

    #[test]
    fn test_restart_on_repeated_character() {
        let builder = EngineBuilder::new().bind(TextMatcher::new("ab", true), brackets);
        assert_eq!(run(builder, "aab"), "a[ab]");
    }

    #[test]
    fn test_multibyte_pattern() {
        let builder = EngineBuilder::new().bind(TextMatcher::new("blá", true), parens);
        assert_eq!(run(builder, "blablá é"), "bla(blá) é");
    }

    #[test]
    fn test_partial_match_is_held_back() {
        let mut engine = EngineBuilder::new()
            .bind(TextMatcher::new("</body>", true), |_: &mut MatchContext<'_>| Ok(()))
            .build(String::new())
            .unwrap();

        engine.process_str("text</bo").unwrap();
        assert_eq!(engine.output(), "text");
        assert_eq!(engine.buffered(), "</bo");

        engine.flush_buffer().unwrap();
        assert_eq!(engine.output(), "text</bo");
        assert_eq!(engine.buffered(), "");
    }

    #[test]
    fn test_listener_writes_to_output_before_content() {
        let builder = EngineBuilder::new().bind(
            HtmlCloseTagMatcher::new("body"),
            |ctx: &mut MatchContext<'_>| ctx.output().write_str("<script/>"),
        );
        assert_eq!(
            run(builder, "<body>x</body></html>"),
            "<body>x<script/></body></html>"
        );
    }

    #[test]
    fn test_listener_requests_flush() {
        let mut engine = EngineBuilder::new()
            .bind(HtmlCloseTagMatcher::new("head"), |ctx: &mut MatchContext<'_>| {
                ctx.request_flush();
                Ok(())
            })
            .build(FlushRecorder::default())
            .unwrap();

        engine.process_str("<head></HeAd ><body>").unwrap();
        let recorder = engine.output();
        assert_eq!(recorder.flushed_at, vec!["<head></HeAd >".len()]);
    }

    #[test]
    fn test_listener_clears_content() {
        let builder = EngineBuilder::new().bind(
            HtmlTagMatcher::new("placeholder"),
            |ctx: &mut MatchContext<'_>| {
                ctx.clear();
                Ok(())
            },
        );
        assert_eq!(run(builder, "a<placeholder id=\"1\"/>b"), "ab");
    }

    #[test]
    fn test_listener_error_propagates() {
        let mut engine = EngineBuilder::new()
            .bind(TextMatcher::new("x", true), |_: &mut MatchContext<'_>| {
                Err(io::Error::new(io::ErrorKind::Other, "listener failed"))
            })
            .build(String::new())
            .unwrap();

        assert!(engine.process_str("abxcd").is_err());
        assert_eq!(engine.buffered(), "");
    }

    #[test]
    fn test_invalid_bindings_rejected() {
        let result = EngineBuilder::new()
            .bind(TextMatcher::new("", true), parens)
            .build(String::new());
        assert!(matches!(result, Err(MatchConfigError::EmptyPattern)));

        let result = EngineBuilder::new().buffer_limit(0).build(String::new());
        assert!(matches!(result, Err(MatchConfigError::ZeroBufferLimit)));
    }
}
