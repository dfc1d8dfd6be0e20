//! Streaming module for response body rewriting
//!
//! This module provides streaming primitives that:
//! - Decode bytes incrementally, multi-byte characters split across chunks
//! - Track any number of patterns in one pass per character
//! - Hold back only what a pending match still needs (bounded per pattern)

pub mod byte_decoder;
pub mod charset;
pub mod engine;
pub mod matcher;
pub mod sink;
pub mod stream;
pub mod tag_parser;

pub use byte_decoder::ByteDecoder;
pub use charset::Charset;
pub use engine::{EngineBuilder, Listener, MatchContext, StreamEngine, DEFAULT_BUFFER_LIMIT};
pub use matcher::{HtmlCloseTagMatcher, HtmlTagMatcher, MatchStatus, StreamMatcher, TextMatcher};
pub use sink::{EncodingSink, OutputSink, SharedBuffer};
pub use stream::{DecodingOutputStream, DecodingWriter};
pub use tag_parser::{ParsedTag, SimpleTagParser, TagKind, TagParser};
