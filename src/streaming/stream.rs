//! Stream entry points
//!
//! [`DecodingOutputStream`] takes bytes, decodes them and writes the filtered
//! text re-encoded into an `io::Write`. [`DecodingWriter`] takes characters
//! directly and writes to any [`OutputSink`].

use std::io;

use super::byte_decoder::ByteDecoder;
use super::charset::Charset;
use super::engine::{EngineBuilder, StreamEngine};
use super::sink::{EncodingSink, OutputSink};
use crate::error::{DecodeError, DecodeFailure, MatchConfigError, StreamError};

/// Byte-oriented filtering stream
pub struct DecodingOutputStream<W: io::Write> {
    decoder: ByteDecoder,
    engine: StreamEngine<EncodingSink<W>>,
}

impl<W: io::Write> DecodingOutputStream<W> {
    /// Build the engine from `bindings`, decoding and re-encoding with `charset`
    pub fn new(
        bindings: EngineBuilder,
        writer: W,
        charset: Charset,
    ) -> Result<Self, MatchConfigError> {
        Ok(Self {
            decoder: ByteDecoder::new(charset),
            engine: bindings.build(EncodingSink::new(writer, charset))?,
        })
    }

    /// Feed one byte
    pub fn write_byte(&mut self, byte: u8) -> Result<(), StreamError> {
        match self.decoder.decode_byte(byte) {
            Ok(Some(c)) => Ok(self.engine.process_char(c)?),
            Ok(None) => Ok(()),
            Err(reason) => Err(self.decode_error(reason).into()),
        }
    }

    /// Feed a slice of bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    fn decode_error(&self, reason: DecodeFailure) -> DecodeError {
        DecodeError {
            bytes: self.decoder.pending().to_vec(),
            charset: self.decoder.charset(),
            buffered: self.engine.buffered().to_string(),
            reason,
        }
    }

    /// Write everything buffered by the engine, then flush
    pub fn flush_buffer(&mut self) -> Result<(), StreamError> {
        self.engine.flush_buffer()?;
        self.engine.flush()?;
        Ok(())
    }

    /// Text held back while a match is pending
    pub fn buffered(&self) -> &str {
        self.engine.buffered()
    }

    /// Bytes received that do not form a character yet
    pub fn pending_bytes(&self) -> &[u8] {
        self.decoder.pending()
    }

    pub fn charset(&self) -> Charset {
        self.decoder.charset()
    }

    /// Underlying writer
    pub fn get_ref(&self) -> &W {
        self.engine.output().get_ref()
    }

    pub fn get_mut(&mut self) -> &mut W {
        self.engine.output_mut().get_mut()
    }

    /// Sink the engine writes to, for listeners wired outside the engine
    pub fn output_mut(&mut self) -> &mut EncodingSink<W> {
        self.engine.output_mut()
    }

    /// Write all buffered content, flush and return the writer.
    ///
    /// Fails if the stream ends in the middle of a character.
    pub fn close(mut self) -> Result<W, StreamError> {
        self.engine.flush_buffer()?;
        self.engine.flush()?;
        if self.decoder.has_pending() {
            return Err(self.decode_error(DecodeFailure::Incomplete).into());
        }
        Ok(self.engine.into_output().into_inner())
    }
}

impl<W: io::Write> io::Write for DecodingOutputStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    /// Propagates the flush without writing buffered content
    fn flush(&mut self) -> io::Result<()> {
        self.engine.flush()
    }
}

/// Character-oriented filtering writer
pub struct DecodingWriter<S: OutputSink> {
    engine: StreamEngine<S>,
}

impl<S: OutputSink> DecodingWriter<S> {
    pub fn new(bindings: EngineBuilder, sink: S) -> Result<Self, MatchConfigError> {
        Ok(Self {
            engine: bindings.build(sink)?,
        })
    }

    pub fn write_char(&mut self, c: char) -> Result<(), StreamError> {
        Ok(self.engine.process_char(c)?)
    }

    pub fn write_str(&mut self, text: &str) -> Result<(), StreamError> {
        Ok(self.engine.process_str(text)?)
    }

    /// Propagates the flush without writing buffered content
    pub fn flush(&mut self) -> Result<(), StreamError> {
        Ok(self.engine.flush()?)
    }

    pub fn buffered(&self) -> &str {
        self.engine.buffered()
    }

    pub fn sink(&self) -> &S {
        self.engine.output()
    }

    /// Write all buffered content, flush and return the sink
    pub fn close(mut self) -> Result<S, StreamError> {
        self.engine.flush_buffer()?;
        self.engine.flush()?;
        Ok(self.engine.into_output())
    }
}
