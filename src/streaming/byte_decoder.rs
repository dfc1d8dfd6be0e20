//! Incremental Byte Decoder
//!
//! CRITICAL: Multi-byte characters arrive one byte at a time and may be
//! split across response chunks. Bytes are accumulated in a fixed buffer
//! (max 4 bytes for UTF-8) until they form a complete character.
//!
//! A UTF-8 character can be 1-4 bytes:
//! - 1 byte:  0xxxxxxx (ASCII)
//! - 2 bytes: 110xxxxx 10xxxxxx
//! - 3 bytes: 1110xxxx 10xxxxxx 10xxxxxx
//! - 4 bytes: 11110xxx 10xxxxxx 10xxxxxx 10xxxxxx

use super::charset::Charset;
use crate::error::DecodeFailure;

/// Maximum character size supported, in bytes
pub const MAX_CHAR_SIZE: usize = 4;

/// Decodes characters from a stream of single bytes.
pub struct ByteDecoder {
    charset: Charset,
    /// Bytes of the character being assembled
    pending: [u8; MAX_CHAR_SIZE],
    /// Number of pending bytes
    pending_len: usize,
}

impl ByteDecoder {
    /// Create a decoder for the given charset
    pub fn new(charset: Charset) -> Self {
        Self {
            charset,
            pending: [0u8; MAX_CHAR_SIZE],
            pending_len: 0,
        }
    }

    /// Feed one byte.
    ///
    /// Returns `Ok(Some(c))` when the byte completes a character and
    /// `Ok(None)` when more bytes are needed. On error the offending bytes
    /// stay available through [`ByteDecoder::pending`].
    pub fn decode_byte(&mut self, byte: u8) -> Result<Option<char>, DecodeFailure> {
        if self.pending_len >= self.charset.max_char_size() {
            // only reachable after a previous failure was ignored
            return Err(DecodeFailure::Incomplete);
        }
        self.pending[self.pending_len] = byte;
        self.pending_len += 1;

        match self.charset {
            Charset::Utf8 => self.decode_utf8(),
            Charset::Latin1 => {
                self.pending_len = 0;
                Ok(Some(char::from(byte)))
            }
            Charset::Ascii => {
                if byte.is_ascii() {
                    self.pending_len = 0;
                    Ok(Some(char::from(byte)))
                } else {
                    Err(DecodeFailure::Unmappable)
                }
            }
        }
    }

    fn decode_utf8(&mut self) -> Result<Option<char>, DecodeFailure> {
        match std::str::from_utf8(&self.pending[..self.pending_len]) {
            Ok(decoded) => {
                let c = decoded.chars().next();
                self.pending_len = 0;
                Ok(c)
            }
            // valid prefix of a longer sequence: wait for the next byte
            Err(e) if e.error_len().is_none() => {
                if self.pending_len >= self.charset.max_char_size() {
                    Err(DecodeFailure::Incomplete)
                } else {
                    Ok(None)
                }
            }
            Err(_) => Err(DecodeFailure::Malformed),
        }
    }

    /// Bytes received that do not form a character yet
    pub fn pending(&self) -> &[u8] {
        &self.pending[..self.pending_len]
    }

    /// Whether a character is partially assembled
    pub fn has_pending(&self) -> bool {
        self.pending_len > 0
    }

    /// Charset being decoded
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Drop any partially assembled character
    pub fn reset(&mut self) {
        self.pending_len = 0;
    }
}
