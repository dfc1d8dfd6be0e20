//! Charsets supported for response decoding
//!
//! Byte-Order-Marks are NOT supported: the first bytes of a response are
//! always treated as content.

use std::fmt;

/// Character encoding of a filtered response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// UTF-8 (1-4 bytes per character)
    #[default]
    Utf8,
    /// ISO-8859-1 (one byte per character, all bytes mapped)
    Latin1,
    /// US-ASCII (one byte per character, bytes >= 0x80 rejected)
    Ascii,
}

impl Charset {
    /// Look up a charset by one of its common labels (case-insensitive)
    pub fn for_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Some(Charset::Latin1),
            "us-ascii" | "ascii" => Some(Charset::Ascii),
            _ => None,
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
        }
    }

    /// Maximum number of bytes a single character can take
    pub fn max_char_size(&self) -> usize {
        match self {
            Charset::Utf8 => 4,
            Charset::Latin1 | Charset::Ascii => 1,
        }
    }

    /// Encode text, appending to `out`.
    ///
    /// Characters with no mapping in the charset are replaced with `?`.
    pub fn encode_into(&self, text: &str, out: &mut Vec<u8>) {
        match self {
            Charset::Utf8 => out.extend_from_slice(text.as_bytes()),
            Charset::Latin1 => out.extend(
                text.chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?')),
            ),
            Charset::Ascii => out.extend(
                text.chars()
                    .map(|c| if c.is_ascii() { c as u8 } else { b'?' }),
            ),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_label() {
        assert_eq!(Charset::for_label("UTF-8"), Some(Charset::Utf8));
        assert_eq!(Charset::for_label(" utf8 "), Some(Charset::Utf8));
        assert_eq!(Charset::for_label("ISO-8859-1"), Some(Charset::Latin1));
        assert_eq!(Charset::for_label("US-ASCII"), Some(Charset::Ascii));
        assert_eq!(Charset::for_label("EBCDIC"), None);
    }

    #[test]
    fn test_encode_latin1() {
        let mut out = Vec::new();
        Charset::Latin1.encode_into("Olá €", &mut out);
        assert_eq!(out, vec![b'O', b'l', 0xE1, b' ', b'?']);
    }

    #[test]
    fn test_encode_ascii_replaces() {
        let mut out = Vec::new();
        Charset::Ascii.encode_into("né", &mut out);
        assert_eq!(out, b"n?");
    }

    #[test]
    fn test_encode_utf8() {
        let mut out = Vec::new();
        Charset::Utf8.encode_into("Olá 🦀", &mut out);
        assert_eq!(out, "Olá 🦀".as_bytes());
    }
}
