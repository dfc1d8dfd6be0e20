//! Output sinks
//!
//! The engine writes decoded text to an [`OutputSink`]. Byte-oriented
//! writers are adapted with [`EncodingSink`], which re-encodes the text in
//! the response charset.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::charset::Charset;

/// Destination for filtered text
pub trait OutputSink {
    fn write_str(&mut self, text: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputSink for String {
    fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.push_str(text);
        Ok(())
    }
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn write_str(&mut self, text: &str) -> io::Result<()> {
        (**self).write_str(text)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn write_str(&mut self, text: &str) -> io::Result<()> {
        (**self).write_str(text)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Encodes text into an `io::Write`
pub struct EncodingSink<W> {
    inner: W,
    charset: Charset,
    scratch: Vec<u8>,
}

impl<W: io::Write> EncodingSink<W> {
    pub fn new(inner: W, charset: Charset) -> Self {
        Self {
            inner,
            charset,
            scratch: Vec::new(),
        }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write> OutputSink for EncodingSink<W> {
    fn write_str(&mut self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.scratch.clear();
        self.charset.encode_into(text, &mut self.scratch);
        self.inner.write_all(&self.scratch)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Thread-safe text buffer, cloneable handle.
///
/// Used where output produced on worker threads has to be collected before
/// it is written to the response.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<String>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected text, leaving the buffer empty
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl OutputSink for SharedBuffer {
    fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.inner.lock().push_str(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_sink() {
        let mut out = String::new();
        out.write_str("a").unwrap();
        OutputSink::write_str(&mut &mut out, "b").unwrap();
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_encoding_sink_latin1() {
        let mut sink = EncodingSink::new(Vec::new(), Charset::Latin1);
        sink.write_str("olá").unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.into_inner(), vec![b'o', b'l', 0xE1]);
    }

    #[test]
    fn test_shared_buffer_take() {
        let buffer = SharedBuffer::new();
        let mut handle = buffer.clone();
        handle.write_str("<p>late</p>").unwrap();

        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.take(), "<p>late</p>");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_boxed_sink() {
        let mut sink: Box<dyn OutputSink> = Box::new(SharedBuffer::new());
        sink.write_str("x").unwrap();
        assert!(sink.flush().is_ok());
    }
}
