//! Streaming access to a response body without loading the entry.

use std::io::{self, BufRead, Read};

/// Decodes the contents of a JSON string literal on the fly.
///
/// The inner reader must start just after the opening quote; reading stops
/// at the closing quote.
pub struct JsonStringReader<R> {
    inner: R,
    done: bool,
    pending: [u8; 4],
    pending_pos: usize,
    pending_len: usize,
}

impl<R: BufRead> JsonStringReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            done: false,
            pending: [0; 4],
            pending_pos: 0,
            pending_len: 0,
        }
    }

    /// A reader that yields nothing
    pub fn finished(inner: R) -> Self {
        let mut reader = Self::new(inner);
        reader.done = true;
        reader
    }

    fn next_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.inner.read_exact(&mut byte).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                invalid("string ends inside an escape sequence")
            } else {
                e
            }
        })?;
        Ok(byte[0])
    }

    fn hex4(&mut self) -> io::Result<u16> {
        let mut value = 0u16;
        for _ in 0..4 {
            let digit = (self.next_byte()? as char)
                .to_digit(16)
                .ok_or_else(|| invalid("bad \\u escape"))?;
            value = (value << 4) | digit as u16;
        }
        Ok(value)
    }

    /// Decode one escape; the backslash is already consumed
    fn unescape(&mut self) -> io::Result<()> {
        let decoded = match self.next_byte()? {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => self.unicode_escape()?,
            other => return Err(invalid(&format!("unknown escape \\{}", other as char))),
        };
        self.pending_len = decoded.encode_utf8(&mut self.pending).len();
        self.pending_pos = 0;
        Ok(())
    }

    fn unicode_escape(&mut self) -> io::Result<char> {
        let high = self.hex4()?;
        if !(0xD800..0xDC00).contains(&high) {
            return Ok(char::from_u32(high as u32).unwrap_or(char::REPLACEMENT_CHARACTER));
        }
        // Surrogate pair: the low half must follow as another \u escape
        if self.next_byte()? != b'\\' || self.next_byte()? != b'u' {
            return Err(invalid("unpaired surrogate"));
        }
        let low = self.hex4()?;
        if !(0xDC00..0xE000).contains(&low) {
            return Err(invalid("unpaired surrogate"));
        }
        let code = 0x10000 + (((high as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }
}

impl<R: BufRead> Read for JsonStringReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < out.len() {
            if self.pending_pos < self.pending_len {
                let n = (self.pending_len - self.pending_pos).min(out.len() - written);
                out[written..written + n]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                written += n;
                continue;
            }
            if self.done {
                break;
            }

            let buf = self.inner.fill_buf()?;
            if buf.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "body ends before its closing quote",
                ));
            }

            match memchr::memchr2(b'"', b'\\', buf) {
                Some(0) if buf[0] == b'"' => {
                    self.inner.consume(1);
                    self.done = true;
                }
                Some(0) => {
                    self.inner.consume(1);
                    self.unescape()?;
                }
                found => {
                    let run = found.unwrap_or(buf.len()).min(out.len() - written);
                    out[written..written + run].copy_from_slice(&buf[..run]);
                    self.inner.consume(run);
                    written += run;
                }
            }
        }
        Ok(written)
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// A readable response body plus what the HAR says about its encoding
pub struct BodyStream<R> {
    reader: JsonStringReader<R>,
    /// `content.encoding`, e.g. `base64`
    pub encoding: Option<String>,
    pub mime_type: Option<String>,
    /// Length of the escaped body in the file
    pub raw_len: u64,
}

impl<R: BufRead> BodyStream<R> {
    pub fn new(
        reader: JsonStringReader<R>,
        encoding: Option<String>,
        mime_type: Option<String>,
        raw_len: u64,
    ) -> Self {
        Self {
            reader,
            encoding,
            mime_type,
            raw_len,
        }
    }

    pub fn is_base64(&self) -> bool {
        self.encoding
            .as_deref()
            .is_some_and(|enc| enc.eq_ignore_ascii_case("base64"))
    }
}

impl<R: BufRead> Read for BodyStream<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.reader.read(out)
    }
}
