use crate::error::{HarError, Result};
use crate::scanner::source::Source;
use crate::scanner::{Token, TokenScanner};

/// Kind of an open container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

impl Container {
    fn close(self) -> u8 {
        match self {
            Container::Object => b'}',
            Container::Array => b']',
        }
    }
}

/// What the innermost container accepts next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// Just opened: first member or immediate close
    FirstOrClose,
    /// After a member: separator or close
    CommaOrClose,
    /// After a comma inside an object
    Key,
    /// After a colon, or after a comma inside an array
    Value,
}

/// Bookkeeping for one nesting level
#[derive(Debug, Clone, Copy)]
struct Frame {
    container: Container,
    expect: Expect,
}

/// Outcome of consuming separators up to the next significant byte
enum Next {
    Key,
    Value(u8),
    Close(Container),
    End,
}

/// Pull-based JSON lexer over any [`Source`].
///
/// Separators are validated and consumed; values can be tokenized, skipped by
/// depth counting, or captured as raw bytes for a typed decode.
pub struct Scanner<S> {
    src: S,
    stack: Vec<Frame>,
    scratch: Vec<u8>,
}

impl<S: Source> Scanner<S> {
    pub fn new(src: S) -> Self {
        Self {
            src,
            stack: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn into_source(self) -> S {
        self.src
    }

    fn truncated(&self) -> HarError {
        HarError::TruncatedFile {
            offset: self.src.offset(),
        }
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            let buf = self.src.fill()?;
            if buf.is_empty() {
                return Ok(None);
            }
            match buf.iter().position(|b| !is_whitespace(*b)) {
                Some(i) => {
                    let b = buf[i];
                    self.src.consume(i);
                    return Ok(Some(b));
                }
                None => {
                    let n = buf.len();
                    self.src.consume(n);
                }
            }
        }
    }

    /// Consume whitespace and separators; never consumes a key or value
    fn prelude(&mut self) -> Result<Next> {
        loop {
            let Some(b) = self.skip_whitespace()? else {
                return if self.stack.is_empty() {
                    Ok(Next::End)
                } else {
                    Err(self.truncated())
                };
            };
            let at = self.src.offset();
            let Some(frame) = self.stack.last_mut() else {
                return Ok(Next::Value(b));
            };

            match frame.expect {
                Expect::FirstOrClose | Expect::CommaOrClose if b == frame.container.close() => {
                    return Ok(Next::Close(frame.container));
                }
                Expect::CommaOrClose => {
                    if b != b',' {
                        return Err(malformed(
                            at,
                            format!(
                                "expected ',' or '{}', found {}",
                                frame.container.close() as char,
                                describe(b)
                            ),
                        ));
                    }
                    self.src.consume(1);
                    frame.expect = match frame.container {
                        Container::Object => Expect::Key,
                        Container::Array => Expect::Value,
                    };
                }
                Expect::FirstOrClose | Expect::Key if frame.container == Container::Object => {
                    return if b == b'"' {
                        Ok(Next::Key)
                    } else {
                        Err(malformed(at, format!("expected object key, found {}", describe(b))))
                    };
                }
                Expect::FirstOrClose | Expect::Key | Expect::Value => return Ok(Next::Value(b)),
            }
        }
    }

    /// The parent container has received one more member
    fn mark_member_done(&mut self) {
        if let Some(frame) = self.stack.last_mut() {
            frame.expect = Expect::CommaOrClose;
        }
    }

    /// Consume a string starting at its opening quote, optionally copying the
    /// raw bytes (quotes included). Returns whether any escape was seen.
    fn scan_string(&mut self, mut sink: Option<&mut Vec<u8>>) -> Result<bool> {
        self.src.consume(1);
        if let Some(out) = sink.as_deref_mut() {
            out.push(b'"');
        }

        let mut escaped = false;
        loop {
            let buf = self.src.fill()?;
            if buf.is_empty() {
                return Err(self.truncated());
            }
            match memchr::memchr2(b'"', b'\\', buf) {
                Some(i) if buf[i] == b'"' => {
                    if let Some(out) = sink.as_deref_mut() {
                        out.extend_from_slice(&buf[..=i]);
                    }
                    self.src.consume(i + 1);
                    return Ok(escaped);
                }
                Some(i) => {
                    if let Some(out) = sink.as_deref_mut() {
                        out.extend_from_slice(&buf[..=i]);
                    }
                    self.src.consume(i + 1);
                    escaped = true;

                    // The escaped byte may live in the next buffer
                    let buf = self.src.fill()?;
                    let Some(&next) = buf.first() else {
                        return Err(self.truncated());
                    };
                    if let Some(out) = sink.as_deref_mut() {
                        out.push(next);
                    }
                    self.src.consume(1);
                }
                None => {
                    let n = buf.len();
                    if let Some(out) = sink.as_deref_mut() {
                        out.extend_from_slice(buf);
                    }
                    self.src.consume(n);
                }
            }
        }
    }

    /// Consume a number or literal up to the next delimiter
    fn scan_bare(&mut self, mut sink: Option<&mut Vec<u8>>) -> Result<usize> {
        let mut total = 0;
        loop {
            let buf = self.src.fill()?;
            if buf.is_empty() {
                return Ok(total);
            }
            let len = buf.len();
            let end = buf.iter().position(|b| is_delimiter(*b)).unwrap_or(len);
            if let Some(out) = sink.as_deref_mut() {
                out.extend_from_slice(&buf[..end]);
            }
            self.src.consume(end);
            total += end;
            if end < len {
                return Ok(total);
            }
        }
    }

    /// Consume a whole object or array by depth counting
    fn scan_container(&mut self, mut sink: Option<&mut Vec<u8>>) -> Result<()> {
        let mut depth = 0usize;
        loop {
            let buf = self.src.fill()?;
            if buf.is_empty() {
                return Err(self.truncated());
            }

            let mut i = 0;
            let mut at_string = false;
            while i < buf.len() {
                match buf[i] {
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth -= 1;
                        if depth == 0 {
                            if let Some(out) = sink.as_deref_mut() {
                                out.extend_from_slice(&buf[..=i]);
                            }
                            self.src.consume(i + 1);
                            return Ok(());
                        }
                    }
                    b'"' => {
                        at_string = true;
                        break;
                    }
                    _ => {}
                }
                i += 1;
            }

            if let Some(out) = sink.as_deref_mut() {
                out.extend_from_slice(&buf[..i]);
            }
            self.src.consume(i);
            if at_string {
                self.scan_string(sink.as_deref_mut())?;
            }
        }
    }

    /// Consume one complete value without tokenizing it
    fn scan_value(&mut self, first: u8, sink: Option<&mut Vec<u8>>) -> Result<()> {
        let at = self.src.offset();
        match first {
            b'"' => self.scan_string(sink).map(|_| ()),
            b'{' | b'[' => self.scan_container(sink),
            _ => match self.scan_bare(sink)? {
                0 => Err(malformed(at, format!("unexpected {}", describe(first)))),
                _ => Ok(()),
            },
        }
    }

    fn read_string(&mut self) -> Result<String> {
        let at = self.src.offset();
        let mut raw = std::mem::take(&mut self.scratch);
        raw.clear();

        let escaped = self.scan_string(Some(&mut raw));
        let decoded = escaped.and_then(|escaped| {
            if escaped {
                serde_json::from_slice::<String>(&raw)
                    .map_err(|e| malformed(at, e.to_string()))
            } else {
                std::str::from_utf8(&raw[1..raw.len() - 1])
                    .map(str::to_owned)
                    .map_err(|e| malformed(at, e.to_string()))
            }
        });

        self.scratch = raw;
        decoded
    }

    fn read_scalar(&mut self, first: u8) -> Result<Token> {
        let at = self.src.offset();
        let mut raw = std::mem::take(&mut self.scratch);
        raw.clear();

        let token = self.scan_bare(Some(&mut raw)).and_then(|_| match raw.as_slice() {
            b"true" => Ok(Token::Bool(true)),
            b"false" => Ok(Token::Bool(false)),
            b"null" => Ok(Token::Null),
            _ if first == b'-' || first.is_ascii_digit() => {
                serde_json::from_slice::<serde_json::Number>(&raw)
                    .map(Token::Number)
                    .map_err(|e| malformed(at, e.to_string()))
            }
            _ => Err(malformed(at, format!("unexpected {}", describe(first)))),
        });

        self.scratch = raw;
        token
    }

    fn open(&mut self, container: Container) {
        self.src.consume(1);
        self.stack.push(Frame {
            container,
            expect: Expect::FirstOrClose,
        });
    }

    fn expect_value(&mut self, what: &str) -> Result<u8> {
        let at = self.src.offset();
        match self.prelude()? {
            Next::Value(b) => Ok(b),
            Next::Key => Err(malformed(at, format!("expected {}, found an object key", what))),
            Next::Close(c) => Err(malformed(
                at,
                format!("expected {}, found '{}'", what, c.close() as char),
            )),
            Next::End => Err(self.truncated()),
        }
    }
}

impl<S: Source> TokenScanner for Scanner<S> {
    fn reposition(&mut self, offset: u64) -> Result<()> {
        self.src.seek_to(offset)?;
        self.stack.clear();
        Ok(())
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        match self.prelude()? {
            Next::End => Ok(None),
            Next::Close(container) => {
                self.src.consume(1);
                self.stack.pop();
                Ok(Some(match container {
                    Container::Object => Token::EndObject,
                    Container::Array => Token::EndArray,
                }))
            }
            Next::Key => {
                let key = self.read_string()?;
                let at = self.src.offset();
                match self.skip_whitespace()? {
                    Some(b':') => self.src.consume(1),
                    Some(other) => {
                        return Err(malformed(
                            at,
                            format!("expected ':' after key, found {}", describe(other)),
                        ));
                    }
                    None => return Err(self.truncated()),
                }
                if let Some(frame) = self.stack.last_mut() {
                    frame.expect = Expect::Value;
                }
                Ok(Some(Token::Key(key)))
            }
            Next::Value(b) => {
                self.mark_member_done();
                let token = match b {
                    b'{' => {
                        self.open(Container::Object);
                        Token::BeginObject
                    }
                    b'[' => {
                        self.open(Container::Array);
                        Token::BeginArray
                    }
                    b'"' => Token::String(self.read_string()?),
                    _ => self.read_scalar(b)?,
                };
                Ok(Some(token))
            }
        }
    }

    fn more(&mut self) -> Result<bool> {
        Ok(matches!(self.prelude()?, Next::Key | Next::Value(_)))
    }

    fn value_start(&mut self) -> Result<u64> {
        self.expect_value("a value")?;
        Ok(self.src.offset())
    }

    fn peek_value(&mut self) -> Result<u8> {
        self.expect_value("a value")
    }

    fn skip(&mut self) -> Result<()> {
        let first = self.expect_value("a value to skip")?;
        self.mark_member_done();
        self.scan_value(first, None)
    }

    fn capture(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let first = self.expect_value("a value to capture")?;
        self.mark_member_done();
        self.scan_value(first, Some(out))
    }

    fn position(&self) -> u64 {
        self.src.offset()
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }
}

fn malformed(offset: u64, reason: impl Into<String>) -> HarError {
    HarError::MalformedJson {
        offset,
        reason: reason.into(),
    }
}

#[inline]
fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

#[inline]
fn is_delimiter(b: u8) -> bool {
    is_whitespace(b) || matches!(b, b',' | b':' | b'{' | b'}' | b'[' | b']' | b'"')
}

fn describe(b: u8) -> String {
    if b.is_ascii_graphic() {
        format!("'{}'", b as char)
    } else {
        format!("byte 0x{:02x}", b)
    }
}
