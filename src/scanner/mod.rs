//! Pull-based JSON token scanner.
//!
//! The scanner can be repositioned at any byte offset, navigate a structural
//! path, skip whole values by depth counting, and hand the raw bytes of a
//! single value to serde. Two backends share one lexer:
//!
//! - [`ScannerKind::Buffered`] - `BufReader` over a seekable file
//! - [`ScannerKind::Mapped`] - memory-mapped file, strings skipped with `memchr2`

pub mod lexer;
pub mod source;

pub use lexer::Scanner;
pub use source::{BufferedSource, HashingReader, SliceSource, Source};

use crate::error::{HarError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// One lexical JSON token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
    Key(String),
    String(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

/// Scanner capability shared by every backend
pub trait TokenScanner: Send {
    /// Move to an absolute byte offset and forget all nesting state
    fn reposition(&mut self, offset: u64) -> Result<()>;

    /// Next token, or `None` at end of stream
    fn next_token(&mut self) -> Result<Option<Token>>;

    /// Whether the current container has another key or element
    fn more(&mut self) -> Result<bool>;

    /// Offset of the first byte of the next value
    fn value_start(&mut self) -> Result<u64>;

    /// First byte of the next value, left unconsumed
    fn peek_value(&mut self) -> Result<u8>;

    /// Discard the next value without materializing it
    fn skip(&mut self) -> Result<()>;

    /// Append the raw bytes of the next value to `out`
    fn capture(&mut self, out: &mut Vec<u8>) -> Result<()>;

    /// Offset of the next unconsumed byte
    fn position(&self) -> u64;

    /// Number of open containers
    fn depth(&self) -> usize;

    /// Descend through object keys and decimal array indices.
    ///
    /// On success the scanner sits just before the target value.
    fn navigate(&mut self, path: &[&str]) -> Result<()> {
        for segment in path {
            let missing = || HarError::NotFound {
                segment: segment.to_string(),
            };

            match self.next_token()? {
                Some(Token::BeginObject) => loop {
                    match self.next_token()? {
                        Some(Token::Key(key)) if key == *segment => break,
                        Some(Token::Key(_)) => self.skip()?,
                        _ => return Err(missing()),
                    }
                },
                Some(Token::BeginArray) => {
                    let target: usize = segment.parse().map_err(|_| missing())?;
                    for _ in 0..target {
                        if !self.more()? {
                            return Err(missing());
                        }
                        self.skip()?;
                    }
                    if !self.more()? {
                        return Err(missing());
                    }
                }
                _ => return Err(missing()),
            }
        }
        Ok(())
    }
}

/// Typed decoding on top of any scanner, trait objects included
pub trait TokenScannerExt: TokenScanner {
    /// Decode the next value with serde
    fn decode_current<T: DeserializeOwned>(&mut self) -> Result<T> {
        let offset = self.value_start()?;
        let mut raw = Vec::new();
        self.capture(&mut raw)?;
        serde_json::from_slice(&raw).map_err(|e| HarError::MalformedJson {
            offset,
            reason: e.to_string(),
        })
    }
}

impl<S: TokenScanner + ?Sized> TokenScannerExt for S {}

/// Backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    #[default]
    Buffered,
    Mapped,
}

/// Open a scanner over a file with the chosen backend
pub fn open(kind: ScannerKind, path: &Path) -> Result<Box<dyn TokenScanner>> {
    Ok(match kind {
        ScannerKind::Buffered => Box::new(Scanner::new(BufferedSource::new(File::open(path)?))),
        ScannerKind::Mapped => Box::new(Scanner::new(SliceSource::map(path)?)),
    })
}
