//! Byte sources feeding the token scanner.
//!
//! A source exposes its internal buffer (`fill`/`consume`) so the lexer can
//! run `memchr` over whole runs of string bytes instead of pulling one byte
//! at a time.

use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Default read-ahead for buffered sources
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Buffered, seekable byte supply for the lexer
pub trait Source: Send {
    /// Bytes available without consuming them; empty at end of stream
    fn fill(&mut self) -> io::Result<&[u8]>;

    /// Mark `n` buffered bytes as consumed
    fn consume(&mut self, n: usize);

    /// Absolute offset of the next unconsumed byte
    fn offset(&self) -> u64;

    /// Move the cursor to an absolute offset
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
}

/// `BufReader`-backed source over any seekable reader
pub struct BufferedSource<R> {
    reader: BufReader<R>,
    offset: u64,
}

impl<R: Read + Seek> BufferedSource<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE, inner)
    }

    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, inner),
            offset: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

impl<R: Read + Seek + Send> Source for BufferedSource<R> {
    fn fill(&mut self) -> io::Result<&[u8]> {
        loop {
            match self.reader.fill_buf() {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.reader.fill_buf()
    }

    fn consume(&mut self, n: usize) {
        self.reader.consume(n);
        self.offset += n as u64;
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }
}

/// In-memory source: a memory-mapped file or any owned byte slice
pub struct SliceSource<T> {
    bytes: T,
    pos: usize,
}

impl<T: AsRef<[u8]>> SliceSource<T> {
    pub fn new(bytes: T) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }
}

impl SliceSource<Mmap> {
    /// Map a file read-only
    pub fn map(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only; HAR files are not mutated in place
        // while an index is open, and a concurrent truncation is treated like
        // any other I/O failure by callers.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self::new(map))
    }
}

impl<T: AsRef<[u8]> + Send> Source for SliceSource<T> {
    fn fill(&mut self) -> io::Result<&[u8]> {
        let bytes = self.bytes.as_ref();
        Ok(&bytes[self.pos.min(bytes.len())..])
    }

    fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.bytes.as_ref().len());
    }

    fn offset(&self) -> u64 {
        self.pos as u64
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        let len = self.bytes.as_ref().len() as u64;
        if offset > len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("offset {} past end of {} byte source", offset, len),
            ));
        }
        self.pos = offset as usize;
        Ok(())
    }
}

/// Forward-only reader that feeds every byte it yields into a BLAKE3 hasher
pub struct HashingReader<R> {
    inner: R,
    hasher: blake3::Hasher,
    consumed: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            consumed: 0,
        }
    }

    /// Hash whatever the scan did not read, then return `(hex digest, total bytes)`
    pub fn finish(mut self) -> io::Result<(String, u64)> {
        let rest = io::copy(&mut self.inner, &mut self.hasher)?;
        self.consumed += rest;
        Ok((self.hasher.finalize().to_hex().to_string(), self.consumed))
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.consumed += n as u64;
        Ok(n)
    }
}

impl<R> Seek for HashingReader<R> {
    /// Only reports the current position; any real movement would corrupt the digest
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.consumed),
            SeekFrom::Start(n) if n == self.consumed => Ok(n),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "hashing reader is forward-only",
            )),
        }
    }
}

/// BLAKE3 digest of a whole file as hex, streamed in fixed-size chunks
pub fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let file = File::open(path)?;
    HashingReader::new(BufReader::with_capacity(DEFAULT_BUFFER_SIZE, file)).finish()
}
