use crate::entry::body::{BodyStream, JsonStringReader};
use crate::entry::pool::{BufferPool, HandlePool, PooledHandle};
use crate::error::{HarError, Result};
use crate::har::Entry;
use crate::index::{EntryMetadata, Index};
use crate::scanner::{BufferedSource, Scanner, Token, TokenScanner, TokenScannerExt};
use crate::stats::Stats;
use rustc_hash::FxHashMap;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Take};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Sizing for the entry reader's pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    pub max_open_files: usize,
    pub buffer_pool_size: usize,
    /// Starting capacity of pooled buffers
    pub buffer_capacity: usize,
    /// Read-ahead used when streaming bodies
    pub stream_buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_open_files: 8,
            buffer_pool_size: 16,
            buffer_capacity: 64 * 1024,
            stream_buffer_size: 64 * 1024,
        }
    }
}

/// Body stream backed by a pooled file handle
pub type ResponseBody<'a> = BodyStream<BufReader<Take<PooledHandle<'a>>>>;

/// Random access to entries by byte range
pub struct EntryReader {
    handles: HandlePool,
    buffers: BufferPool,
    index: Arc<Index>,
    by_offset: FxHashMap<u64, u32>,
    stats: Arc<Stats>,
    stream_buffer_size: usize,
}

impl EntryReader {
    pub fn new(path: &Path, index: Arc<Index>, config: &ReaderConfig, stats: Arc<Stats>) -> Self {
        let by_offset = index
            .entries()
            .iter()
            .enumerate()
            .map(|(i, meta)| (meta.offset, i as u32))
            .collect();

        Self {
            handles: HandlePool::new(path, config.max_open_files),
            buffers: BufferPool::new(config.buffer_pool_size, config.buffer_capacity),
            index,
            by_offset,
            stats,
            stream_buffer_size: config.stream_buffer_size.max(1),
        }
    }

    /// Read and decode the entry at `offset`, allocating a fresh buffer
    pub fn read_at(&self, offset: u64, length: u64) -> Result<Entry> {
        let mut buf = Vec::new();
        let bytes = self.read_into(offset, length, &mut buf)?;
        self.decode(offset, bytes)
    }

    /// Read and decode through a buffer from the pool
    pub fn read_pooled(&self, offset: u64, length: u64) -> Result<Entry> {
        let mut buf = self.buffers.acquire();
        let bytes = self.read_into(offset, length, &mut buf)?;
        self.decode(offset, bytes)
    }

    /// Read exactly `length` bytes at `offset` into `buf`, growing it as needed
    pub fn read_into<'b>(&self, offset: u64, length: u64, buf: &'b mut Vec<u8>) -> Result<&'b [u8]> {
        let start = Instant::now();
        let read_err = |source: io::Error| HarError::Read {
            index: None,
            offset,
            source,
        };

        let wanted = usize::try_from(length).map_err(|_| {
            read_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("entry length {} exceeds address space", length),
            ))
        })?;
        buf.clear();
        buf.reserve(wanted);

        let mut handle = self.handles.acquire().map_err(read_err)?;
        handle.seek(SeekFrom::Start(offset)).map_err(read_err)?;
        self.stats.record_seek();

        let got = (&mut *handle)
            .take(length)
            .read_to_end(buf)
            .map_err(read_err)?;
        self.stats.record_read(got as u64, start.elapsed());

        if got < wanted {
            return Err(read_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read: {} of {} bytes", got, wanted),
            )));
        }
        Ok(&buf[..])
    }

    /// Decode bytes previously read for the entry at `offset`
    pub fn decode(&self, offset: u64, bytes: &[u8]) -> Result<Entry> {
        let entry = serde_json::from_slice(bytes).map_err(|source| HarError::Decode {
            index: None,
            offset,
            source,
        })?;
        self.stats.record_decode();
        Ok(entry)
    }

    /// Metadata for the entry starting at `offset`, in constant time
    pub fn read_metadata(&self, offset: u64) -> Option<&EntryMetadata> {
        let index = *self.by_offset.get(&offset)?;
        self.index.entry(index as usize)
    }

    /// Index of the entry starting at `offset`
    pub fn index_of(&self, offset: u64) -> Option<usize> {
        self.by_offset.get(&offset).map(|i| *i as usize)
    }

    /// Stream `response.content.text` of the entry at `offset`, unescaped.
    ///
    /// Entries without a text body yield an empty stream.
    pub fn stream_response_body(&self, offset: u64) -> Result<ResponseBody<'_>> {
        let read_err = |source: io::Error| HarError::Read {
            index: None,
            offset,
            source,
        };
        let mut handle = self.handles.acquire().map_err(read_err)?;

        let located = {
            let mut scanner = Scanner::new(BufferedSource::with_capacity(
                self.stream_buffer_size,
                &mut *handle,
            ));
            scanner.reposition(offset)?;
            self.stats.record_seek();
            locate_body(&mut scanner)?
        };

        let raw_len = located.text.map_or(0, |(start, end)| end - start);
        let reader = match located.text {
            Some((start, end)) => {
                // Skip the opening quote; the closing one ends the string reader
                handle.seek(SeekFrom::Start(start + 1)).map_err(read_err)?;
                self.stats.record_seek();
                JsonStringReader::new(BufReader::with_capacity(
                    self.stream_buffer_size,
                    handle.take(end - start - 1),
                ))
            }
            None => JsonStringReader::finished(BufReader::new(handle.take(0))),
        };

        Ok(BodyStream::new(
            reader,
            located.encoding,
            located.mime_type,
            raw_len,
        ))
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn handles(&self) -> &HandlePool {
        &self.handles
    }

    /// Release pooled handles; later reads fail with a read error
    pub fn close(&self) {
        self.handles.close();
    }
}

/// Where `response.content` keeps its body
#[derive(Default)]
struct BodyLocation {
    /// Byte range of the text literal, quotes included
    text: Option<(u64, u64)>,
    encoding: Option<String>,
    mime_type: Option<String>,
}

fn locate_body(scanner: &mut dyn TokenScanner) -> Result<BodyLocation> {
    let mut located = BodyLocation::default();
    scanner.navigate(&["response", "content"])?;

    if scanner.next_token()? != Some(Token::BeginObject) {
        return Err(HarError::NotFound {
            segment: "content".to_string(),
        });
    }
    loop {
        match scanner.next_token()? {
            Some(Token::Key(key)) => match key.as_str() {
                "text" => {
                    let is_string = scanner.peek_value()? == b'"';
                    let start = scanner.value_start()?;
                    scanner.skip()?;
                    if is_string {
                        located.text = Some((start, scanner.position()));
                    }
                }
                "encoding" => located.encoding = scanner.decode_current()?,
                "mimeType" => located.mime_type = scanner.decode_current()?,
                _ => scanner.skip()?,
            },
            _ => return Ok(located),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BuildOptions, build_index};
    use std::io::Write;

    const CAPTURE: &str = r#"{"log": {"version": "1.2", "creator": {"name": "test", "version": "1"},
  "entries": [
    {"startedDateTime": "2024-03-01T10:00:00Z", "time": 5,
     "request": {"method": "GET", "url": "https://example.com/", "httpVersion": "HTTP/1.1",
                 "headers": [], "queryString": [], "cookies": [], "headersSize": -1, "bodySize": 0},
     "response": {"status": 200, "statusText": "OK", "httpVersion": "HTTP/1.1", "headers": [],
                  "cookies": [], "redirectURL": "", "headersSize": -1, "bodySize": 18,
                  "content": {"size": 18, "text": "<p class=\"a\">é</p>", "mimeType": "text/html"}},
     "cache": {}, "timings": {"send": 1, "wait": 3, "receive": 1}},
    {"startedDateTime": "2024-03-01T10:00:01Z", "time": 2,
     "request": {"method": "GET", "url": "https://example.com/logo.png", "httpVersion": "HTTP/1.1",
                 "headers": [], "queryString": [], "cookies": [], "headersSize": -1, "bodySize": 0},
     "response": {"status": 200, "statusText": "OK", "httpVersion": "HTTP/1.1", "headers": [],
                  "cookies": [], "redirectURL": "", "headersSize": -1, "bodySize": 4,
                  "content": {"mimeType": "image/png", "encoding": "base64", "text": "iVBO", "size": 4}},
     "cache": {}, "timings": {"send": 0, "wait": 1, "receive": 1}},
    {"startedDateTime": "2024-03-01T10:00:02Z", "time": 1,
     "request": {"method": "HEAD", "url": "https://example.com/ping", "httpVersion": "HTTP/1.1",
                 "headers": [], "queryString": [], "cookies": [], "headersSize": -1, "bodySize": 0},
     "response": {"status": 204, "statusText": "No Content", "httpVersion": "HTTP/1.1", "headers": [],
                  "cookies": [], "redirectURL": "", "headersSize": -1, "bodySize": 0,
                  "content": {"size": 0, "text": null, "mimeType": ""}},
     "cache": {}, "timings": {"send": 0, "wait": 1, "receive": 0}}
  ]}}"#;

    fn open_capture() -> (tempfile::NamedTempFile, EntryReader) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CAPTURE.as_bytes()).unwrap();
        let index = Arc::new(build_index(file.path(), &BuildOptions::default()).unwrap());
        let reader = EntryReader::new(
            file.path(),
            index,
            &ReaderConfig::default(),
            Arc::new(Stats::new()),
        );
        (file, reader)
    }

    fn body_of(reader: &EntryReader, index: usize) -> (String, Option<String>) {
        let offset = reader.index.entries()[index].offset;
        let mut body = reader.stream_response_body(offset).unwrap();
        let mut text = String::new();
        body.read_to_string(&mut text).unwrap();
        (text, body.encoding.clone())
    }

    #[test]
    fn test_read_at_decodes_entry() {
        let (_file, reader) = open_capture();
        let meta = reader.index.entries()[1].clone();

        let entry = reader.read_at(meta.offset, meta.length).unwrap();
        assert_eq!(entry.request.url, "https://example.com/logo.png");
        assert_eq!(entry.response.content.mime_type, "image/png");

        let pooled = reader.read_pooled(meta.offset, meta.length).unwrap();
        assert_eq!(pooled.request.url, entry.request.url);
        assert_eq!(reader.buffers().pooled(), 1);

        let snapshot = reader.stats.snapshot();
        assert_eq!(snapshot.seeks, 2);
        assert_eq!(snapshot.bytes_read, 2 * meta.length);
        assert_eq!(snapshot.entries_decoded, 2);
    }

    #[test]
    fn test_metadata_by_offset() {
        let (_file, reader) = open_capture();
        let offset = reader.index.entries()[2].offset;
        assert_eq!(reader.index_of(offset), Some(2));
        assert_eq!(&*reader.read_metadata(offset).unwrap().method, "HEAD");
        assert!(reader.read_metadata(offset + 1).is_none());
        assert_eq!(reader.stats.bytes_read(), 0);
    }

    #[test]
    fn test_short_read_and_bad_range() {
        let (_file, reader) = open_capture();
        let end = CAPTURE.len() as u64;

        let err = reader.read_at(end - 4, 64).unwrap_err();
        assert!(matches!(err, HarError::Read { offset, .. } if offset == end - 4));

        // A range that is not an entry fails to decode
        let meta = &reader.index.entries()[0];
        let err = reader.read_at(meta.offset + 1, meta.length - 1).unwrap_err();
        assert!(matches!(err, HarError::Decode { .. }));
    }

    #[test]
    fn test_stream_bodies() {
        let (_file, reader) = open_capture();

        assert_eq!(body_of(&reader, 0), ("<p class=\"a\">é</p>".to_string(), None));
        assert_eq!(body_of(&reader, 1), ("iVBO".to_string(), Some("base64".to_string())));
        assert_eq!(body_of(&reader, 2), (String::new(), None));

        let offset = reader.index.entries()[1].offset;
        let body = reader.stream_response_body(offset).unwrap();
        assert!(body.is_base64());
        assert_eq!(body.mime_type.as_deref(), Some("image/png"));
        assert_eq!(body.raw_len, 6);
    }

    #[test]
    fn test_body_stream_holds_a_handle() {
        let (file, index) = {
            let (file, reader) = open_capture();
            (file, Arc::clone(&reader.index))
        };
        let config = ReaderConfig {
            max_open_files: 1,
            ..ReaderConfig::default()
        };
        let reader = EntryReader::new(file.path(), index, &config, Arc::new(Stats::new()));
        let offset = reader.index.entries()[0].offset;

        let body = reader.stream_response_body(offset).unwrap();
        assert_eq!(reader.handles().open_handles(), 1);
        drop(body);
        let meta = &reader.index.entries()[0];
        assert!(reader.read_at(meta.offset, meta.length).is_ok());
    }

    #[test]
    fn test_reads_fail_after_close() {
        let (_file, reader) = open_capture();
        let meta = reader.index.entries()[0].clone();
        reader.close();
        reader.close();
        assert!(matches!(
            reader.read_at(meta.offset, meta.length),
            Err(HarError::Read { .. })
        ));
        assert!(reader.stream_response_body(meta.offset).is_err());
    }
}
