use crate::error::{HarError, Result};
use crate::har::{Creator, Header, Page, find_header, parse_timestamp};
use crate::index::catalog::Index;
use crate::index::strings::StringTable;
use crate::index::types::{EntryFlags, EntryMetadata, FORMAT_VERSION, LogInfo, SourceInfo};
use crate::scanner::{
    BufferedSource, HashingReader, Scanner, ScannerKind, SliceSource, Token, TokenScanner,
    TokenScannerExt,
};
use crate::utils::CancelToken;
use serde_json::Value;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Cancellation and progress are polled once per this many entries
pub const CHECK_INTERVAL: usize = 1024;

/// Progress callback, receives bytes scanned so far
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Sync);

/// Options for a single build
#[derive(Clone, Copy, Default)]
pub struct BuildOptions<'a> {
    pub scanner: ScannerKind,
    pub cancel: Option<&'a CancelToken>,
    pub progress: Option<ProgressFn<'a>>,
}

/// Output of the forward pass, before finalizing
#[derive(Default)]
struct Scan {
    log: LogInfo,
    entries: Vec<EntryMetadata>,
    strings: StringTable,
}

/// Hot fields of one entry as they come off the scanner
#[derive(Default)]
struct RawEntry {
    method: Option<String>,
    url: Option<String>,
    status: i64,
    status_text: Option<String>,
    mime_type: Option<String>,
    started: Option<i64>,
    duration: f64,
    request_sizes: (i64, i64),
    response_sizes: (i64, i64),
    content_size: i64,
    compression: i64,
    content_encoding: Option<String>,
    page_ref: Option<String>,
    server_ip: Option<String>,
    connection: Option<String>,
    error: bool,
    from_cache: bool,
}

/// Build an index for a HAR file in a single forward pass
pub fn build_index(path: &Path, options: &BuildOptions<'_>) -> Result<Index> {
    let start = Instant::now();
    info!(path = %path.display(), scanner = ?options.scanner, "indexing HAR file");

    let (scan, content_hash, size) = match options.scanner {
        ScannerKind::Buffered => {
            let file = File::open(path)?;
            let mut scanner = Scanner::new(BufferedSource::new(HashingReader::new(file)));
            let scan = scan_document(&mut scanner, options)?;
            let (hash, size) = scanner.into_source().into_inner().finish()?;
            (scan, hash, size)
        }
        ScannerKind::Mapped => {
            let mapped = SliceSource::map(path)?;
            let bytes = mapped.as_bytes();
            let (hash, scan) = rayon::join(
                || blake3::hash(bytes).to_hex().to_string(),
                || scan_document(&mut Scanner::new(SliceSource::new(bytes)), options),
            );
            (scan?, hash, bytes.len() as u64)
        }
    };

    if let Some(progress) = options.progress {
        progress(size);
    }

    let source = SourceInfo {
        path: path.to_path_buf(),
        size,
        content_hash,
        format_version: FORMAT_VERSION,
    };
    let index = Index::assemble(source, scan.log, scan.entries, scan.strings);

    info!(
        entries = index.len(),
        unique_strings = index.strings().len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "index built"
    );
    Ok(index)
}

fn scan_document<S>(scanner: &mut S, options: &BuildOptions<'_>) -> Result<Scan>
where
    S: TokenScanner + ?Sized,
{
    let mut scan = Scan::default();
    let mut saw_entries = false;

    if !enter_object(scanner, "HAR document")? {
        return Err(malformed(0, "HAR document is null"));
    }
    members(scanner, |scanner, key| {
        if key == "log" {
            saw_entries |= scan_log(scanner, &mut scan, options)?;
            Ok(())
        } else {
            scanner.skip()
        }
    })?;

    if !saw_entries {
        return Err(malformed(scanner.position(), "missing log.entries"));
    }
    Ok(scan)
}

/// Walk `log`; returns whether an entries array was seen
fn scan_log<S>(scanner: &mut S, scan: &mut Scan, options: &BuildOptions<'_>) -> Result<bool>
where
    S: TokenScanner + ?Sized,
{
    let mut saw_entries = false;
    if !enter_object(scanner, "log")? {
        return Ok(false);
    }

    members(scanner, |scanner, key| {
        match key {
            "version" => scan.log.version = read_string(scanner)?.unwrap_or_default(),
            "creator" => scan.log.creator = scanner.decode_current::<Creator>()?,
            "browser" => scan.log.browser = scanner.decode_current::<Option<Creator>>()?,
            "pages" => {
                scan.log.pages = scanner
                    .decode_current::<Option<Vec<Page>>>()?
                    .unwrap_or_default()
            }
            "comment" => scan.log.comment = read_string(scanner)?,
            "entries" => {
                scan_entries(scanner, scan, options)?;
                saw_entries = true;
            }
            _ => scanner.skip()?,
        }
        Ok(())
    })?;

    Ok(saw_entries)
}

fn scan_entries<S>(scanner: &mut S, scan: &mut Scan, options: &BuildOptions<'_>) -> Result<()>
where
    S: TokenScanner + ?Sized,
{
    let offset = scanner.value_start()?;
    match scanner.next_token()? {
        Some(Token::BeginArray) => {}
        _ => return Err(malformed(offset, "log.entries is not an array")),
    }

    while scanner.more()? {
        let index = scan.entries.len();
        if index % CHECK_INTERVAL == 0 {
            if let Some(cancel) = options.cancel {
                cancel.check()?;
            }
            if let Some(progress) = options.progress {
                progress(scanner.position());
            }
        }

        let offset = scanner.value_start()?;
        let meta = scan_entry(scanner, offset, &mut scan.strings).map_err(|e| match e {
            HarError::MalformedJson { offset, reason } => HarError::MalformedJson {
                offset,
                reason: format!("entry {}: {}", index, reason),
            },
            other => other,
        })?;
        scan.entries.push(meta);
    }

    // Closing bracket
    scanner.next_token()?;
    debug!(entries = scan.entries.len(), "entries array closed");
    Ok(())
}

fn scan_entry<S>(scanner: &mut S, offset: u64, strings: &mut StringTable) -> Result<EntryMetadata>
where
    S: TokenScanner + ?Sized,
{
    if !enter_object(scanner, "entry")? {
        return Err(malformed(offset, "entry is not an object"));
    }

    let mut raw = RawEntry::default();
    members(scanner, |scanner, key| {
        match key {
            "request" => scan_request(scanner, &mut raw)?,
            "response" => scan_response(scanner, &mut raw)?,
            "pageref" => raw.page_ref = read_string(scanner)?,
            "startedDateTime" => {
                raw.started = read_string(scanner)?
                    .as_deref()
                    .and_then(parse_timestamp)
                    .map(|ts| ts.timestamp_millis())
            }
            "time" => raw.duration = read_number(scanner)?.unwrap_or(0.0),
            "serverIPAddress" => raw.server_ip = read_string(scanner)?,
            "connection" => raw.connection = read_string(scanner)?,
            "_fromCache" => raw.from_cache = is_truthy(&scanner.decode_current::<Value>()?),
            _ => scanner.skip()?,
        }
        Ok(())
    })?;

    let length = scanner.position() - offset;
    Ok(raw.finish(offset, length, strings))
}

fn scan_request<S>(scanner: &mut S, raw: &mut RawEntry) -> Result<()>
where
    S: TokenScanner + ?Sized,
{
    if !enter_object(scanner, "request")? {
        return Ok(());
    }
    members(scanner, |scanner, key| {
        match key {
            "method" => raw.method = read_string(scanner)?,
            "url" => raw.url = read_string(scanner)?,
            "headersSize" => raw.request_sizes.0 = read_int(scanner)?,
            "bodySize" => raw.request_sizes.1 = read_int(scanner)?,
            _ => scanner.skip()?,
        }
        Ok(())
    })
}

fn scan_response<S>(scanner: &mut S, raw: &mut RawEntry) -> Result<()>
where
    S: TokenScanner + ?Sized,
{
    if !enter_object(scanner, "response")? {
        return Ok(());
    }
    members(scanner, |scanner, key| {
        match key {
            "status" => raw.status = read_int(scanner)?,
            "statusText" => raw.status_text = read_string(scanner)?,
            "headers" => {
                let headers = scanner
                    .decode_current::<Option<Vec<Header>>>()?
                    .unwrap_or_default();
                raw.content_encoding =
                    find_header(&headers, "content-encoding").map(str::to_owned);
            }
            "content" => scan_content(scanner, raw)?,
            "headersSize" => raw.response_sizes.0 = read_int(scanner)?,
            "bodySize" => raw.response_sizes.1 = read_int(scanner)?,
            "_error" => raw.error = is_truthy(&scanner.decode_current::<Value>()?),
            _ => scanner.skip()?,
        }
        Ok(())
    })
}

fn scan_content<S>(scanner: &mut S, raw: &mut RawEntry) -> Result<()>
where
    S: TokenScanner + ?Sized,
{
    if !enter_object(scanner, "content")? {
        return Ok(());
    }
    members(scanner, |scanner, key| {
        match key {
            "size" => raw.content_size = read_int(scanner)?,
            "compression" => raw.compression = read_int(scanner)?,
            "mimeType" => raw.mime_type = read_string(scanner)?,
            // Bodies are never decoded during a build
            _ => scanner.skip()?,
        }
        Ok(())
    })
}

impl RawEntry {
    fn finish(self, offset: u64, length: u64, strings: &mut StringTable) -> EntryMetadata {
        let status = u16::try_from(self.status).unwrap_or(0);

        let mut flags = EntryFlags::new();
        if status == 0 || status >= 400 || self.error {
            flags.set_error();
        }
        let encoded = self
            .content_encoding
            .as_deref()
            .map(str::trim)
            .is_some_and(|enc| !enc.is_empty() && !enc.eq_ignore_ascii_case("identity"));
        if self.compression > 0 || encoded {
            flags.set_compressed();
        }
        if self.from_cache || status == 304 {
            flags.set_from_cache();
        }

        let mut intern_opt = |value: Option<String>| value.map(|v| strings.intern(&v));
        let page_ref = intern_opt(self.page_ref);
        let server_ip = intern_opt(self.server_ip.filter(|ip| !ip.is_empty()));
        let connection = intern_opt(self.connection.filter(|c| !c.is_empty()));

        EntryMetadata {
            offset,
            length,
            method: strings.intern(self.method.as_deref().unwrap_or("")),
            url: strings.intern(self.url.as_deref().unwrap_or("")),
            status,
            status_text: strings.intern(self.status_text.as_deref().unwrap_or("")),
            mime_type: strings.intern(self.mime_type.as_deref().unwrap_or("")),
            started_ms: self.started,
            duration_ms: self.duration,
            request_size: known(self.request_sizes.0) + known(self.request_sizes.1),
            response_size: known(self.response_sizes.0) + known(self.response_sizes.1),
            body_size: known(self.content_size),
            page_ref,
            server_ip,
            connection,
            flags,
        }
    }
}

/// HAR uses -1 for unknown sizes
fn known(size: i64) -> u64 {
    size.max(0) as u64
}

/// Consume the opening brace of an object; `false` for `null`
fn enter_object<S>(scanner: &mut S, what: &str) -> Result<bool>
where
    S: TokenScanner + ?Sized,
{
    let offset = scanner.value_start()?;
    match scanner.next_token()? {
        Some(Token::BeginObject) => Ok(true),
        Some(Token::Null) => Ok(false),
        _ => Err(malformed(offset, format!("{} is not an object", what))),
    }
}

/// Visit every member of an entered object; `visit` must consume the value
fn members<S, F>(scanner: &mut S, mut visit: F) -> Result<()>
where
    S: TokenScanner + ?Sized,
    F: FnMut(&mut S, &str) -> Result<()>,
{
    loop {
        let offset = scanner.position();
        match scanner.next_token()? {
            Some(Token::Key(key)) => visit(scanner, &key)?,
            Some(Token::EndObject) => return Ok(()),
            Some(_) => return Err(malformed(offset, "expected object key")),
            None => return Err(HarError::TruncatedFile { offset }),
        }
    }
}

fn read_string<S>(scanner: &mut S) -> Result<Option<String>>
where
    S: TokenScanner + ?Sized,
{
    Ok(match scanner.decode_current::<Value>()? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn read_number<S>(scanner: &mut S) -> Result<Option<f64>>
where
    S: TokenScanner + ?Sized,
{
    Ok(match scanner.decode_current::<Value>()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Integer field, `-1` when absent or not numeric
fn read_int<S>(scanner: &mut S) -> Result<i64>
where
    S: TokenScanner + ?Sized,
{
    Ok(read_number(scanner)?.map_or(-1, |n| n as i64))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn malformed(offset: u64, reason: impl Into<String>) -> HarError {
    HarError::MalformedJson {
        offset,
        reason: reason.into(),
    }
}
