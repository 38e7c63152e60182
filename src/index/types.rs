use crate::har::{Creator, Page};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Magic bytes at the start of a persisted index
pub const INDEX_MAGIC: &[u8; 8] = b"HARXIDX\0";

/// Persisted index layout version
pub const FORMAT_VERSION: u32 = 1;

/// Entry flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryFlags(pub u8);

impl EntryFlags {
    pub const NONE: u8 = 0;
    /// Status 0 or >= 400, or a browser-reported `_error`
    pub const ERROR: u8 = 1 << 0;
    /// Compressed on the wire
    pub const COMPRESSED: u8 = 1 << 1;
    /// Served from a cache
    pub const FROM_CACHE: u8 = 1 << 2;

    pub fn new() -> Self {
        Self(Self::NONE)
    }

    pub fn is_error(&self) -> bool {
        self.0 & Self::ERROR != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    pub fn is_from_cache(&self) -> bool {
        self.0 & Self::FROM_CACHE != 0
    }

    pub fn set_error(&mut self) {
        self.0 |= Self::ERROR;
    }

    pub fn set_compressed(&mut self) {
        self.0 |= Self::COMPRESSED;
    }

    pub fn set_from_cache(&mut self) {
        self.0 |= Self::FROM_CACHE;
    }
}

/// Hot fields of one entry, recorded during the scan
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMetadata {
    /// Byte offset of the entry's opening brace
    pub offset: u64,
    /// Bytes up to and including the closing brace
    pub length: u64,
    pub method: Arc<str>,
    pub url: Arc<str>,
    pub status: u16,
    pub status_text: Arc<str>,
    pub mime_type: Arc<str>,
    /// `startedDateTime` as epoch millis, `None` when unparseable
    pub started_ms: Option<i64>,
    pub duration_ms: f64,
    /// Request headers + body bytes, unknown sizes counted as 0
    pub request_size: u64,
    /// Response headers + body bytes, unknown sizes counted as 0
    pub response_size: u64,
    /// Decoded response content size
    pub body_size: u64,
    pub page_ref: Option<Arc<str>>,
    pub server_ip: Option<Arc<str>>,
    pub connection: Option<Arc<str>>,
    pub flags: EntryFlags,
}

impl EntryMetadata {
    /// Offset one past the last byte of the entry
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn finished_ms(&self) -> Option<i64> {
        self.started_ms
            .map(|start| start.saturating_add(self.duration_ms.max(0.0).round() as i64))
    }
}

/// Identity of the HAR file an index was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub size: u64,
    /// BLAKE3 of the whole file, hex encoded
    pub content_hash: String,
    pub format_version: u32,
}

/// Top-level `log` metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogInfo {
    pub version: String,
    pub creator: Creator,
    pub browser: Option<Creator>,
    pub pages: Vec<Page>,
    pub comment: Option<String>,
}

/// Aggregate statistics computed in the finalize pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub total_entries: u64,
    pub total_request_bytes: u64,
    pub total_response_bytes: u64,
    pub first_started_ms: Option<i64>,
    pub last_finished_ms: Option<i64>,
    pub unique_urls: u64,
    pub error_count: u64,
}

impl IndexSummary {
    /// Milliseconds between the first start and the last finish
    pub fn time_span_ms(&self) -> Option<i64> {
        match (self.first_started_ms, self.last_finished_ms) {
            (Some(first), Some(last)) => Some(last.saturating_sub(first)),
            _ => None,
        }
    }
}
