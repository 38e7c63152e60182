//! Concurrent pattern search over HAR entries.
//!
//! Each entry is matched against its indexed metadata first; the entry is
//! only read from disk when no metadata field matches. Work is split into
//! half-open batches of entry indices and fanned out to a fixed pool of
//! worker threads.

pub mod executor;
pub mod pattern;
pub mod planner;

pub use executor::SearchStream;
pub(crate) use executor::search;
pub use pattern::CompiledPattern;
pub use planner::Partition;

use crate::error::HarError;
use serde::Serialize;
use std::fmt;
use std::ops::Range;

/// How the pattern text is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchMode {
    #[default]
    Literal,
    Regex,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub mode: SearchMode,
    /// Also match response bodies, which forces a read of every candidate
    pub deep_body: bool,
    /// 0 uses one worker per CPU
    pub worker_count: usize,
    /// Entries per batch; 0 splits evenly across workers
    pub chunk_size: usize,
    pub case_insensitive: bool,
}

/// Where a match was found, in the order fields are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Url,
    Method,
    Status,
    StatusText,
    MimeType,
    ServerIp,
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
}

impl MatchField {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchField::Url => "url",
            MatchField::Method => "method",
            MatchField::Status => "status",
            MatchField::StatusText => "status_text",
            MatchField::MimeType => "mime_type",
            MatchField::ServerIp => "server_ip",
            MatchField::RequestHeaders => "request_headers",
            MatchField::RequestBody => "request_body",
            MatchField::ResponseHeaders => "response_headers",
            MatchField::ResponseBody => "response_body",
        }
    }

    /// Fields answered from the index without touching the file
    pub fn is_metadata(self) -> bool {
        matches!(
            self,
            MatchField::Url
                | MatchField::Method
                | MatchField::Status
                | MatchField::StatusText
                | MatchField::MimeType
                | MatchField::ServerIp
        )
    }
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One matched entry, or one entry that could not be read
#[derive(Debug)]
pub struct SearchResult {
    pub index: usize,
    pub field: Option<MatchField>,
    pub error: Option<HarError>,
}

impl SearchResult {
    pub fn hit(index: usize, field: MatchField) -> Self {
        Self {
            index,
            field: Some(field),
            error: None,
        }
    }

    pub fn failed(index: usize, error: HarError) -> Self {
        Self {
            index,
            field: None,
            error: Some(error),
        }
    }

    pub fn is_match(&self) -> bool {
        self.field.is_some()
    }
}

/// Results for one work batch, ascending by index
#[derive(Debug)]
pub struct SearchBatch {
    pub range: Range<usize>,
    pub results: Vec<SearchResult>,
}
