//! Error types for scanning, indexing and random access.

use std::io;
use thiserror::Error;

/// Errors surfaced by the harx core
#[derive(Error, Debug)]
pub enum HarError {
    /// An operation was called before `initialize`
    #[error("streamer is not initialized")]
    NotInitialized,

    /// Entry index outside `[0, total)`
    #[error("entry index {index} out of range (total entries: {total})")]
    OutOfRange { index: usize, total: usize },

    /// The stream ended before the entries array closed
    #[error("file truncated at byte {offset}")]
    TruncatedFile { offset: u64 },

    /// Structural JSON error during a scan
    #[error("malformed JSON at byte {offset}: {reason}")]
    MalformedJson { offset: u64, reason: String },

    /// I/O failure during random access
    #[error("read failed at byte {offset}{}: {source}", entry_suffix(.index))]
    Read {
        index: Option<usize>,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Bytes at an offset do not parse as one entry
    #[error("entry at byte {offset}{} does not decode: {source}", entry_suffix(.index))]
    Decode {
        index: Option<usize>,
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    /// Persisted index does not match the live file
    #[error("stale index: {reason}")]
    StaleIndex { reason: String },

    /// Search pattern failed to compile
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A navigation path segment does not exist
    #[error("path segment {segment:?} not found")]
    NotFound { segment: String },

    /// A search worker failed before matching this entry
    #[error("search aborted before entry {index}: {reason}")]
    SearchAborted { index: usize, reason: String },

    /// The operation observed a cancellation request
    #[error("operation cancelled")]
    Cancelled,

    /// Index persistence failed
    #[error("index persistence error: {0}")]
    Persist(String),

    /// I/O failure outside random access (opening, hashing)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn entry_suffix(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" (entry {})", i),
        None => String::new(),
    }
}

impl HarError {
    /// Attach an entry index to a per-entry error
    pub fn with_index(self, entry: usize) -> Self {
        match self {
            HarError::Read { offset, source, .. } => HarError::Read {
                index: Some(entry),
                offset,
                source,
            },
            HarError::Decode { offset, source, .. } => HarError::Decode {
                index: Some(entry),
                offset,
                source,
            },
            other => other,
        }
    }

    /// True for errors confined to a single entry (stream and search keep going)
    pub fn is_per_entry(&self) -> bool {
        matches!(
            self,
            HarError::Read { .. } | HarError::Decode { .. } | HarError::SearchAborted { .. }
        )
    }
}

impl From<bincode::Error> for HarError {
    fn from(err: bincode::Error) -> Self {
        HarError::Persist(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, HarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarError::OutOfRange { index: 7, total: 3 };
        assert_eq!(
            err.to_string(),
            "entry index 7 out of range (total entries: 3)"
        );

        let err = HarError::Read {
            index: Some(2),
            offset: 128,
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "short read"),
        };
        assert_eq!(err.to_string(), "read failed at byte 128 (entry 2): short read");
    }

    #[test]
    fn test_with_index_only_touches_entry_errors() {
        let err = HarError::Read {
            index: None,
            offset: 10,
            source: io::Error::other("boom"),
        }
        .with_index(4);
        assert!(matches!(err, HarError::Read { index: Some(4), .. }));
        assert!(err.is_per_entry());

        let err = HarError::NotInitialized.with_index(4);
        assert!(matches!(err, HarError::NotInitialized));
        assert!(!err.is_per_entry());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: HarError = io_err.into();
        assert!(matches!(err, HarError::Io(_)));
    }
}
