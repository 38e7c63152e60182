//! # harx - Random-Access HAR Explorer
//!
//! harx opens HTTP Archive (HAR) files of any size without loading them into
//! memory. A single forward scan records where every entry lives; after that
//! any entry can be decoded with one seek, and the whole file can be searched
//! in parallel.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`scanner`] - Pull-based JSON token scanner (buffered or memory-mapped)
//! - [`index`] - Entry catalog, secondary indices and index persistence
//! - [`entry`] - Random-access entry reads over pooled file handles
//! - [`cache`] - Optional LRU cache of decoded entries
//! - [`search`] - Concurrent metadata-first pattern search
//! - [`streamer`] - The façade tying the pieces together
//! - [`output`] - Terminal formatting for the `harx` binary
//! - [`utils`] - Configuration, cancellation, encoding helpers
//!
//! ## Quick Start
//!
//! ```ignore
//! use harx::search::SearchOptions;
//! use harx::streamer::{HarStreamer, StreamerConfig};
//! use harx::utils::CancelToken;
//!
//! let mut streamer = HarStreamer::new("capture.har", StreamerConfig::default());
//! streamer.initialize()?;
//!
//! let entry = streamer.get_entry(42)?;
//! println!("{} {}", entry.request.method, entry.request.url);
//!
//! let results = streamer
//!     .search("session_id", &SearchOptions::default(), CancelToken::new())?
//!     .into_results();
//! for result in results {
//!     println!("{}: {:?}", result.index, result.field);
//! }
//! ```
//!
//! ## Memory
//!
//! The index keeps a few dozen bytes per entry plus deduplicated strings.
//! Entry bodies stay on disk until asked for, and response bodies can be
//! streamed without decoding the rest of the entry.

pub mod cache;
pub mod entry;
pub mod error;
pub mod har;
pub mod index;
pub mod output;
pub mod scanner;
pub mod search;
pub mod stats;
pub mod streamer;
pub mod utils;

pub use error::{HarError, Result};
pub use streamer::{HarStreamer, StreamerConfig};
