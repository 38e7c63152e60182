//! Utility functions and data structures.
//!
//! ## Modules
//!
//! - [`app_data`] - Configuration file and persisted index locations
//! - [`cancel`] - Cancellation token shared by builds and searches
//! - [`encoding`] - Variable-length integer and posting list encoding
//! - [`progress`] - Scan progress bar (no-op without the `progress` feature)

pub mod app_data;
pub mod cancel;
pub mod encoding;
pub mod progress;

pub use app_data::*;
pub use cancel::CancelToken;
pub use encoding::*;
pub use progress::ScanProgress;
