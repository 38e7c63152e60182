pub mod build;
pub mod catalog;
pub mod reader;
pub mod stats;
pub mod strings;
pub mod types;
pub mod writer;

pub use build::{BuildOptions, build_index};
pub use catalog::{Index, TimeIndex};
pub use reader::IndexReader;
pub use strings::StringTable;
pub use types::*;
pub use writer::IndexWriter;
