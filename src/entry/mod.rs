//! Random-access entry reads over pooled file handles.

pub mod body;
pub mod pool;
pub mod reader;

pub use body::{BodyStream, JsonStringReader};
pub use pool::{BufferPool, HandlePool, PooledBuffer, PooledHandle};
pub use reader::{EntryReader, ReaderConfig, ResponseBody};
