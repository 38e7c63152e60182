//! Bounded pools for file handles and read buffers.
//!
//! Both hand out RAII guards; dropping a guard (including during unwinding)
//! returns the resource to its pool.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Buffers that grew past this are dropped instead of pooled
const MAX_RETAINED_CAPACITY: usize = 16 * 1024 * 1024;

#[derive(Debug, Default)]
struct HandleState {
    idle: Vec<File>,
    /// Handles in existence, idle or checked out
    open: usize,
    closed: bool,
}

/// Read-only handles to one file, opened lazily up to `max_open`
#[derive(Debug)]
pub struct HandlePool {
    path: PathBuf,
    max_open: usize,
    state: Mutex<HandleState>,
    available: Condvar,
}

impl HandlePool {
    pub fn new(path: &Path, max_open: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            max_open: max_open.max(1),
            state: Mutex::new(HandleState::default()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a handle, blocking while all `max_open` are in use
    pub fn acquire(&self) -> io::Result<PooledHandle<'_>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(io::Error::other("file handle pool is closed"));
            }
            if let Some(file) = state.idle.pop() {
                return Ok(PooledHandle::new(self, file));
            }
            if state.open < self.max_open {
                state.open += 1;
                drop(state);
                return match File::open(&self.path) {
                    Ok(file) => Ok(PooledHandle::new(self, file)),
                    Err(e) => {
                        self.lock().open -= 1;
                        self.available.notify_one();
                        Err(e)
                    }
                };
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn release(&self, file: File) {
        let mut state = self.lock();
        if state.closed {
            state.open -= 1;
            drop(file);
        } else {
            state.idle.push(file);
        }
        drop(state);
        self.available.notify_one();
    }

    /// Drop idle handles and refuse further acquisitions. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.open -= idle.len();
        drop(state);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Handles currently open, idle or checked out
    pub fn open_handles(&self) -> usize {
        self.lock().open
    }

    pub fn max_open(&self) -> usize {
        self.max_open
    }
}

/// A checked-out file handle
#[derive(Debug)]
pub struct PooledHandle<'a> {
    pool: &'a HandlePool,
    file: Option<File>,
}

impl<'a> PooledHandle<'a> {
    fn new(pool: &'a HandlePool, file: File) -> Self {
        Self {
            pool,
            file: Some(file),
        }
    }
}

impl Deref for PooledHandle<'_> {
    type Target = File;

    fn deref(&self) -> &File {
        // Only taken in drop
        self.file.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledHandle<'_> {
    fn deref_mut(&mut self) -> &mut File {
        self.file.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Read for PooledHandle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.deref_mut().read(buf)
    }
}

impl Seek for PooledHandle<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.deref_mut().seek(pos)
    }
}

impl Drop for PooledHandle<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.pool.release(file);
        }
    }
}

/// Reusable byte buffers; never blocks, retains at most `max_pooled`
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    initial_capacity: usize,
}

impl BufferPool {
    pub fn new(max_pooled: usize, initial_capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
            initial_capacity,
        }
    }

    pub fn acquire(&self) -> PooledBuffer<'_> {
        let reused = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        PooledBuffer {
            pool: self,
            buf: reused.unwrap_or_else(|| Vec::with_capacity(self.initial_capacity)),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }

    /// Buffers waiting for reuse
    pub fn pooled(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A checked-out buffer, cleared before it goes back to the pool
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn temp_file() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }

    #[test]
    fn test_handles_open_lazily_and_are_reused() {
        let file = temp_file();
        let pool = HandlePool::new(file.path(), 2);
        assert_eq!(pool.open_handles(), 0);

        {
            let _a = pool.acquire().unwrap();
            let _b = pool.acquire().unwrap();
            assert_eq!(pool.open_handles(), 2);
        }
        let _c = pool.acquire().unwrap();
        assert_eq!(pool.open_handles(), 2);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let file = temp_file();
        let pool = Arc::new(HandlePool::new(file.path(), 1));
        let held = pool.acquire().unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let pool = Arc::clone(&pool);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _handle = pool.acquire().unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(held);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_handle_returned_on_panic() {
        let file = temp_file();
        let pool = HandlePool::new(file.path(), 1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _handle = pool.acquire().unwrap();
            panic!("reader failed");
        }));
        assert!(result.is_err());
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let file = temp_file();
        let pool = HandlePool::new(file.path(), 2);
        let held = pool.acquire().unwrap();
        drop(pool.acquire().unwrap());

        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.open_handles(), 1);
        assert!(pool.acquire().is_err());

        drop(held);
        assert_eq!(pool.open_handles(), 0);
    }

    #[test]
    fn test_missing_file_does_not_leak_slot() {
        let pool = HandlePool::new(Path::new("/nonexistent/harx/capture.har"), 1);
        assert!(pool.acquire().is_err());
        assert_eq!(pool.open_handles(), 0);
    }

    #[test]
    fn test_buffer_pool_reuses_and_clears() {
        let pool = BufferPool::new(1, 64);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"entry bytes");
        }
        assert_eq!(pool.pooled(), 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
        let second = pool.acquire();
        drop(buf);
        drop(second);
        assert_eq!(pool.pooled(), 1);
    }
}
