//! The streamer: one HAR file, its index, an entry reader and an optional
//! cache behind a single handle.

use crate::cache::EntryCache;
use crate::entry::{EntryReader, ReaderConfig, ResponseBody};
use crate::error::{HarError, Result};
use crate::har::Entry;
use crate::index::build::ProgressFn;
use crate::index::{BuildOptions, EntryMetadata, Index, IndexReader, IndexWriter, build_index};
use crate::scanner::ScannerKind;
use crate::search::{SearchOptions, SearchStream};
use crate::stats::{Stats, StatsSnapshot};
use crate::utils::{AppConfig, CancelToken, get_index_path};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where the persisted index lives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IndexStore {
    /// Always build in memory
    Disabled,
    /// Under the application data directory
    #[default]
    Default,
    At(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerConfig {
    /// 0 disables the entry cache
    pub cache_capacity: usize,
    pub max_open_files: usize,
    pub buffer_pool_size: usize,
    pub read_buffer_size: usize,
    pub worker_count: usize,
    pub scanner: ScannerKind,
    pub index_store: IndexStore,
    /// Ignore any persisted index and rebuild
    pub force_rebuild: bool,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for StreamerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            cache_capacity: config.cache_capacity,
            max_open_files: config.max_open_files,
            buffer_pool_size: config.buffer_pool_size,
            read_buffer_size: 64 * 1024,
            worker_count: config.worker_count,
            scanner: config.scanner,
            index_store: if config.persist_index {
                IndexStore::Default
            } else {
                IndexStore::Disabled
            },
            force_rebuild: false,
        }
    }
}

impl StreamerConfig {
    fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            max_open_files: self.max_open_files,
            buffer_pool_size: self.buffer_pool_size,
            buffer_capacity: self.read_buffer_size,
            stream_buffer_size: self.read_buffer_size,
        }
    }
}

/// One entry from a ranged or filtered stream
#[derive(Debug)]
pub struct StreamResult {
    pub index: usize,
    pub metadata: EntryMetadata,
    pub entry: Result<Arc<Entry>>,
}

/// Everything that exists once the index is ready; shared with search workers
pub(crate) struct Session {
    pub(crate) index: Arc<Index>,
    pub(crate) reader: EntryReader,
    pub(crate) cache: Option<EntryCache>,
    pub(crate) stats: Arc<Stats>,
}

impl Session {
    pub(crate) fn metadata(&self, index: usize) -> Result<&EntryMetadata> {
        self.index.entry(index).ok_or(HarError::OutOfRange {
            index,
            total: self.index.len(),
        })
    }

    /// Cache first, then a read through `buf`; fills the cache on success
    pub(crate) fn load(&self, index: usize, buf: &mut Vec<u8>) -> Result<Arc<Entry>> {
        let meta = self.metadata(index)?;

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(index) {
                self.stats.record_cache_hit();
                return Ok(entry);
            }
            self.stats.record_cache_miss();
        }

        let bytes = self
            .reader
            .read_into(meta.offset, meta.length, buf)
            .map_err(|e| e.with_index(index))?;
        let entry = Arc::new(
            self.reader
                .decode(meta.offset, bytes)
                .map_err(|e| e.with_index(index))?,
        );

        if let Some(cache) = &self.cache {
            cache.put(index, Arc::clone(&entry));
        }
        Ok(entry)
    }

    fn stream_result(&self, index: usize) -> Option<StreamResult> {
        let metadata = self.index.entry(index)?.clone();
        let mut buf = self.reader.buffers().acquire();
        let entry = self.load(index, &mut buf);
        Some(StreamResult {
            index,
            metadata,
            entry,
        })
    }
}

/// Lazy sequence of entries; each is read only when pulled
pub struct EntryStream<'a, I> {
    session: &'a Session,
    indices: I,
}

impl<I: Iterator<Item = usize>> Iterator for EntryStream<'_, I> {
    type Item = StreamResult;

    fn next(&mut self) -> Option<StreamResult> {
        let index = self.indices.next()?;
        self.session.stream_result(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

/// Random access and search over one HAR file
pub struct HarStreamer {
    path: PathBuf,
    config: StreamerConfig,
    stats: Arc<Stats>,
    session: Option<Arc<Session>>,
}

impl HarStreamer {
    pub fn new(path: impl AsRef<Path>, config: StreamerConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            stats: Arc::new(Stats::new()),
            session: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Load a fresh persisted index or build one. A second call does nothing.
    pub fn initialize(&mut self) -> Result<()> {
        self.initialize_inner(None, None)
    }

    pub fn initialize_with(&mut self, cancel: &CancelToken) -> Result<()> {
        self.initialize_inner(Some(cancel), None)
    }

    /// Like [`initialize_with`](Self::initialize_with), reporting bytes scanned
    /// when a build is needed
    pub fn initialize_with_progress(
        &mut self,
        cancel: &CancelToken,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        self.initialize_inner(Some(cancel), Some(progress))
    }

    fn initialize_inner(
        &mut self,
        cancel: Option<&CancelToken>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<()> {
        if self.session.is_some() {
            debug!(path = %self.path.display(), "already initialized");
            return Ok(());
        }

        let start = Instant::now();
        let (index, from_disk) = self.load_or_build(cancel, progress)?;
        let elapsed = start.elapsed();
        self.stats.record_index(elapsed, from_disk);
        info!(
            entries = index.len(),
            from_disk,
            elapsed_ms = elapsed.as_millis() as u64,
            "streamer ready"
        );

        let index = Arc::new(index);
        let reader = EntryReader::new(
            &self.path,
            Arc::clone(&index),
            &self.config.reader_config(),
            Arc::clone(&self.stats),
        );
        self.session = Some(Arc::new(Session {
            index,
            reader,
            cache: EntryCache::new(self.config.cache_capacity),
            stats: Arc::clone(&self.stats),
        }));
        Ok(())
    }

    /// Resolved location of the persisted index, if persistence is on
    pub fn index_path(&self) -> Option<PathBuf> {
        match &self.config.index_store {
            IndexStore::Disabled => None,
            IndexStore::At(path) => Some(path.clone()),
            IndexStore::Default => match get_index_path(&self.path) {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(error = %err, "no index directory, persistence disabled");
                    None
                }
            },
        }
    }

    fn load_or_build(
        &self,
        cancel: Option<&CancelToken>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<(Index, bool)> {
        let index_path = self.index_path();

        if let Some(path) = &index_path
            && !self.config.force_rebuild
            && path.exists()
        {
            match IndexReader::load(path, &self.path) {
                Ok(index) => {
                    debug!(index = %path.display(), "using persisted index");
                    return Ok((index, true));
                }
                Err(err) => warn!(index = %path.display(), error = %err, "rebuilding index"),
            }
        }

        let options = BuildOptions {
            scanner: self.config.scanner,
            cancel,
            progress,
        };
        let index = build_index(&self.path, &options)?;

        if let Some(path) = &index_path {
            match IndexWriter::write(&index, path) {
                Ok(()) => debug!(index = %path.display(), "index saved"),
                Err(err) => warn!(index = %path.display(), error = %err, "failed to persist index"),
            }
        }
        Ok((index, false))
    }

    fn session(&self) -> Result<&Arc<Session>> {
        self.session.as_ref().ok_or(HarError::NotInitialized)
    }

    pub fn index(&self) -> Result<&Arc<Index>> {
        Ok(&self.session()?.index)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.session()?.index.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Decode one entry, through the cache when enabled
    pub fn get_entry(&self, index: usize) -> Result<Arc<Entry>> {
        let session = self.session()?;
        let mut buf = session.reader.buffers().acquire();
        session.load(index, &mut buf)
    }

    /// Indexed metadata only; never touches the file
    pub fn get_metadata(&self, index: usize) -> Result<&EntryMetadata> {
        self.session()?.metadata(index)
    }

    /// Entries in `[start, end)`, read lazily in order
    pub fn stream_range(&self, start: usize, end: usize) -> Result<EntryStream<'_, Range<usize>>> {
        let session = self.session()?;
        let total = session.index.len();
        if end > total {
            return Err(HarError::OutOfRange { index: end, total });
        }
        if start > end {
            return Err(HarError::OutOfRange { index: start, total });
        }
        Ok(EntryStream {
            session,
            indices: start..end,
        })
    }

    /// Entries whose metadata satisfies `predicate`; rejected entries are never read
    pub fn stream_filtered<'a, F>(
        &'a self,
        mut predicate: F,
    ) -> Result<EntryStream<'a, impl Iterator<Item = usize> + 'a>>
    where
        F: FnMut(&EntryMetadata) -> bool + 'a,
    {
        let session = self.session()?;
        let entries = session.index.entries();
        let indices = (0..entries.len()).filter(move |&i| predicate(&entries[i]));
        Ok(EntryStream { session, indices })
    }

    /// Start a concurrent search; results arrive as batches complete
    pub fn search(
        &self,
        pattern: &str,
        options: &SearchOptions,
        cancel: CancelToken,
    ) -> Result<SearchStream> {
        let session = self.session()?;
        let mut options = options.clone();
        if options.worker_count == 0 {
            options.worker_count = self.config.worker_count;
        }
        crate::search::search(Arc::clone(session), pattern, &options, cancel)
    }

    /// Unescaped `response.content.text` of one entry, streamed from disk
    pub fn stream_response_body(&self, index: usize) -> Result<ResponseBody<'_>> {
        let session = self.session()?;
        let meta = session.metadata(index)?;
        session
            .reader
            .stream_response_body(meta.offset)
            .map_err(|e| e.with_index(index))
    }

    pub fn stats(&self) -> Result<StatsSnapshot> {
        self.session()?;
        Ok(self.stats.snapshot())
    }

    /// Release file handles and drop cached entries. Idempotent.
    pub fn close(&self) -> Result<()> {
        let session = self.session()?;
        session.reader.close();
        if let Some(cache) = &session.cache {
            cache.clear();
        }
        Ok(())
    }
}
