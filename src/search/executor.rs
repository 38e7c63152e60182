//! Search pipeline: partitioner -> bounded work queue -> workers -> results.
//!
//! ```text
//! partitioner ──batches──> [work queue] ──> worker × N ──> [results] ──> SearchStream
//!                                                      └── collector joins all, then closes
//! ```

use crate::error::{HarError, Result};
use crate::har::{Entry, write_headers};
use crate::index::EntryMetadata;
use crate::search::pattern::CompiledPattern;
use crate::search::planner::Partition;
use crate::search::{MatchField, SearchBatch, SearchOptions, SearchResult};
use crate::streamer::Session;
use crate::utils::{CancelToken, num_cpus};
use crossbeam_channel::{Receiver, bounded};
use std::any::Any;
use std::io::Write;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Queued batches per worker before the partitioner blocks
const QUEUE_DEPTH_PER_WORKER: usize = 2;

/// Completed batches buffered before workers block on a slow consumer
const RESULT_CHANNEL_CAPACITY: usize = 64;

/// Batches of search results, in completion order.
///
/// Dropping the stream cancels the search.
pub struct SearchStream {
    results: Receiver<SearchBatch>,
    cancel: CancelToken,
    started: Instant,
    finished: Arc<OnceLock<Duration>>,
}

impl SearchStream {
    /// Stop handing out new batches; batches already in flight still arrive
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Total time once every worker is done, time so far otherwise
    pub fn elapsed(&self) -> Duration {
        self.finished
            .get()
            .copied()
            .unwrap_or_else(|| self.started.elapsed())
    }

    pub fn is_finished(&self) -> bool {
        self.finished.get().is_some()
    }

    /// Drain every batch and return all results ordered by entry index
    pub fn into_results(mut self) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = self.by_ref().flat_map(|batch| batch.results).collect();
        results.sort_by_key(|r| r.index);
        results
    }
}

impl Iterator for SearchStream {
    type Item = SearchBatch;

    fn next(&mut self) -> Option<SearchBatch> {
        self.results.recv().ok()
    }
}

impl Drop for SearchStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Compile `pattern` and start searching every entry of the session
pub(crate) fn search(
    session: Arc<Session>,
    pattern: &str,
    options: &SearchOptions,
    cancel: CancelToken,
) -> Result<SearchStream> {
    let pattern = Arc::new(CompiledPattern::compile(
        pattern,
        options.mode,
        options.case_insensitive,
    )?);

    let started = Instant::now();
    let workers = match options.worker_count {
        0 => num_cpus(),
        n => n,
    };
    let partition = Partition::new(session.index.len(), workers, options.chunk_size);
    debug!(
        entries = session.index.len(),
        workers,
        batches = partition.len(),
        batch_size = partition.batch_size(),
        deep_body = options.deep_body,
        "search started"
    );

    let (work_tx, work_rx) = bounded::<Range<usize>>(workers * QUEUE_DEPTH_PER_WORKER);
    let (result_tx, result_rx) = bounded::<SearchBatch>(RESULT_CHANNEL_CAPACITY);
    let finished = Arc::new(OnceLock::new());

    let partitioner = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            for range in partition {
                if cancel.is_cancelled() || work_tx.send(range).is_err() {
                    break;
                }
            }
            // work_tx drops here, closing the queue
        })
    };

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let session = Arc::clone(&session);
            let pattern = Arc::clone(&pattern);
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            let deep_body = options.deep_body;
            thread::spawn(move || {
                while !cancel.is_cancelled() {
                    let Ok(range) = work_rx.recv() else { break };
                    let batch = guarded_batch(range, |range| {
                        scan_batch(&session, &pattern, deep_body, range)
                    });
                    if !batch.results.is_empty() && result_tx.send(batch).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
    drop(work_rx);

    {
        let finished = Arc::clone(&finished);
        let stats = Arc::clone(&session.stats);
        thread::spawn(move || {
            if partitioner.join().is_err() {
                warn!("search partitioner panicked; remaining batches were not queued");
            }
            for handle in handles {
                if handle.join().is_err() {
                    warn!("search worker exited abnormally");
                }
            }
            let elapsed = started.elapsed();
            stats.record_search(elapsed);
            let _ = finished.set(elapsed);
            debug!(elapsed_us = elapsed.as_micros() as u64, "search finished");
            // The last sender closes the result channel
            drop(result_tx);
        });
    }

    Ok(SearchStream {
        results: result_rx,
        cancel,
        started,
        finished,
    })
}

/// Run `scan` over one batch; a panic turns every entry of the batch into a
/// failed result instead of silently dropping it
fn guarded_batch(
    range: Range<usize>,
    scan: impl FnOnce(Range<usize>) -> SearchBatch,
) -> SearchBatch {
    match panic::catch_unwind(AssertUnwindSafe(|| scan(range.clone()))) {
        Ok(batch) => batch,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            warn!(start = range.start, end = range.end, %reason, "search batch panicked");
            let results = range
                .clone()
                .map(|index| {
                    SearchResult::failed(
                        index,
                        HarError::SearchAborted {
                            index,
                            reason: reason.clone(),
                        },
                    )
                })
                .collect();
            SearchBatch { range, results }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Match every entry of `range`, reading from disk only when metadata misses
fn scan_batch(
    session: &Session,
    pattern: &CompiledPattern,
    deep_body: bool,
    range: Range<usize>,
) -> SearchBatch {
    let mut buf = session.reader.buffers().acquire();
    let mut scratch = Vec::new();
    let mut results = Vec::new();

    for index in range.clone() {
        let Some(meta) = session.index.entry(index) else {
            break;
        };
        if let Some(field) = match_metadata(pattern, meta, &mut scratch) {
            results.push(SearchResult::hit(index, field));
            continue;
        }
        match session.load(index, &mut buf) {
            Ok(entry) => {
                if let Some(field) = match_entry(pattern, &entry, deep_body, &mut scratch) {
                    results.push(SearchResult::hit(index, field));
                }
            }
            Err(err) => results.push(SearchResult::failed(index, err)),
        }
    }

    SearchBatch { range, results }
}

fn match_metadata(
    pattern: &CompiledPattern,
    meta: &EntryMetadata,
    scratch: &mut Vec<u8>,
) -> Option<MatchField> {
    if pattern.is_match(meta.url.as_bytes()) {
        return Some(MatchField::Url);
    }
    if pattern.is_match(meta.method.as_bytes()) {
        return Some(MatchField::Method);
    }
    scratch.clear();
    let _ = write!(scratch, "{}", meta.status);
    if pattern.is_match(scratch) {
        return Some(MatchField::Status);
    }
    if pattern.is_match(meta.status_text.as_bytes()) {
        return Some(MatchField::StatusText);
    }
    if pattern.is_match(meta.mime_type.as_bytes()) {
        return Some(MatchField::MimeType);
    }
    match &meta.server_ip {
        Some(ip) if pattern.is_match(ip.as_bytes()) => Some(MatchField::ServerIp),
        _ => None,
    }
}

fn match_entry(
    pattern: &CompiledPattern,
    entry: &Entry,
    deep_body: bool,
    scratch: &mut Vec<u8>,
) -> Option<MatchField> {
    scratch.clear();
    write_headers(&entry.request.headers, scratch);
    if pattern.is_match(scratch) {
        return Some(MatchField::RequestHeaders);
    }

    let request_body = entry.request.post_data.as_ref().and_then(|p| p.text.as_deref());
    if request_body.is_some_and(|text| pattern.is_match(text.as_bytes())) {
        return Some(MatchField::RequestBody);
    }

    scratch.clear();
    write_headers(&entry.response.headers, scratch);
    if pattern.is_match(scratch) {
        return Some(MatchField::ResponseHeaders);
    }

    if deep_body
        && let Some(text) = &entry.response.content.text
        && pattern.is_match(text.as_bytes())
    {
        return Some(MatchField::ResponseBody);
    }
    None
}
