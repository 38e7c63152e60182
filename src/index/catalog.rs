//! The in-memory catalog: entry metadata plus secondary lookups.

use crate::index::stats::summarize;
use crate::index::strings::StringTable;
use crate::index::types::{EntryMetadata, IndexSummary, LogInfo, SourceInfo};
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeBounds;
use std::sync::Arc;

/// Postings keyed by an interned string
pub type Postings = HashMap<Arc<str>, RoaringBitmap, ahash::RandomState>;

/// Entries ordered by start time for range queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeIndex {
    points: Vec<(i64, u32)>,
}

impl TimeIndex {
    pub fn build(entries: &[EntryMetadata]) -> Self {
        let mut points: Vec<(i64, u32)> = entries
            .iter()
            .enumerate()
            .filter_map(|(i, meta)| meta.started_ms.map(|ms| (ms, i as u32)))
            .collect();
        points.sort_unstable();
        Self { points }
    }

    /// Restore persisted points; `None` unless they are sorted
    pub fn from_points(points: Vec<(i64, u32)>) -> Option<Self> {
        points.is_sorted().then_some(Self { points })
    }

    /// Points with `from <= started_ms < to`, ordered by time
    pub fn range(&self, from: i64, to: i64) -> &[(i64, u32)] {
        let lo = self.points.partition_point(|(ms, _)| *ms < from);
        let hi = self.points.partition_point(|(ms, _)| *ms < to);
        &self.points[lo..hi.max(lo)]
    }

    pub fn points(&self) -> &[(i64, u32)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Read-only catalog of a HAR file, shared as `Arc<Index>`
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub source: SourceInfo,
    pub log: LogInfo,
    pub(crate) entries: Vec<EntryMetadata>,
    pub(crate) by_url: Postings,
    pub(crate) by_method: Postings,
    pub(crate) by_page: Postings,
    pub(crate) by_status: BTreeMap<u16, RoaringBitmap>,
    pub(crate) timeline: TimeIndex,
    pub(crate) strings: StringTable,
    pub(crate) summary: IndexSummary,
}

/// Secondary lookups, built together or restored together
#[derive(Debug, Default)]
pub(crate) struct Secondary {
    pub by_url: Postings,
    pub by_method: Postings,
    pub by_page: Postings,
    pub by_status: BTreeMap<u16, RoaringBitmap>,
    pub timeline: TimeIndex,
}

impl Secondary {
    /// One linear pass over the completed metadata
    pub fn build(entries: &[EntryMetadata]) -> Self {
        let mut secondary = Secondary::default();
        for (i, meta) in entries.iter().enumerate() {
            let id = i as u32;
            secondary
                .by_url
                .entry(Arc::clone(&meta.url))
                .or_default()
                .insert(id);
            secondary
                .by_method
                .entry(Arc::clone(&meta.method))
                .or_default()
                .insert(id);
            if let Some(page) = &meta.page_ref {
                secondary
                    .by_page
                    .entry(Arc::clone(page))
                    .or_default()
                    .insert(id);
            }
            secondary.by_status.entry(meta.status).or_default().insert(id);
        }
        secondary.timeline = TimeIndex::build(entries);
        secondary
    }
}

impl Index {
    /// Finalize a scan: build secondary lookups and aggregate statistics
    pub fn assemble(
        source: SourceInfo,
        log: LogInfo,
        entries: Vec<EntryMetadata>,
        strings: StringTable,
    ) -> Self {
        let secondary = Secondary::build(&entries);
        Self::from_parts(source, log, entries, strings, secondary)
    }

    pub(crate) fn from_parts(
        source: SourceInfo,
        log: LogInfo,
        entries: Vec<EntryMetadata>,
        strings: StringTable,
        secondary: Secondary,
    ) -> Self {
        let summary = summarize(&entries, secondary.by_url.len());
        Self {
            source,
            log,
            entries,
            by_url: secondary.by_url,
            by_method: secondary.by_method,
            by_page: secondary.by_page,
            by_status: secondary.by_status,
            timeline: secondary.timeline,
            strings,
            summary,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EntryMetadata] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&EntryMetadata> {
        self.entries.get(index)
    }

    pub fn summary(&self) -> &IndexSummary {
        &self.summary
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn timeline(&self) -> &TimeIndex {
        &self.timeline
    }

    /// Entries requesting exactly `url`
    pub fn with_url(&self, url: &str) -> Option<&RoaringBitmap> {
        self.by_url.get(url)
    }

    pub fn with_method(&self, method: &str) -> Option<&RoaringBitmap> {
        self.by_method.get(method)
    }

    pub fn with_status(&self, status: u16) -> Option<&RoaringBitmap> {
        self.by_status.get(&status)
    }

    pub fn on_page(&self, page_id: &str) -> Option<&RoaringBitmap> {
        self.by_page.get(page_id)
    }

    /// Union of all status postings in `range`, e.g. `400..500`
    pub fn with_status_in<R: RangeBounds<u16>>(&self, range: R) -> RoaringBitmap {
        self.by_status
            .range(range)
            .fold(RoaringBitmap::new(), |acc, (_, bitmap)| acc | bitmap)
    }

    /// Entry indices started in `[from_ms, to_ms)`, ordered by start time
    pub fn started_between(&self, from_ms: i64, to_ms: i64) -> Vec<usize> {
        self.timeline
            .range(from_ms, to_ms)
            .iter()
            .map(|(_, i)| *i as usize)
            .collect()
    }

    /// Distinct URLs with their entry counts
    pub fn urls(&self) -> impl Iterator<Item = (&str, u64)> {
        self.by_url.iter().map(|(url, bm)| (&**url, bm.len()))
    }

    /// Distinct status codes with their entry counts, ascending
    pub fn statuses(&self) -> impl Iterator<Item = (u16, u64)> + '_ {
        self.by_status.iter().map(|(status, bm)| (*status, bm.len()))
    }

    /// Distinct methods with their entry counts
    pub fn methods(&self) -> impl Iterator<Item = (&str, u64)> {
        self.by_method.iter().map(|(m, bm)| (&**m, bm.len()))
    }

    /// Structural checks run after a restore
    pub fn check_invariants(&self) -> Result<(), String> {
        let total = self.entries.len() as u64;
        if self.summary.total_entries != total {
            return Err(format!(
                "summary reports {} entries, catalog holds {}",
                self.summary.total_entries, total
            ));
        }

        for pair in self.entries.windows(2) {
            if pair[0].end() > pair[1].offset {
                return Err(format!(
                    "entry at byte {} overlaps entry at byte {}",
                    pair[0].offset, pair[1].offset
                ));
            }
        }

        let postings = self
            .by_url
            .values()
            .chain(self.by_method.values())
            .chain(self.by_page.values())
            .chain(self.by_status.values());
        for bitmap in postings {
            if let Some(max) = bitmap.max() {
                if u64::from(max) >= total {
                    return Err(format!("posting {} outside {} entries", max, total));
                }
            }
        }

        if let Some((_, i)) = self.timeline.points().iter().find(|(_, i)| u64::from(*i) >= total) {
            return Err(format!("time index points at entry {} of {}", i, total));
        }

        Ok(())
    }
}
