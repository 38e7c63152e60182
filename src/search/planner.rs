//! Work partitioning over the entry index space.

use std::ops::Range;

/// Batch size for `total` entries: `chunk_size` when set, otherwise an even
/// split across workers. Never zero.
pub fn batch_size(total: usize, worker_count: usize, chunk_size: usize) -> usize {
    if chunk_size > 0 {
        return chunk_size;
    }
    total.div_ceil(worker_count.max(1)).max(1)
}

/// Half-open batches covering `[0, total)` in ascending order
#[derive(Debug, Clone)]
pub struct Partition {
    next: usize,
    total: usize,
    size: usize,
}

impl Partition {
    pub fn new(total: usize, worker_count: usize, chunk_size: usize) -> Self {
        Self {
            next: 0,
            total,
            size: batch_size(total, worker_count, chunk_size),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.size
    }
}

impl Iterator for Partition {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.next >= self.total {
            return None;
        }
        let start = self.next;
        self.next = start.saturating_add(self.size).min(self.total);
        Some(start..self.next)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total - self.next).div_ceil(self.size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Partition {}
