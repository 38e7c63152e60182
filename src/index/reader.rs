use crate::error::{HarError, Result};
use crate::index::catalog::{Index, Postings, Secondary, TimeIndex};
use crate::index::strings::StringTable;
use crate::index::types::{FORMAT_VERSION, INDEX_MAGIC};
use crate::index::writer::PackedIndex;
use crate::scanner::source::hash_file;
use crate::utils::encoding::decode_postings;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Loads persisted indexes and validates them against the live HAR file
pub struct IndexReader;

impl IndexReader {
    /// Load the index at `index_path` for `har_path`.
    ///
    /// Fails with `StaleIndex` unless the header, file size, content hash
    /// and catalog invariants all check out.
    pub fn load(index_path: &Path, har_path: &Path) -> Result<Index> {
        let start = Instant::now();
        let packed = read_packed(index_path)?;

        // Cheap size check before paying for a full re-hash
        let live_size = fs::metadata(har_path)?.len();
        if live_size != packed.source.size {
            return Err(stale(format!(
                "file size changed from {} to {} bytes",
                packed.source.size, live_size
            )));
        }

        let expected_hash = packed.source.content_hash.clone();
        let (index, live_hash) = rayon::join(|| unpack(packed, har_path), || hash_file(har_path));
        let index = index?;
        let (live_hash, _) = live_hash?;

        if live_hash != expected_hash {
            return Err(stale("content hash differs from the indexed file"));
        }
        index.check_invariants().map_err(stale)?;

        info!(
            entries = index.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded persisted index"
        );
        Ok(index)
    }
}

fn read_packed(index_path: &Path) -> Result<PackedIndex> {
    let bytes = fs::read(index_path)?;
    if bytes.len() < 12 || &bytes[..8] != INDEX_MAGIC {
        return Err(stale("not a harx index file"));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[8..12]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(stale(format!(
            "format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let packed: PackedIndex = bincode::deserialize(&bytes[12..])
        .map_err(|e| stale(format!("corrupt index body: {}", e)))?;
    debug!(path = %index_path.display(), bytes = bytes.len(), "read index file");
    Ok(packed)
}

fn unpack(packed: PackedIndex, har_path: &Path) -> Result<Index> {
    let strings = StringTable::from_strings(&packed.strings);
    if strings.len() != packed.strings.len() {
        return Err(stale("string table holds duplicates"));
    }

    let entries = packed
        .entries
        .iter()
        .map(|entry| PackedIndex::unpack_entry(entry, &strings))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| stale("entry references an unknown string"))?;

    let keyed = |runs: &[(u32, Vec<u8>)]| -> Result<Postings> {
        let mut postings = Postings::default();
        for (id, run) in runs {
            let key = strings
                .get(*id)
                .cloned()
                .ok_or_else(|| stale("posting key references an unknown string"))?;
            let bitmap = decode_postings(run).ok_or_else(|| stale("corrupt posting list"))?;
            postings.insert(key, bitmap);
        }
        Ok(postings)
    };

    let mut by_status = BTreeMap::new();
    for (status, run) in &packed.by_status {
        let bitmap = decode_postings(run).ok_or_else(|| stale("corrupt posting list"))?;
        by_status.insert(*status, bitmap);
    }

    let secondary = Secondary {
        by_url: keyed(&packed.by_url)?,
        by_method: keyed(&packed.by_method)?,
        by_page: keyed(&packed.by_page)?,
        by_status,
        timeline: TimeIndex::from_points(packed.timeline)
            .ok_or_else(|| stale("time index is not sorted"))?,
    };

    let mut source = packed.source;
    source.path = har_path.to_path_buf();
    let index = Index::from_parts(source, packed.log, entries, strings, secondary);

    if index.summary != packed.summary {
        return Err(stale("stored summary does not match the catalog"));
    }
    Ok(index)
}

fn stale(reason: impl Into<String>) -> HarError {
    HarError::StaleIndex {
        reason: reason.into(),
    }
}
