//! Binary index persistence.
//!
//! Layout: 8 magic bytes, little-endian u32 format version, then a bincode
//! body. String fields are stored as string-table ids and postings as
//! delta-varint byte runs.

use crate::error::{HarError, Result};
use crate::index::catalog::{Index, Postings};
use crate::index::strings::StringTable;
use crate::index::types::{
    EntryFlags, EntryMetadata, FORMAT_VERSION, INDEX_MAGIC, IndexSummary, LogInfo, SourceInfo,
};
use crate::utils::encoding::encode_postings;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Entry metadata with string fields replaced by table ids
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PackedEntry {
    pub offset: u64,
    pub length: u64,
    pub method: u32,
    pub url: u32,
    pub status: u16,
    pub status_text: u32,
    pub mime_type: u32,
    pub started_ms: Option<i64>,
    pub duration_ms: f64,
    pub request_size: u64,
    pub response_size: u64,
    pub body_size: u64,
    pub page_ref: Option<u32>,
    pub server_ip: Option<u32>,
    pub connection: Option<u32>,
    pub flags: EntryFlags,
}

/// Serialized body of an index file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PackedIndex {
    pub source: SourceInfo,
    pub log: LogInfo,
    pub strings: Vec<String>,
    pub entries: Vec<PackedEntry>,
    /// (string id, encoded postings)
    pub by_url: Vec<(u32, Vec<u8>)>,
    pub by_method: Vec<(u32, Vec<u8>)>,
    pub by_page: Vec<(u32, Vec<u8>)>,
    pub by_status: Vec<(u16, Vec<u8>)>,
    pub timeline: Vec<(i64, u32)>,
    pub summary: IndexSummary,
}

impl PackedIndex {
    pub fn pack(index: &Index) -> Result<Self> {
        let strings = &index.strings;
        let id = |s: &Arc<str>| {
            strings
                .id_of(s)
                .ok_or_else(|| HarError::Persist(format!("string {:?} missing from table", s)))
        };
        let id_opt = |s: &Option<Arc<str>>| s.as_ref().map(id).transpose();

        let entries = index
            .entries
            .iter()
            .map(|meta| {
                Ok(PackedEntry {
                    offset: meta.offset,
                    length: meta.length,
                    method: id(&meta.method)?,
                    url: id(&meta.url)?,
                    status: meta.status,
                    status_text: id(&meta.status_text)?,
                    mime_type: id(&meta.mime_type)?,
                    started_ms: meta.started_ms,
                    duration_ms: meta.duration_ms,
                    request_size: meta.request_size,
                    response_size: meta.response_size,
                    body_size: meta.body_size,
                    page_ref: id_opt(&meta.page_ref)?,
                    server_ip: id_opt(&meta.server_ip)?,
                    connection: id_opt(&meta.connection)?,
                    flags: meta.flags,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let pack_postings = |postings: &Postings| -> Result<Vec<(u32, Vec<u8>)>> {
            let mut packed = postings
                .iter()
                .map(|(key, bitmap)| Ok((id(key)?, encode_postings(bitmap))))
                .collect::<Result<Vec<_>>>()?;
            packed.sort_unstable_by_key(|(id, _)| *id);
            Ok(packed)
        };

        Ok(Self {
            source: index.source.clone(),
            log: index.log.clone(),
            strings: strings.iter().map(|s| s.to_string()).collect(),
            entries,
            by_url: pack_postings(&index.by_url)?,
            by_method: pack_postings(&index.by_method)?,
            by_page: pack_postings(&index.by_page)?,
            by_status: index
                .by_status
                .iter()
                .map(|(status, bitmap)| (*status, encode_postings(bitmap)))
                .collect(),
            timeline: index.timeline.points().to_vec(),
            summary: index.summary.clone(),
        })
    }

    /// Resolve table ids back into shared strings
    pub fn unpack_entry(packed: &PackedEntry, strings: &StringTable) -> Option<EntryMetadata> {
        let get = |id: u32| strings.get(id).cloned();
        let get_opt = |id: Option<u32>| match id {
            Some(id) => get(id).map(Some),
            None => Some(None),
        };

        Some(EntryMetadata {
            offset: packed.offset,
            length: packed.length,
            method: get(packed.method)?,
            url: get(packed.url)?,
            status: packed.status,
            status_text: get(packed.status_text)?,
            mime_type: get(packed.mime_type)?,
            started_ms: packed.started_ms,
            duration_ms: packed.duration_ms,
            request_size: packed.request_size,
            response_size: packed.response_size,
            body_size: packed.body_size,
            page_ref: get_opt(packed.page_ref)?,
            server_ip: get_opt(packed.server_ip)?,
            connection: get_opt(packed.connection)?,
            flags: packed.flags,
        })
    }
}

/// Writes indexes to disk
pub struct IndexWriter;

impl IndexWriter {
    /// Persist `index` at `path`, replacing any previous file atomically
    pub fn write(index: &Index, path: &Path) -> Result<()> {
        let packed = PackedIndex::pack(index)?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));

        let written = (|| -> Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(INDEX_MAGIC)?;
            writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
            bincode::serialize_into(&mut writer, &packed)?;
            let file = writer
                .into_inner()
                .map_err(|e| HarError::Io(e.into_error()))?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, path)?;

        debug!(path = %path.display(), entries = index.len(), "index persisted");
        Ok(())
    }
}
