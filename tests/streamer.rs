//! Integration tests for random access through `HarStreamer`.

mod fixtures;

use fixtures::{document, entry, many_entries, three_entries, with_body, with_started, write_har};
use harx::har::Entry;
use harx::scanner::ScannerKind;
use harx::streamer::{HarStreamer, IndexStore, StreamerConfig};
use harx::utils::CancelToken;
use harx::HarError;
use serde_json::Value;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

fn config(cache_capacity: usize) -> StreamerConfig {
    StreamerConfig {
        cache_capacity,
        index_store: IndexStore::Disabled,
        ..StreamerConfig::default()
    }
}

fn open(path: &Path, config: StreamerConfig) -> HarStreamer {
    let mut streamer = HarStreamer::new(path, config);
    streamer.initialize().unwrap();
    streamer
}

#[test]
fn test_offsets_frame_every_entry() {
    let doc = document(vec![
        entry("GET", "https://example.com/a", 200),
        with_body(entry("GET", "https://example.com/b", 200), "{\"nested\": [1, 2, \"]\"]}"),
        entry("DELETE", "https://example.com/c", 204),
    ]);
    let file = write_har(&doc);
    let bytes = fs::read(file.path()).unwrap();
    let streamer = open(file.path(), config(0));

    let index = streamer.index().unwrap();
    assert_eq!(index.len(), 3);
    for (i, meta) in index.entries().iter().enumerate() {
        let raw = &bytes[meta.offset as usize..meta.end() as usize];
        let parsed: Value = serde_json::from_slice(raw).unwrap();
        assert_eq!(parsed, doc["log"]["entries"][i]);
    }
}

#[test]
fn test_get_entry_matches_source() {
    let file = three_entries();
    let streamer = open(file.path(), config(0));

    let entry = streamer.get_entry(1).unwrap();
    assert_eq!(entry.request.method, "POST");
    assert_eq!(entry.request.url, "https://example.com/login?key=secret");
    assert_eq!(entry.response.status, 401);
    assert_eq!(entry.pageref.as_deref(), Some("page_1"));

    let meta = streamer.get_metadata(1).unwrap();
    assert_eq!(meta.status, 401);
    assert_eq!(&*meta.method, "POST");
    assert!(meta.flags.is_error());
    assert_eq!(meta.request_size, 40);
    assert_eq!(meta.response_size, 65);
}

#[test]
fn test_metadata_does_no_io() {
    let file = many_entries(20);
    let streamer = open(file.path(), config(0));

    for i in 0..20 {
        streamer.get_metadata(i).unwrap();
    }
    let stats = streamer.stats().unwrap();
    assert_eq!(stats.bytes_read, 0);
    assert_eq!(stats.seeks, 0);
}

#[test]
fn test_operations_require_initialize() {
    let file = three_entries();
    let streamer = HarStreamer::new(file.path(), config(4));

    assert!(matches!(streamer.get_entry(0), Err(HarError::NotInitialized)));
    assert!(matches!(streamer.get_metadata(0), Err(HarError::NotInitialized)));
    assert!(matches!(streamer.stream_range(0, 1), Err(HarError::NotInitialized)));
    assert!(matches!(streamer.index(), Err(HarError::NotInitialized)));
    assert!(matches!(streamer.stats(), Err(HarError::NotInitialized)));
    assert!(matches!(streamer.close(), Err(HarError::NotInitialized)));
}

#[test]
fn test_initialize_twice_is_noop() {
    let file = three_entries();
    let mut streamer = open(file.path(), config(0));
    let first = Arc::clone(streamer.index().unwrap());

    streamer.initialize().unwrap();
    assert!(Arc::ptr_eq(&first, streamer.index().unwrap()));
}

#[test]
fn test_range_errors() {
    let file = three_entries();
    let streamer = open(file.path(), config(0));

    assert!(matches!(
        streamer.get_entry(3),
        Err(HarError::OutOfRange { index: 3, total: 3 })
    ));
    assert!(matches!(
        streamer.get_metadata(usize::MAX),
        Err(HarError::OutOfRange { .. })
    ));
    assert!(matches!(
        streamer.stream_range(2, 1),
        Err(HarError::OutOfRange { .. })
    ));
    assert!(matches!(
        streamer.stream_range(0, 4),
        Err(HarError::OutOfRange { .. })
    ));
    assert_eq!(streamer.stream_range(3, 3).unwrap().count(), 0);
}

#[test]
fn test_stream_range_is_ordered() {
    let file = many_entries(12);
    let streamer = open(file.path(), config(0));

    let results: Vec<_> = streamer.stream_range(4, 9).unwrap().collect();
    let indices: Vec<usize> = results.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![4, 5, 6, 7, 8]);
    for result in &results {
        let entry = result.entry.as_ref().unwrap();
        assert_eq!(entry.request.url, format!("https://example.com/item/{}", result.index));
        assert_eq!(*result.metadata.url, entry.request.url);
    }
}

#[test]
fn test_stream_filtered_reads_only_matches() {
    let file = many_entries(30);
    let streamer = open(file.path(), config(0));

    let failures: Vec<_> = streamer
        .stream_filtered(|meta| meta.status >= 500)
        .unwrap()
        .collect();
    let indices: Vec<usize> = failures.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![9, 19, 29]);
    assert!(failures.iter().all(|r| r.entry.is_ok()));
    assert_eq!(streamer.stats().unwrap().entries_decoded, 3);
}

#[test]
fn test_cache_hit_returns_same_entry() {
    let file = three_entries();
    let streamer = open(file.path(), config(8));

    let first = streamer.get_entry(2).unwrap();
    let second = streamer.get_entry(2).unwrap();
    assert_eq!(first, second);
    assert!(Arc::ptr_eq(&first, &second));

    let stats = streamer.stats().unwrap();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.entries_decoded, 1);
}

#[test]
fn test_disabled_cache_never_hits() {
    let file = three_entries();
    let streamer = open(file.path(), config(0));

    let first = streamer.get_entry(0).unwrap();
    let second = streamer.get_entry(0).unwrap();
    assert_eq!(first, second);

    let stats = streamer.stats().unwrap();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.cache_misses, 0);
    assert_eq!(stats.entries_decoded, 2);
}

#[test]
fn test_close_is_idempotent() {
    let file = three_entries();
    let streamer = open(file.path(), config(4));
    streamer.get_entry(0).unwrap();

    streamer.close().unwrap();
    streamer.close().unwrap();
    assert!(matches!(
        streamer.get_entry(0),
        Err(HarError::Read { index: Some(0), .. })
    ));
    // Metadata stays available
    assert_eq!(streamer.get_metadata(0).unwrap().status, 200);
}

#[test]
fn test_response_body_stream() {
    let body = "line one\nline \"two\" \u{1F600}";
    let file = write_har(&document(vec![
        entry("GET", "https://example.com/", 200),
        with_body(entry("GET", "https://example.com/page", 200), body),
    ]));
    let streamer = open(file.path(), config(0));

    let mut text = String::new();
    let mut stream = streamer.stream_response_body(1).unwrap();
    stream.read_to_string(&mut text).unwrap();
    assert_eq!(text, body);
    assert_eq!(stream.mime_type.as_deref(), Some("text/plain"));
    assert!(!stream.is_base64());
    drop(stream);

    assert!(matches!(
        streamer.stream_response_body(2),
        Err(HarError::OutOfRange { .. })
    ));
}

#[test]
fn test_persisted_index_is_reused_until_stale() {
    let dir = tempfile::tempdir().unwrap();
    let index_path = dir.path().join("capture.idx");
    let file = many_entries(25);
    let persisted = StreamerConfig {
        index_store: IndexStore::At(index_path.clone()),
        ..config(0)
    };

    let built = open(file.path(), persisted.clone());
    assert!(!built.stats().unwrap().index_from_disk);
    assert!(index_path.exists());

    let loaded = open(file.path(), persisted.clone());
    assert!(loaded.stats().unwrap().index_from_disk);
    assert_eq!(**built.index().unwrap(), **loaded.index().unwrap());
    assert_eq!(
        loaded.get_entry(24).unwrap().request.url,
        "https://example.com/item/24"
    );

    // Trailing whitespace changes size and hash but not the entries
    let mut har = fs::OpenOptions::new().append(true).open(file.path()).unwrap();
    har.write_all(b"\n\n").unwrap();
    drop(har);

    let rebuilt = open(file.path(), persisted.clone());
    assert!(!rebuilt.stats().unwrap().index_from_disk);
    assert_eq!(rebuilt.index().unwrap().len(), 25);

    let forced = open(
        file.path(),
        StreamerConfig {
            force_rebuild: true,
            ..persisted
        },
    );
    assert!(!forced.stats().unwrap().index_from_disk);
}

#[test]
fn test_corrupt_persisted_index_is_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let index_path = dir.path().join("capture.idx");
    fs::write(&index_path, b"not an index").unwrap();
    let file = three_entries();

    let streamer = open(
        file.path(),
        StreamerConfig {
            index_store: IndexStore::At(index_path.clone()),
            ..config(0)
        },
    );
    assert!(!streamer.stats().unwrap().index_from_disk);
    assert_eq!(&fs::read(&index_path).unwrap()[..8], b"HARXIDX\0");
}

#[test]
fn test_structural_errors_abort_initialize() {
    let truncated = {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"log": {"entries": [{"request": {}}, {"req"#)
            .unwrap();
        file
    };
    let mut streamer = HarStreamer::new(truncated.path(), config(0));
    assert!(matches!(
        streamer.initialize(),
        Err(HarError::TruncatedFile { .. })
    ));
    assert!(!streamer.is_initialized());

    let no_entries = write_har(&serde_json::json!({"log": {"version": "1.2"}}));
    let mut streamer = HarStreamer::new(no_entries.path(), config(0));
    assert!(matches!(
        streamer.initialize(),
        Err(HarError::MalformedJson { .. })
    ));
}

#[test]
fn test_empty_capture() {
    let file = write_har(&document(Vec::new()));
    let streamer = open(file.path(), config(0));
    assert!(streamer.is_empty().unwrap());
    assert_eq!(streamer.stream_range(0, 0).unwrap().count(), 0);
    assert!(matches!(
        streamer.get_entry(0),
        Err(HarError::OutOfRange { index: 0, total: 0 })
    ));
}

#[test]
fn test_cancelled_initialize() {
    let file = many_entries(5);
    let mut streamer = HarStreamer::new(file.path(), config(0));
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(matches!(
        streamer.initialize_with(&cancel),
        Err(HarError::Cancelled)
    ));
    assert!(!streamer.is_initialized());
}

#[test]
fn test_scanner_backends_agree() {
    let file = write_har(&document(vec![
        with_started(entry("GET", "https://example.com/1", 200), "2024-03-01T10:00:01.000Z"),
        with_started(entry("GET", "https://example.com/2", 302), "2024-03-01T10:00:00.500Z"),
        with_started(entry("PUT", "https://example.com/3", 503), "not a timestamp"),
    ]));

    let buffered = open(file.path(), config(0));
    let mapped = open(
        file.path(),
        StreamerConfig {
            scanner: ScannerKind::Mapped,
            ..config(0)
        },
    );
    assert_eq!(**buffered.index().unwrap(), **mapped.index().unwrap());

    let index = mapped.index().unwrap();
    assert_eq!(index.entries()[2].started_ms, None);
    let early = index.started_between(1_709_287_200_000, 1_709_287_200_900);
    assert_eq!(early, vec![1]);

    let decoded: Entry = serde_json::from_value(entry("PUT", "https://example.com/3", 503)).unwrap();
    assert_eq!(mapped.get_entry(2).unwrap().request, decoded.request);
}
