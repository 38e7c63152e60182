//! Integration tests for concurrent search.

mod fixtures;

use fixtures::{document, entry, many_entries, three_entries, with_body, with_post, write_har};
use harx::HarError;
use harx::search::{MatchField, SearchMode, SearchOptions, SearchResult};
use harx::streamer::{HarStreamer, IndexStore, StreamerConfig};
use harx::utils::CancelToken;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

fn open(path: &Path, cache_capacity: usize) -> HarStreamer {
    let mut streamer = HarStreamer::new(
        path,
        StreamerConfig {
            cache_capacity,
            index_store: IndexStore::Disabled,
            ..StreamerConfig::default()
        },
    );
    streamer.initialize().unwrap();
    streamer
}

fn run(streamer: &HarStreamer, pattern: &str, options: &SearchOptions) -> Vec<SearchResult> {
    streamer
        .search(pattern, options, CancelToken::new())
        .unwrap()
        .into_results()
}

fn hits(results: &[SearchResult]) -> Vec<(usize, MatchField)> {
    results
        .iter()
        .filter_map(|r| r.field.map(|f| (r.index, f)))
        .collect()
}

#[test]
fn test_secret_matches_url() {
    let file = three_entries();
    let streamer = open(file.path(), 0);

    let results = run(&streamer, "secret", &SearchOptions::default());
    assert_eq!(hits(&results), vec![(1, MatchField::Url)]);
}

#[test]
fn test_status_code_matches_as_decimal() {
    let file = three_entries();
    let streamer = open(file.path(), 0);

    let results = run(&streamer, "40", &SearchOptions::default());
    assert_eq!(hits(&results), vec![(1, MatchField::Status)]);
}

#[test]
fn test_metadata_only_search_reads_nothing() {
    let file = many_entries(64);
    let streamer = open(file.path(), 0);
    let before = streamer.stats().unwrap().bytes_read;

    let options = SearchOptions {
        worker_count: 4,
        chunk_size: 5,
        ..SearchOptions::default()
    };
    let results = run(&streamer, "https://example.com/item/", &options);
    assert_eq!(results.len(), 64);
    assert!(results.iter().all(|r| r.field == Some(MatchField::Url)));
    assert!(results.iter().all(|r| r.field.is_some_and(MatchField::is_metadata)));
    assert_eq!(streamer.stats().unwrap().bytes_read, before);
}

#[test]
fn test_deep_body_only_when_enabled() {
    let file = many_entries(25);
    let streamer = open(file.path(), 0);

    let shallow = run(&streamer, "body of item 17", &SearchOptions::default());
    assert!(hits(&shallow).is_empty());

    let deep = SearchOptions {
        deep_body: true,
        ..SearchOptions::default()
    };
    let results = run(&streamer, "body of item 17", &deep);
    assert_eq!(hits(&results), vec![(17, MatchField::ResponseBody)]);
}

#[test]
fn test_request_side_fields() {
    let file = write_har(&document(vec![
        with_post(entry("POST", "https://example.com/api", 200), r#"{"user":"alice"}"#),
        entry("GET", "https://example.com/other", 200),
    ]));
    let streamer = open(file.path(), 0);

    let results = run(&streamer, "alice", &SearchOptions::default());
    assert_eq!(hits(&results), vec![(0, MatchField::RequestBody)]);

    let results = run(&streamer, "Accept: */*", &SearchOptions::default());
    assert_eq!(
        hits(&results),
        vec![(0, MatchField::RequestHeaders), (1, MatchField::RequestHeaders)]
    );

    let results = run(&streamer, "content-type", &SearchOptions {
        case_insensitive: true,
        ..SearchOptions::default()
    });
    assert_eq!(
        hits(&results),
        vec![(0, MatchField::ResponseHeaders), (1, MatchField::ResponseHeaders)]
    );
}

#[test]
fn test_regex_mode() {
    let file = many_entries(30);
    let streamer = open(file.path(), 0);
    let options = SearchOptions {
        mode: SearchMode::Regex,
        ..SearchOptions::default()
    };

    let results = run(&streamer, r"^5\d\d$", &options);
    assert_eq!(
        hits(&results),
        vec![
            (9, MatchField::Status),
            (19, MatchField::Status),
            (29, MatchField::Status)
        ]
    );

    assert!(matches!(
        streamer.search("item/(", &options, CancelToken::new()),
        Err(HarError::InvalidPattern { .. })
    ));
}

#[test]
fn test_results_independent_of_partitioning() {
    let file = many_entries(57);
    let streamer = open(file.path(), 16);
    let deep = SearchOptions {
        deep_body: true,
        ..SearchOptions::default()
    };
    let expected = hits(&run(&streamer, "item 3", &deep));
    assert_eq!(expected.len(), 11);

    for (workers, chunk) in [(1, 0), (2, 1), (3, 7), (8, 0), (16, 100)] {
        let options = SearchOptions {
            worker_count: workers,
            chunk_size: chunk,
            ..deep.clone()
        };
        assert_eq!(hits(&run(&streamer, "item 3", &options)), expected);
    }
}

#[test]
fn test_cache_serves_repeat_searches() {
    let file = many_entries(10);
    let streamer = open(file.path(), 32);
    let deep = SearchOptions {
        deep_body: true,
        ..SearchOptions::default()
    };

    run(&streamer, "no such text", &deep);
    let after_first = streamer.stats().unwrap();
    assert_eq!(after_first.cache_misses, 10);

    run(&streamer, "no such text", &deep);
    let after_second = streamer.stats().unwrap();
    assert_eq!(after_second.cache_hits, 10);
    assert_eq!(after_second.bytes_read, after_first.bytes_read);
}

#[test]
fn test_cancel_stops_new_batches() {
    let file = many_entries(200);
    let streamer = open(file.path(), 0);
    let options = SearchOptions {
        worker_count: 1,
        chunk_size: 1,
        ..SearchOptions::default()
    };

    let mut stream = streamer
        .search("example.com", &options, CancelToken::new())
        .unwrap();
    let first = stream.next().unwrap();
    assert_eq!(first.range.len(), 1);
    stream.cancel();

    let delivered: usize = stream.map(|batch| batch.results.len()).sum::<usize>() + 1;
    assert!(delivered < 200);
}

#[test]
fn test_dropping_stream_stops_reading() {
    let file = many_entries(2_000);
    let file_len = fs::metadata(file.path()).unwrap().len();
    let streamer = open(file.path(), 0);
    let options = SearchOptions {
        deep_body: true,
        worker_count: 1,
        chunk_size: 1,
        ..SearchOptions::default()
    };

    drop(
        streamer
            .search("no such text", &options, CancelToken::new())
            .unwrap(),
    );

    // The collector records the search once every worker has exited
    let deadline = Instant::now() + Duration::from_secs(10);
    while streamer.stats().unwrap().searches == 0 {
        assert!(Instant::now() < deadline, "search kept running after drop");
        thread::sleep(Duration::from_millis(5));
    }
    let settled = streamer.stats().unwrap().bytes_read;
    assert!(settled < file_len / 2, "read {} of {} bytes", settled, file_len);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(streamer.stats().unwrap().bytes_read, settled);
}

#[test]
fn test_search_elapsed_and_stats() {
    let file = three_entries();
    let streamer = open(file.path(), 0);

    let mut stream = streamer
        .search("example", &SearchOptions::default(), CancelToken::new())
        .unwrap();
    let batches: Vec<_> = stream.by_ref().collect();
    assert!(!batches.is_empty());
    assert!(stream.is_finished());

    let stats = streamer.stats().unwrap();
    assert_eq!(stats.searches, 1);
    assert_eq!(stats.last_search_us, stream.elapsed().as_micros() as u64);
}

#[test]
fn test_body_with_escapes_matches_decoded_text() {
    let file = write_har(&document(vec![with_body(
        entry("GET", "https://example.com/", 200),
        "say \"hi\"\n",
    )]));
    let streamer = open(file.path(), 0);
    let deep = SearchOptions {
        deep_body: true,
        ..SearchOptions::default()
    };
    assert_eq!(
        hits(&run(&streamer, "say \"hi\"", &deep)),
        vec![(0, MatchField::ResponseBody)]
    );
}
