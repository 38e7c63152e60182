use crate::index::catalog::Index;
use crate::index::types::{EntryMetadata, IndexSummary};
use std::collections::HashMap;

/// Aggregate statistics over a completed metadata sequence
pub fn summarize(entries: &[EntryMetadata], unique_urls: usize) -> IndexSummary {
    let mut summary = IndexSummary {
        total_entries: entries.len() as u64,
        unique_urls: unique_urls as u64,
        ..Default::default()
    };

    for meta in entries {
        summary.total_request_bytes += meta.request_size;
        summary.total_response_bytes += meta.response_size;
        if meta.flags.is_error() {
            summary.error_count += 1;
        }
        if let Some(started) = meta.started_ms {
            summary.first_started_ms =
                Some(summary.first_started_ms.map_or(started, |first| first.min(started)));
        }
        if let Some(finished) = meta.finished_ms() {
            summary.last_finished_ms =
                Some(summary.last_finished_ms.map_or(finished, |last| last.max(finished)));
        }
    }

    summary
}

/// Entry counts per MIME type, most common first
pub fn mime_breakdown(index: &Index) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for meta in index.entries() {
        *counts.entry(&*meta.mime_type).or_insert(0) += 1;
    }

    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(mime, count)| (mime.to_string(), count))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Entry counts per status class (`1xx` .. `5xx`, plus `0` for no response)
pub fn status_classes(index: &Index) -> Vec<(String, u64)> {
    let mut classes: Vec<(String, u64)> = Vec::new();
    for (status, count) in index.statuses() {
        let label = match status {
            0 => "0".to_string(),
            s => format!("{}xx", s / 100),
        };
        match classes.last_mut() {
            Some((last, total)) if *last == label => *total += count,
            _ => classes.push((label, count)),
        }
    }
    classes
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format a millisecond duration
pub fn format_duration_ms(ms: f64) -> String {
    if ms >= 60_000.0 {
        format!("{:.1} min", ms / 60_000.0)
    } else if ms >= 1_000.0 {
        format!("{:.2} s", ms / 1_000.0)
    } else {
        format!("{:.1} ms", ms)
    }
}

/// Format epoch millis as RFC 3339
pub fn format_timestamp_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::catalog::tests::sample_index;

    #[test]
    fn test_summary_totals() {
        let index = sample_index(&[
            ("GET", "/a", 200, Some(5_000)),
            ("GET", "/b", 0, Some(1_000)),
            ("GET", "/a", 200, None),
        ]);
        let summary = summarize(index.entries(), 2);
        assert_eq!(summary.total_entries, 3);
        assert_eq!(summary.total_request_bytes, 60);
        assert_eq!(summary.total_response_bytes, 600);
        assert_eq!(summary.first_started_ms, Some(1_000));
        assert_eq!(summary.last_finished_ms, Some(5_010));
        assert_eq!(summary.unique_urls, 2);
    }

    #[test]
    fn test_status_classes_merge() {
        let index = sample_index(&[
            ("GET", "/a", 200, None),
            ("GET", "/b", 204, None),
            ("GET", "/c", 404, None),
            ("GET", "/d", 0, None),
        ]);
        assert_eq!(
            status_classes(&index),
            vec![("0".to_string(), 1), ("2xx".to_string(), 2), ("4xx".to_string(), 1)]
        );
        assert_eq!(mime_breakdown(&index), vec![("text/html".to_string(), 4)]);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_duration_ms(12.34), "12.3 ms");
        assert_eq!(format_duration_ms(1500.0), "1.50 s");
        assert_eq!(format_timestamp_ms(0), "1970-01-01T00:00:00.000Z");
    }
}
