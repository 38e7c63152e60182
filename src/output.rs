//! Terminal output for the `harx` binary

use crate::har::{Entry, Header};
use crate::index::stats::{
    format_duration_ms, format_size, format_timestamp_ms, mime_breakdown, status_classes,
};
use crate::index::{EntryMetadata, Index};
use crate::search::SearchResult;
use crate::stats::StatsSnapshot;
use std::io::{self, Write};
use std::path::Path;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Stdout with color when enabled and supported
pub fn stdout(color: bool) -> StandardStream {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    StandardStream::stdout(choice)
}

fn status_color(status: u16) -> Color {
    match status {
        200..=299 => Color::Green,
        300..=399 => Color::Cyan,
        400..=499 => Color::Yellow,
        _ => Color::Red,
    }
}

fn write_status(out: &mut impl WriteColor, status: u16) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(status_color(status))).set_bold(true))?;
    write!(out, "{:>3}", status)?;
    out.reset()
}

fn write_index(out: &mut impl WriteColor, index: usize) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
    write!(out, "{:>6}", index)?;
    out.reset()
}

/// Print index statistics
pub fn print_summary(
    out: &mut impl WriteColor,
    index: &Index,
    index_path: Option<&Path>,
    stats: &StatsSnapshot,
) -> io::Result<()> {
    let summary = index.summary();

    writeln!(out, "HAR Statistics")?;
    writeln!(out, "==============")?;
    writeln!(out)?;
    writeln!(out, "File:             {}", index.source.path.display())?;
    writeln!(out, "File size:        {}", format_size(index.source.size))?;
    match index_path {
        Some(path) => writeln!(out, "Index location:   {}", path.display())?,
        None => writeln!(out, "Index location:   (not persisted)")?,
    }
    writeln!(
        out,
        "Index source:     {} in {} ms",
        if stats.index_from_disk { "loaded" } else { "built" },
        stats.index_time_ms
    )?;
    writeln!(out, "HAR version:      {}", index.log.version)?;
    writeln!(
        out,
        "Creator:          {} {}",
        index.log.creator.name, index.log.creator.version
    )?;
    if let Some(browser) = &index.log.browser {
        writeln!(out, "Browser:          {} {}", browser.name, browser.version)?;
    }
    writeln!(out, "Pages:            {}", index.log.pages.len())?;

    writeln!(out)?;
    writeln!(out, "Entries:          {}", summary.total_entries)?;
    writeln!(out, "Unique URLs:      {}", summary.unique_urls)?;
    writeln!(
        out,
        "Interned strings: {} ({})",
        index.strings().len(),
        format_size(index.strings().data_bytes() as u64)
    )?;
    writeln!(out, "Errors:           {}", summary.error_count)?;
    writeln!(out, "Request bytes:    {}", format_size(summary.total_request_bytes))?;
    writeln!(out, "Response bytes:   {}", format_size(summary.total_response_bytes))?;
    if let (Some(first), Some(last), Some(span)) = (
        summary.first_started_ms,
        summary.last_finished_ms,
        summary.time_span_ms(),
    ) {
        writeln!(out, "First request:    {}", format_timestamp_ms(first))?;
        writeln!(out, "Last response:    {}", format_timestamp_ms(last))?;
        writeln!(out, "Time span:        {}", format_duration_ms(span as f64))?;
    }

    writeln!(out)?;
    writeln!(out, "Entries by status:")?;
    for (class, count) in status_classes(index) {
        writeln!(out, "  {:15} {}", class, count)?;
    }

    let mut methods: Vec<(&str, u64)> = index.methods().collect();
    methods.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    writeln!(out)?;
    writeln!(out, "Entries by method:")?;
    for (method, count) in &methods {
        writeln!(out, "  {:15} {}", method, count)?;
    }

    let mut urls: Vec<(&str, u64)> = index.urls().filter(|(_, count)| *count > 1).collect();
    if !urls.is_empty() {
        urls.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        writeln!(out)?;
        writeln!(out, "Most requested URLs:")?;
        for (url, count) in urls.iter().take(10) {
            writeln!(out, "  {:>6}  {}", count, url)?;
        }
    }

    let mimes = mime_breakdown(index);
    writeln!(out)?;
    writeln!(out, "Entries by MIME type:")?;
    for (mime, count) in mimes.iter().take(15) {
        let label = if mime.is_empty() { "(none)" } else { mime.as_str() };
        writeln!(out, "  {:30} {}", label, count)?;
    }
    if mimes.len() > 15 {
        writeln!(out, "  ... and {} more", mimes.len() - 15)?;
    }
    Ok(())
}

/// One line per entry: index, status, method, URL, type, size, time
pub fn print_entry_row(
    out: &mut impl WriteColor,
    index: usize,
    meta: &EntryMetadata,
) -> io::Result<()> {
    write_index(out, index)?;
    write!(out, "  ")?;
    write_status(out, meta.status)?;
    write!(out, " {:7} {}", meta.method, meta.url)?;

    out.set_color(ColorSpec::new().set_dimmed(true))?;
    write!(
        out,
        "  {} {} {}",
        if meta.mime_type.is_empty() { "-" } else { &*meta.mime_type },
        format_size(meta.body_size),
        format_duration_ms(meta.duration_ms)
    )?;
    out.reset()?;
    writeln!(out)
}

fn print_headers(out: &mut impl WriteColor, headers: &[Header]) -> io::Result<()> {
    for header in headers {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        write!(out, "  {}", header.name)?;
        out.reset()?;
        writeln!(out, ": {}", header.value)?;
    }
    Ok(())
}

fn print_heading(out: &mut impl WriteColor, title: &str) -> io::Result<()> {
    writeln!(out)?;
    out.set_color(ColorSpec::new().set_bold(true))?;
    writeln!(out, "{}", title)?;
    out.reset()
}

/// Full request/response view of one entry; bodies are not printed here
pub fn print_entry_detail(
    out: &mut impl WriteColor,
    index: usize,
    entry: &Entry,
) -> io::Result<()> {
    write_index(out, index)?;
    writeln!(
        out,
        "  {}  {}",
        entry.started_date_time,
        format_duration_ms(entry.time)
    )?;

    print_heading(out, "Request")?;
    writeln!(
        out,
        "  {} {} {}",
        entry.request.method, entry.request.url, entry.request.http_version
    )?;
    print_headers(out, &entry.request.headers)?;
    if let Some(post) = &entry.request.post_data {
        writeln!(
            out,
            "  [body: {}, {} bytes]",
            post.mime_type,
            post.text.as_deref().map_or(0, str::len)
        )?;
    }

    print_heading(out, "Response")?;
    write!(out, "  ")?;
    write_status(out, entry.response.status)?;
    writeln!(
        out,
        " {} {}",
        entry.response.status_text, entry.response.http_version
    )?;
    print_headers(out, &entry.response.headers)?;
    let content = &entry.response.content;
    writeln!(
        out,
        "  [content: {}, {}{}]",
        if content.mime_type.is_empty() { "-" } else { content.mime_type.as_str() },
        format_size(content.size.max(0) as u64),
        content
            .encoding
            .as_deref()
            .map(|e| format!(", {}", e))
            .unwrap_or_default()
    )?;

    if let Some(ip) = &entry.server_ip_address {
        writeln!(out)?;
        writeln!(out, "Server: {}", ip)?;
    }
    Ok(())
}

/// Search results, one line each; unreadable entries are reported inline
pub fn print_search_results(
    out: &mut impl WriteColor,
    index: &Index,
    results: &[SearchResult],
) -> io::Result<()> {
    for result in results {
        let Some(meta) = index.entry(result.index) else {
            continue;
        };
        write_index(out, result.index)?;
        write!(out, "  ")?;
        write_status(out, meta.status)?;
        write!(out, " {:7} {}", meta.method, meta.url)?;

        match (&result.field, &result.error) {
            (Some(field), _) => {
                out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
                write!(out, "  [{}]", field)?;
            }
            (None, Some(err)) => {
                out.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
                write!(out, "  error: {}", err)?;
            }
            (None, None) => {}
        }
        out.reset()?;
        writeln!(out)?;
    }
    Ok(())
}

/// Counters gathered while the command ran
pub fn print_run_stats(out: &mut impl Write, stats: &StatsSnapshot) -> io::Result<()> {
    write!(
        out,
        "seeks: {}, read: {} in {} us, decoded: {}",
        stats.seeks,
        format_size(stats.bytes_read),
        stats.read_time_us,
        stats.entries_decoded
    )?;
    if let Some(ratio) = stats.cache_hit_ratio() {
        write!(out, ", cache hit rate: {:.1}%", ratio * 100.0)?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::catalog::tests::sample_index;
    use crate::search::MatchField;
    use termcolor::Buffer;

    fn rendered(buf: Buffer) -> String {
        String::from_utf8(buf.into_inner()).unwrap()
    }

    #[test]
    fn test_entry_row() {
        let index = sample_index(&[("GET", "/a", 200, Some(1_000))]);
        let mut buf = Buffer::no_color();
        print_entry_row(&mut buf, 0, &index.entries()[0]).unwrap();
        let line = rendered(buf);
        assert!(line.starts_with("     0  200 GET     /a"));
        assert!(line.contains("text/html"));
    }

    #[test]
    fn test_search_results_show_field_and_error() {
        let index = sample_index(&[("GET", "/a", 200, None), ("POST", "/b", 500, None)]);
        let results = vec![
            SearchResult::hit(0, MatchField::Url),
            SearchResult::failed(
                1,
                crate::error::HarError::Read {
                    index: Some(1),
                    offset: 160,
                    source: io::Error::other("gone"),
                },
            ),
        ];
        let mut buf = Buffer::no_color();
        print_search_results(&mut buf, &index, &results).unwrap();
        let text = rendered(buf);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[url]"));
        assert!(lines[1].contains("error: read failed at byte 160 (entry 1): gone"));
    }

    #[test]
    fn test_summary_mentions_counts() {
        let index = sample_index(&[
            ("GET", "/a", 200, Some(1_000)),
            ("GET", "/a", 404, Some(2_000)),
        ]);
        let mut buf = Buffer::no_color();
        print_summary(&mut buf, &index, None, &StatsSnapshot::default()).unwrap();
        let text = rendered(buf);
        assert!(text.contains("Entries:          2"));
        assert!(text.contains("Unique URLs:      1"));
        assert!(text.contains("(not persisted)"));
        assert!(text.contains("4xx"));
        assert!(text.contains("Entries by method:"));
        assert!(text.contains("  GET             2"));
        assert!(text.contains("Most requested URLs:"));
        assert!(text.contains("       2  /a"));
    }

    #[test]
    fn test_run_stats_line() {
        let stats = StatsSnapshot {
            seeks: 3,
            bytes_read: 2048,
            cache_hits: 1,
            cache_misses: 3,
            ..StatsSnapshot::default()
        };
        let mut out = Vec::new();
        print_run_stats(&mut out, &stats).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.starts_with("seeks: 3, read: 2.00 KB"));
        assert!(line.contains("cache hit rate: 25.0%"));
    }
}
