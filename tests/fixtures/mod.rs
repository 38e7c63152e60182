//! HAR fixtures shared by the integration tests.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::io::Write;
use tempfile::NamedTempFile;

/// A minimal but complete HAR entry
pub fn entry(method: &str, url: &str, status: u16) -> Value {
    let status_text = if status == 200 { "OK" } else { "" };
    json!({
        "pageref": "page_1",
        "startedDateTime": "2024-03-01T10:00:00.000Z",
        "time": 12.5,
        "request": {
            "method": method,
            "url": url,
            "httpVersion": "HTTP/1.1",
            "cookies": [],
            "headers": [{"name": "Accept", "value": "*/*"}],
            "queryString": [],
            "headersSize": 40,
            "bodySize": 0
        },
        "response": {
            "status": status,
            "statusText": status_text,
            "httpVersion": "HTTP/1.1",
            "cookies": [],
            "headers": [{"name": "Content-Type", "value": "text/plain"}],
            "content": {"size": 5, "mimeType": "text/plain", "text": "hello"},
            "redirectURL": "",
            "headersSize": 60,
            "bodySize": 5
        },
        "cache": {},
        "timings": {"send": 1, "wait": 10, "receive": 1.5}
    })
}

pub fn with_body(mut entry: Value, text: &str) -> Value {
    entry["response"]["content"]["text"] = json!(text);
    entry["response"]["content"]["size"] = json!(text.len());
    entry
}

pub fn with_post(mut entry: Value, text: &str) -> Value {
    entry["request"]["postData"] = json!({"mimeType": "application/json", "text": text});
    entry
}

pub fn with_started(mut entry: Value, started: &str) -> Value {
    entry["startedDateTime"] = json!(started);
    entry
}

/// Wrap entries in a HAR document
pub fn document(entries: Vec<Value>) -> Value {
    json!({
        "log": {
            "version": "1.2",
            "creator": {"name": "harx-tests", "version": "1.0"},
            "pages": [{
                "startedDateTime": "2024-03-01T10:00:00.000Z",
                "id": "page_1",
                "title": "fixture",
                "pageTimings": {"onContentLoad": 100, "onLoad": 200}
            }],
            "entries": entries
        }
    })
}

pub fn write_har(doc: &Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    serde_json::to_writer_pretty(&mut file, doc).unwrap();
    file.flush().unwrap();
    file
}

/// The three-entry capture: /a 200, /login?key=secret 401, /c 200
pub fn three_entries() -> NamedTempFile {
    write_har(&document(vec![
        entry("GET", "https://example.com/a", 200),
        entry("POST", "https://example.com/login?key=secret", 401),
        entry("GET", "https://example.com/c", 200),
    ]))
}

/// `count` GET entries on distinct URLs, every tenth one a 500
pub fn many_entries(count: usize) -> NamedTempFile {
    let entries = (0..count)
        .map(|i| {
            let status = if i % 10 == 9 { 500 } else { 200 };
            with_body(
                entry("GET", &format!("https://example.com/item/{}", i), status),
                &format!("body of item {}", i),
            )
        })
        .collect();
    write_har(&document(entries))
}
