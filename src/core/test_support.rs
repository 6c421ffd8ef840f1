//! Shared fixtures for the scenario tests: a scripted fetcher and manifest builders

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::downloader::SegmentFetcher;
use crate::core::error_handling::FetchError;
use crate::core::models::{Manifest, WindowId};
use crate::parsers::m3u8_parser::{extract_filename, parse_playlist};

pub const PLAYLIST_URL: &str = "https://cdn.example.com/live/index.m3u8";

/// How the fetcher answers for one URL
#[derive(Debug, Clone)]
pub enum Script {
    Serve(Vec<u8>),
    /// 503 for the first `n` attempts, then the body
    FailThenServe(u32, Vec<u8>),
    Status(u16),
    Hang,
}

/// In-process fetcher; unscripted URLs answer with their own URL as the body
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    attempts: Mutex<HashMap<String, u32>>,
    order: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn script(&self, url: &str, script: Script) {
        self.scripts.lock().insert(url.to_string(), script);
    }

    pub fn attempts(&self, url: &str) -> u32 {
        self.attempts.lock().get(url).copied().unwrap_or(0)
    }

    /// URLs in the order their first attempt started
    pub fn first_attempt_order(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.order
            .lock()
            .iter()
            .filter(|url| seen.insert(url.to_string()))
            .cloned()
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.order.lock().push(url.to_string());
        let script = self.scripts.lock().get(url).cloned();

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match script {
            None => Ok(Bytes::from(url.as_bytes().to_vec())),
            Some(Script::Serve(body)) => Ok(Bytes::from(body)),
            Some(Script::FailThenServe(failures, body)) => {
                if attempt <= failures {
                    Err(FetchError::Status(503))
                } else {
                    Ok(Bytes::from(body))
                }
            }
            Some(Script::Status(code)) => Err(FetchError::Status(code)),
            Some(Script::Hang) => std::future::pending().await,
        }
    }
}

/// Playlist text with `count` relative segment lines
pub fn playlist_text(count: usize) -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n");
    for i in 0..count {
        text.push_str(&format!("#EXTINF:4.0,\nseg{}.ts\n", i));
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

pub fn segment_url(index: usize) -> String {
    format!("https://cdn.example.com/live/seg{}.ts", index)
}

pub fn manifest_with_segments(id: &str, count: usize, window_id: WindowId) -> Manifest {
    let raw_content = playlist_text(count);
    let parsed = parse_playlist(&raw_content, PLAYLIST_URL);
    Manifest {
        id: id.to_string(),
        source_url: PLAYLIST_URL.to_string(),
        file_name: extract_filename(PLAYLIST_URL),
        raw_content,
        segments: parsed.segments,
        title: None,
        resolution: parsed.resolution,
        duration: parsed.duration,
        captured_at: Utc::now(),
        window_id,
        tab_id: None,
    }
}

/// Entry names of a zip archive, in write order
pub fn archive_entries(archive: &[u8]) -> Vec<String> {
    let mut reader = zip::ZipArchive::new(std::io::Cursor::new(archive)).expect("valid zip");
    (0..reader.len())
        .map(|i| reader.by_index(i).expect("entry").name().to_string())
        .collect()
}

pub fn archive_entry(archive: &[u8], name: &str) -> Vec<u8> {
    use std::io::Read;

    let mut reader = zip::ZipArchive::new(std::io::Cursor::new(archive)).expect("valid zip");
    let mut entry = reader.by_name(name).expect("entry present");
    let mut data = Vec::new();
    entry.read_to_end(&mut data).expect("readable entry");
    data
}
