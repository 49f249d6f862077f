#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast::Receiver;

use aheadfs::{Event, Settings};

/// The canonical album: five 10-byte tracks plus a metadata file.
pub const TRACKS: [&str; 5] = ["01.flac", "02.flac", "03.flac", "04.flac", "05.flac"];

/// Ten bytes, so a 50 % read threshold sits at 5 bytes.
pub const TRACK_BYTES: &[u8] = b"0123456789";

/// A tempdir holding a `source` tree and an empty `cache` tree.
pub struct Fixture {
    pub tmp: TempDir,
    pub source: PathBuf,
    pub cache: PathBuf,
}

impl Fixture {
    /// Settings matched to the fixture: two read-ahead siblings, a 50 ms
    /// hold-open trigger, a 50 % read trigger.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::new(self.source.clone(), self.cache.clone());
        settings.preload_siblings = 2;
        settings.preload_open = Duration::from_millis(50);
        settings.preload_read_percent = 50;
        settings
    }

    pub fn source_file(&self, vpath: &str) -> PathBuf {
        self.source.join(vpath.trim_start_matches('/'))
    }

    pub fn cache_file(&self, vpath: &str) -> PathBuf {
        self.cache.join(vpath.trim_start_matches('/'))
    }

    /// Sorted basenames currently present under `cache/<dir>`. An absent
    /// directory reads as empty.
    pub fn cached_names(&self, dir: &str) -> Vec<String> {
        let path = self.cache.join(dir);
        let Ok(entries) = std::fs::read_dir(path) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Build the album fixture used by the end-to-end scenarios.
pub fn album_fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let cache = tmp.path().join("cache");
    std::fs::create_dir_all(source.join("a")).unwrap();
    std::fs::create_dir_all(&cache).unwrap();
    for name in TRACKS {
        std::fs::write(source.join("a").join(name), TRACK_BYTES).unwrap();
    }
    std::fs::write(source.join("a").join("meta.json"), TRACK_BYTES).unwrap();
    Fixture { tmp, source, cache }
}

/// Collect up to `expected` events, giving up at `timeout`.
pub async fn collect_events(
    rx: &mut Receiver<Event>,
    expected: usize,
    timeout: Duration,
) -> Vec<Event> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut events = Vec::new();
    while events.len() < expected {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) => events.push(event),
            Ok(Err(_)) | Err(_) => break,
        }
    }
    events
}

/// Panic if any event arrives within `window`.
pub async fn assert_quiet(rx: &mut Receiver<Event>, window: Duration) {
    match tokio::time::timeout(window, rx.recv()).await {
        Err(_) | Ok(Err(_)) => {}
        Ok(Ok(event)) => panic!("expected no further events, got {event:?}"),
    }
}

/// Compare observed events against `(name, path)` pairs.
pub fn assert_events(events: &[Event], expected: &[(&str, &str)]) {
    let brief: Vec<(&str, &str)> = events
        .iter()
        .map(|e| (e.name(), e.path().unwrap_or("")))
        .collect();
    assert_eq!(brief, expected, "full events: {events:?}");
}
