#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::time::{Duration, SystemTime};

use regex::Regex;

use aheadfs::{Engine, Event, FireReason};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Age a cached file so the cleaner sees it as idle.
fn age(fx: &common::Fixture, vpath: &str, by: Duration) {
    let old = SystemTime::now() - by;
    aheadfs::io::set_file_times(&fx.cache_file(vpath), old, old).unwrap();
}

async fn preload_album(fx: &common::Fixture, engine: &Engine) -> Vec<Event> {
    let mut events = engine.subscribe();
    engine.request_preload(FireReason::Time, "/a/01.flac");
    let got = common::collect_events(&mut events, 4, EVENT_TIMEOUT).await;
    assert_eq!(
        fx.cached_names("a"),
        ["01.flac", "02.flac", "03.flac"],
        "preload must populate the cache before the sweep"
    );
    got
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sweep_evicts_stale_files_but_keeps_exempt_ones() {
    let fx = common::album_fixture();
    let mut settings = fx.settings();
    settings.clean_after = Duration::from_secs(60);
    settings.clean_ignore = Some(Regex::new(r"01\.flac$").unwrap());
    let engine = Engine::new(settings);

    preload_album(&fx, &engine).await;
    for vpath in ["/a/01.flac", "/a/02.flac", "/a/03.flac"] {
        age(&fx, vpath, Duration::from_secs(3600));
    }

    let mut events = engine.subscribe();
    engine.request_clean();
    let got = common::collect_events(&mut events, 2, EVENT_TIMEOUT).await;

    let mut evicted: Vec<&str> = got.iter().filter_map(Event::path).collect();
    evicted.sort_unstable();
    assert!(
        got.iter().all(|e| e.name() == "uncache"),
        "only uncache events expected, got {got:?}"
    );
    assert_eq!(evicted, ["/a/02.flac", "/a/03.flac"]);

    common::assert_quiet(&mut events, Duration::from_millis(150)).await;
    assert_eq!(
        fx.cached_names("a"),
        ["01.flac"],
        "the exempt first track must survive the sweep"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fresh_files_survive_the_sweep() {
    let fx = common::album_fixture();
    let mut settings = fx.settings();
    settings.clean_after = Duration::from_secs(60);
    let engine = Engine::new(settings);

    preload_album(&fx, &engine).await;
    age(&fx, "/a/03.flac", Duration::from_secs(3600));

    let mut events = engine.subscribe();
    engine.request_clean();
    let got = common::collect_events(&mut events, 1, EVENT_TIMEOUT).await;

    common::assert_events(&got, &[("uncache", "/a/03.flac")]);
    assert_eq!(
        fx.cached_names("a"),
        ["01.flac", "02.flac"],
        "files accessed within the window must stay cached"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn evicting_a_whole_directory_prunes_it() {
    let fx = common::album_fixture();
    let mut settings = fx.settings();
    settings.clean_after = Duration::from_secs(60);
    let engine = Engine::new(settings);

    preload_album(&fx, &engine).await;
    for vpath in ["/a/01.flac", "/a/02.flac", "/a/03.flac"] {
        age(&fx, vpath, Duration::from_secs(3600));
    }

    let mut events = engine.subscribe();
    engine.request_clean();
    common::collect_events(&mut events, 3, EVENT_TIMEOUT).await;

    assert!(
        !fx.cache.join("a").exists(),
        "an emptied cache directory must be removed"
    );
    assert!(fx.cache.exists(), "the cache root itself must survive");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eviction_leaves_the_source_visible() {
    let fx = common::album_fixture();
    let mut settings = fx.settings();
    settings.clean_after = Duration::from_secs(60);
    let engine = Engine::new(settings);

    preload_album(&fx, &engine).await;
    // Warm the locator on the cached copy first.
    let before = engine.locate("/a/02.flac").await.unwrap();
    assert!(before.cached);

    age(&fx, "/a/02.flac", Duration::from_secs(3600));
    let mut events = engine.subscribe();
    engine.request_clean();
    common::collect_events(&mut events, 1, EVENT_TIMEOUT).await;

    let after = engine.locate("/a/02.flac").await.unwrap();
    assert!(!after.cached, "the eviction must be visible to locate");
    assert!(
        after.fullpath.starts_with(&fx.source),
        "an evicted path must resolve to the source, got {:?}",
        after.fullpath
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sweeping_an_empty_cache_is_a_quiet_no_op() {
    let fx = common::album_fixture();
    let engine = Engine::new(fx.settings());
    let mut events = engine.subscribe();

    engine.request_clean();
    common::assert_quiet(&mut events, Duration::from_millis(150)).await;
}
