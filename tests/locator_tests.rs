#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use aheadfs::Locator;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn an_uncached_file_resolves_to_the_source() {
    let fx = common::album_fixture();
    let locator = Locator::new(&fx.settings());

    let info = locator.locate("/a/01.flac").await.unwrap();

    assert!(!info.cached);
    assert!(info.cacheable, "flac files pass the preload filter");
    assert_eq!(info.fullpath, fx.source_file("/a/01.flac"));
    assert_eq!(info.stats.size, common::TRACK_BYTES.len() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_cached_file_resolves_to_the_cache() {
    let fx = common::album_fixture();
    std::fs::create_dir_all(fx.cache.join("a")).unwrap();
    std::fs::write(fx.cache_file("/a/01.flac"), common::TRACK_BYTES).unwrap();
    let locator = Locator::new(&fx.settings());

    let info = locator.locate("/a/01.flac").await.unwrap();

    assert!(info.cached);
    assert_eq!(info.fullpath, fx.cache_file("/a/01.flac"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_missing_file_is_an_error_and_is_not_remembered() {
    let fx = common::album_fixture();
    let locator = Locator::new(&fx.settings());

    let err = locator.locate("/a/nope.flac").await.unwrap_err();
    assert_eq!(err.path, "/a/nope.flac");
    assert_eq!(
        locator.remembered(),
        0,
        "failed lookups must not occupy mru slots"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_matching_basenames_are_not_cacheable() {
    let fx = common::album_fixture();
    let locator = Locator::new(&fx.settings());

    let info = locator.locate("/a/meta.json").await.unwrap();
    assert!(!info.cacheable);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn the_mru_is_bounded() {
    let fx = common::album_fixture();
    for i in 0..12 {
        std::fs::write(
            fx.source.join("a").join(format!("x{i:02}.flac")),
            common::TRACK_BYTES,
        )
        .unwrap();
    }
    let mut settings = fx.settings();
    settings.mru_size = 10;
    let locator = Locator::new(&settings);

    for i in 0..12 {
        locator.locate(&format!("/a/x{i:02}.flac")).await.unwrap();
    }
    assert_eq!(locator.remembered(), 10, "the mru must stay at capacity");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_remembered_resolution_is_served_until_invalidated() {
    let fx = common::album_fixture();
    let locator = Locator::new(&fx.settings());

    let first = locator.locate("/a/01.flac").await.unwrap();
    assert!(!first.cached);

    // The copy lands behind the locator's back.
    std::fs::create_dir_all(fx.cache.join("a")).unwrap();
    std::fs::write(fx.cache_file("/a/01.flac"), common::TRACK_BYTES).unwrap();

    let remembered = locator.locate("/a/01.flac").await.unwrap();
    assert!(
        !remembered.cached,
        "the mru answers until someone invalidates the path"
    );

    locator.invalidate("/a/01.flac");
    let fresh = locator.locate("/a/01.flac").await.unwrap();
    assert!(fresh.cached, "after invalidation the cache copy is visible");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mark_uncached_repoints_a_remembered_entry_at_the_source() {
    let fx = common::album_fixture();
    std::fs::create_dir_all(fx.cache.join("a")).unwrap();
    std::fs::write(fx.cache_file("/a/01.flac"), common::TRACK_BYTES).unwrap();
    let locator = Locator::new(&fx.settings());

    let before = locator.locate("/a/01.flac").await.unwrap();
    assert!(before.cached);

    locator.mark_uncached("/a/01.flac");

    let after = locator.locate("/a/01.flac").await.unwrap();
    assert!(!after.cached);
    assert_eq!(after.fullpath, fx.source_file("/a/01.flac"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clearing_the_mru_forgets_everything() {
    let fx = common::album_fixture();
    let locator = Locator::new(&fx.settings());

    locator.locate("/a/01.flac").await.unwrap();
    locator.locate("/a/02.flac").await.unwrap();
    assert_eq!(locator.remembered(), 2);

    locator.clear();
    assert_eq!(locator.remembered(), 0);
}
