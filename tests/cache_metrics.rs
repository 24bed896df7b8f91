use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bimvision::cache::{
    CacheConfig, CacheSweeper, CachedFile, ResultCache, hash_bytes, hash_record,
};
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // hit/miss/evict with a one-entry bound
    let bounded = ResultCache::new(CacheConfig {
        max_entries: NonZeroUsize::new(1),
        ..CacheConfig::default()
    });
    let first = hash_record(&json!({ "building": 1 }));
    let second = hash_record(&json!({ "building": 2 }));

    assert!(bounded.get_analysis(&first).is_none());
    bounded.put_analysis(first, "first");
    assert!(bounded.get_analysis(&first).is_some());
    bounded.put_analysis(second, "second");
    assert_eq!(bounded.stats().analysis_count, 1);

    // lazy expiry and explicit sweep
    let ttl = Duration::from_secs(60);
    let timed = ResultCache::new(CacheConfig::with_ttl(ttl));
    let t0 = Instant::now();
    let stale = t0 + ttl + Duration::from_millis(1);
    timed.analyses().put_at(first, Arc::from("a"), t0);
    timed.analyses().put_at(second, Arc::from("b"), t0);
    assert!(timed.analyses().get_at(&first, stale).is_none());
    assert_eq!(timed.sweep_expired_at(stale).analyses, 1);

    // sweep latency from the background task
    let shared = Arc::new(ResultCache::new(CacheConfig::default()));
    shared.put_file(
        hash_bytes(b"model"),
        CachedFile {
            record: Default::default(),
            analysis: "cached".into(),
        },
    );
    let sweeper = CacheSweeper::spawn(Arc::clone(&shared), Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(80)).await;
    sweeper.stop().await;
    assert_eq!(shared.stats().file_count, 1);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "bimvision_cache_hit_total",
        "bimvision_cache_miss_total",
        "bimvision_cache_evict_total",
        "bimvision_cache_expired_total",
        "bimvision_cache_swept_total",
        "bimvision_cache_entries",
        "bimvision_cache_sweep_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
