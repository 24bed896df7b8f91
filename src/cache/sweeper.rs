//! Background expiration sweep.
//!
//! Runs [`ResultCache::sweep_expired`] on a fixed cadence until stopped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::store::ResultCache;

const METRIC_CACHE_SWEEP_MS: &str = "bimvision_cache_sweep_ms";

/// Handle to the periodic sweep task. Dropping it aborts the task.
pub struct CacheSweeper {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    /// Spawn the sweep loop on the current runtime.
    ///
    /// The first sweep runs one full `interval` after spawning.
    pub fn spawn(cache: Arc<ResultCache>, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => run_sweep(&cache),
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(target = "bimvision::cache", "cache sweeper stopped");
        });

        info!(
            target = "bimvision::cache",
            interval_secs = period.as_secs_f64(),
            "cache sweeper started"
        );

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(target = "bimvision::cache", error = %err, "cache sweeper task failed");
                }
            }
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn run_sweep(cache: &ResultCache) {
    let started = Instant::now();
    let removed = cache.sweep_expired();
    histogram!(METRIC_CACHE_SWEEP_MS).record(started.elapsed().as_secs_f64() * 1000.0);

    if removed.total() > 0 {
        info!(
            target = "bimvision::cache",
            files = removed.files,
            analyses = removed.analyses,
            "cleaned up expired cache entries"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::config::CacheConfig;
    use super::super::keys::hash_bytes;
    use super::*;

    #[tokio::test]
    async fn sweeper_removes_stale_entries_and_stops() {
        let cache = Arc::new(ResultCache::new(CacheConfig::with_ttl(Duration::from_millis(
            20,
        ))));
        cache.put_analysis(hash_bytes(b"a"), "old");
        cache.put_analysis(hash_bytes(b"b"), "old");

        let sweeper = CacheSweeper::spawn(Arc::clone(&cache), Duration::from_millis(30));

        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.stats().analysis_count > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.stats().analysis_count, 0);

        sweeper.stop().await;
    }

    #[tokio::test]
    async fn stop_returns_before_the_first_tick() {
        let cache = Arc::new(ResultCache::new(CacheConfig::default()));
        let sweeper = CacheSweeper::spawn(cache, Duration::from_secs(3600));

        tokio::time::timeout(Duration::from_secs(1), sweeper.stop())
            .await
            .expect("sweeper should stop promptly");
    }
}
