//! Cache configuration.
//!
//! Controls the result cache via the `[cache]` section of `bimvision.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_TTL_HOURS: u64 = 24;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;
const SECONDS_PER_HOUR: u64 = 3600;

/// Runtime cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entry age, shared by both namespaces.
    pub ttl: Duration,
    /// Cadence of the background expiration sweep.
    pub sweep_interval: Duration,
    /// Optional per-namespace entry bound. `None` keeps purely time-based eviction.
    pub max_entries: Option<NonZeroUsize>,
    /// Make concurrent misses on one file wait for the first computation.
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_HOURS * SECONDS_PER_HOUR),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_entries: None,
            single_flight: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            ttl: settings.ttl,
            sweep_interval: settings.sweep_interval,
            max_entries: settings.max_entries,
            single_flight: settings.single_flight,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    /// TTL expressed in hours, as reported on the observability surface.
    pub fn ttl_hours(&self) -> f64 {
        self.ttl.as_secs_f64() / SECONDS_PER_HOUR as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_a_day_long_ttl() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(86_400));
        assert_eq!(config.ttl_hours(), 24.0);
        assert!(config.max_entries.is_none());
        assert!(!config.single_flight);
    }
}
