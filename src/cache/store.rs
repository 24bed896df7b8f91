//! Cache storage.
//!
//! `Namespace<V>` is a fingerprint-addressed map of [`ExpiringEntry`] values
//! behind one `RwLock`. `ResultCache` pairs two namespaces (parsed files and
//! LLM analyses) under a single TTL.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use serde::Serialize;
use tracing::debug;

use crate::domain::building::BuildingRecord;

use super::config::CacheConfig;
use super::entry::ExpiringEntry;
use super::keys::Fingerprint;
use super::lock::{rw_read, rw_write};

/// Identifies one of the cache's independent namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Parsed building record plus its analysis, keyed by raw file content.
    Files,
    /// Analysis text, keyed by the parsed record's signature.
    Analyses,
}

impl NamespaceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Analyses => "analyses",
        }
    }
}

// ============================================================================
// Namespace
// ============================================================================

/// A single fingerprint → entry map with lazy and active expiration.
pub struct Namespace<V> {
    kind: NamespaceKind,
    ttl: Duration,
    max_entries: Option<NonZeroUsize>,
    entries: RwLock<HashMap<Fingerprint, ExpiringEntry<V>>>,
}

impl<V: Clone> Namespace<V> {
    pub fn new(kind: NamespaceKind, ttl: Duration, max_entries: Option<NonZeroUsize>) -> Self {
        Self {
            kind,
            ttl,
            max_entries,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`.
    ///
    /// A stale entry is removed before returning `None`.
    pub fn get_at(&self, key: &Fingerprint, now: Instant) -> Option<V> {
        let label = self.kind.as_str();

        {
            let entries = rw_read(&self.entries, label, "get");
            match entries.get(key) {
                None => {
                    counter!("bimvision_cache_miss_total", "namespace" => label).increment(1);
                    return None;
                }
                Some(entry) if entry.is_fresh(self.ttl, now) => {
                    counter!("bimvision_cache_hit_total", "namespace" => label).increment(1);
                    debug!(
                        target = "bimvision::cache",
                        namespace = label,
                        key = %key.short(),
                        age_secs = entry.age(now).as_secs_f64(),
                        "cache hit"
                    );
                    return Some(entry.value().clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = rw_write(&self.entries, label, "get.expire");
        // A writer may have replaced the stale entry between the two locks.
        if let Some(entry) = entries.get(key) {
            if entry.is_fresh(self.ttl, now) {
                counter!("bimvision_cache_hit_total", "namespace" => label).increment(1);
                return Some(entry.value().clone());
            }
            let age = entry.age(now);
            entries.remove(key);
            gauge!("bimvision_cache_entries", "namespace" => label).set(entries.len() as f64);
            counter!("bimvision_cache_expired_total", "namespace" => label).increment(1);
            debug!(
                target = "bimvision::cache",
                namespace = label,
                key = %key.short(),
                age_hours = age.as_secs_f64() / 3600.0,
                "cache entry expired"
            );
        }
        counter!("bimvision_cache_miss_total", "namespace" => label).increment(1);
        None
    }

    pub fn put(&self, key: Fingerprint, value: V) {
        self.put_at(key, value, Instant::now());
    }

    /// Insert `value` stamped with `now`, replacing any entry under `key`.
    pub fn put_at(&self, key: Fingerprint, value: V, now: Instant) {
        let label = self.kind.as_str();
        let mut entries = rw_write(&self.entries, label, "put");

        if let Some(limit) = self.max_entries {
            if !entries.contains_key(&key) && entries.len() >= limit.get() {
                self.make_room(&mut entries, limit.get(), now);
            }
        }

        entries.insert(key, ExpiringEntry::inserted_at(value, now));
        gauge!("bimvision_cache_entries", "namespace" => label).set(entries.len() as f64);
        debug!(
            target = "bimvision::cache",
            namespace = label,
            key = %key.short(),
            "cache entry stored"
        );
    }

    fn make_room(
        &self,
        entries: &mut HashMap<Fingerprint, ExpiringEntry<V>>,
        limit: usize,
        now: Instant,
    ) {
        let label = self.kind.as_str();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(self.ttl, now));
        let swept = before - entries.len();
        if swept > 0 {
            counter!("bimvision_cache_swept_total", "namespace" => label).increment(swept as u64);
        }

        if entries.len() < limit {
            return;
        }

        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.insertion_instant())
            .map(|(key, _)| *key);
        if let Some(oldest) = oldest {
            entries.remove(&oldest);
            counter!("bimvision_cache_evict_total", "namespace" => label).increment(1);
            debug!(
                target = "bimvision::cache",
                namespace = label,
                key = %oldest.short(),
                limit,
                "evicted oldest entry to respect capacity"
            );
        }
    }

    /// Remove every entry that is stale at `now`, returning how many went.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let label = self.kind.as_str();

        let stale: Vec<Fingerprint> = rw_read(&self.entries, label, "sweep.scan")
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(self.ttl, now))
            .map(|(key, _)| *key)
            .collect();
        if stale.is_empty() {
            return 0;
        }

        let mut entries = rw_write(&self.entries, label, "sweep.remove");
        let mut removed = 0;
        for key in stale {
            let still_stale = entries
                .get(&key)
                .is_some_and(|entry| !entry.is_fresh(self.ttl, now));
            if still_stale {
                entries.remove(&key);
                removed += 1;
            }
        }

        gauge!("bimvision_cache_entries", "namespace" => label).set(entries.len() as f64);
        counter!("bimvision_cache_swept_total", "namespace" => label).increment(removed as u64);
        removed
    }

    /// Drop every entry, returning the number removed.
    pub fn clear(&self) -> usize {
        let label = self.kind.as_str();
        let mut entries = rw_write(&self.entries, label, "clear");
        let removed = entries.len();
        entries.clear();
        gauge!("bimvision_cache_entries", "namespace" => label).set(0.0);
        removed
    }

    /// Physical entry count, including stale entries not yet removed.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, self.kind.as_str(), "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is physically resident, regardless of freshness.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        rw_read(&self.entries, self.kind.as_str(), "contains").contains_key(key)
    }
}

// ============================================================================
// ResultCache
// ============================================================================

/// Value stored in the file namespace.
#[derive(Debug, Clone, Serialize)]
pub struct CachedFile {
    pub record: BuildingRecord,
    pub analysis: Arc<str>,
}

/// Per-namespace removal counts returned by bulk operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemovalCounts {
    pub files: usize,
    pub analyses: usize,
}

impl RemovalCounts {
    pub fn total(&self) -> usize {
        self.files + self.analyses
    }
}

/// Point-in-time cache snapshot. Counts may include stale entries not yet swept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub file_count: usize,
    pub analysis_count: usize,
    pub ttl: Duration,
}

impl CacheStats {
    pub fn ttl_hours(&self) -> f64 {
        self.ttl.as_secs_f64() / 3600.0
    }
}

/// Two-namespace, content-addressed, time-bounded result cache.
pub struct ResultCache {
    config: CacheConfig,
    files: Namespace<Arc<CachedFile>>,
    analyses: Namespace<Arc<str>>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        let files = Namespace::new(NamespaceKind::Files, config.ttl, config.max_entries);
        let analyses = Namespace::new(NamespaceKind::Analyses, config.ttl, config.max_entries);
        Self {
            config,
            files,
            analyses,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn files(&self) -> &Namespace<Arc<CachedFile>> {
        &self.files
    }

    pub fn analyses(&self) -> &Namespace<Arc<str>> {
        &self.analyses
    }

    pub fn get_file(&self, key: &Fingerprint) -> Option<Arc<CachedFile>> {
        self.files.get(key)
    }

    pub fn put_file(&self, key: Fingerprint, value: CachedFile) -> Arc<CachedFile> {
        let value = Arc::new(value);
        self.files.put(key, Arc::clone(&value));
        value
    }

    pub fn get_analysis(&self, key: &Fingerprint) -> Option<Arc<str>> {
        self.analyses.get(key)
    }

    pub fn put_analysis(&self, key: Fingerprint, analysis: impl Into<Arc<str>>) {
        self.analyses.put(key, analysis.into());
    }

    /// Empty both namespaces.
    pub fn invalidate_all(&self) -> RemovalCounts {
        let counts = RemovalCounts {
            files: self.files.clear(),
            analyses: self.analyses.clear(),
        };
        debug!(
            target = "bimvision::cache",
            files = counts.files,
            analyses = counts.analyses,
            "cache cleared"
        );
        counts
    }

    pub fn sweep_expired(&self) -> RemovalCounts {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> RemovalCounts {
        RemovalCounts {
            files: self.files.sweep_at(now),
            analyses: self.analyses.sweep_at(now),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            file_count: self.files.len(),
            analysis_count: self.analyses.len(),
            ttl: self.config.ttl,
        }
    }
}
