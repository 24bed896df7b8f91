//! Result cache
//!
//! Keeps expensive upstream work (model parsing and LLM inference) out of the
//! request path with two content-addressed namespaces:
//!
//! - **files**: parsed record plus analysis text, keyed by the raw upload bytes
//! - **analyses**: analysis text, keyed by the parsed record's signature
//!
//! Both share one TTL. Stale entries disappear on the read that observes them
//! and on every pass of the [`CacheSweeper`].
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! ttl_hours = 24
//! sweep_interval_seconds = 600
//! # max_entries = 10000
//! single_flight = false
//! ```

mod config;
mod entry;
mod flight;
mod keys;
mod lock;
mod store;
mod sweeper;

pub use config::CacheConfig;
pub use entry::ExpiringEntry;
pub use flight::{FlightGuard, InFlight};
pub use keys::{
    FINGERPRINT_LEN, Fingerprint, canonical_json, display_value, hash_bytes, hash_record,
    hash_serializable,
};
pub use store::{
    CacheStats, CachedFile, Namespace, NamespaceKind, RemovalCounts, ResultCache,
};
pub use sweeper::CacheSweeper;
