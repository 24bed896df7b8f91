use std::time::{Duration, Instant};

/// A cached value stamped with the instant it was inserted.
///
/// Entries are never mutated after construction; a newer computation replaces
/// the whole entry.
#[derive(Debug, Clone)]
pub struct ExpiringEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> ExpiringEntry<V> {
    pub fn new(value: V) -> Self {
        Self::inserted_at(value, Instant::now())
    }

    pub fn inserted_at(value: V, inserted_at: Instant) -> Self {
        Self { value, inserted_at }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn insertion_instant(&self) -> Instant {
        self.inserted_at
    }

    /// Time elapsed since insertion; zero if `now` precedes the insertion.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    /// True while `now - inserted_at <= ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        self.age(now) <= ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_window_is_inclusive() {
        let t0 = Instant::now();
        let ttl = Duration::from_secs(60);
        let entry = ExpiringEntry::inserted_at("analysis", t0);

        assert!(entry.is_fresh(ttl, t0));
        assert!(entry.is_fresh(ttl, t0 + ttl));
        assert!(!entry.is_fresh(ttl, t0 + ttl + Duration::from_nanos(1)));
    }

    #[test]
    fn age_saturates_before_insertion() {
        let t0 = Instant::now() + Duration::from_secs(5);
        let entry = ExpiringEntry::inserted_at(1u8, t0);

        assert_eq!(entry.age(Instant::now()), Duration::ZERO);
        assert_eq!(entry.age(t0 + Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[test]
    fn zero_ttl_only_admits_the_insertion_instant() {
        let t0 = Instant::now();
        let entry = ExpiringEntry::inserted_at((), t0);

        assert!(entry.is_fresh(Duration::ZERO, t0));
        assert!(!entry.is_fresh(Duration::ZERO, t0 + Duration::from_millis(1)));
    }
}
