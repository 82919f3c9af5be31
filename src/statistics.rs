use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy)]
pub enum StatEvent {
    Evaluated,
    Blocked,
    Allowed,
    CacheHit,
    CacheMiss,
    NotificationQueued,
    TaskDropped,
    ListMutation,
}

/// Lock-free counters updated on the decision path.
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    evaluations: AtomicU64,
    blocked: AtomicU64,
    allowed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    notifications_queued: AtomicU64,
    tasks_dropped: AtomicU64,
    list_mutations: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub evaluations: u64,
    pub blocked: u64,
    pub allowed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub notifications_queued: u64,
    pub tasks_dropped: u64,
    pub list_mutations: u64,
}

impl StatsSnapshot {
    /// Hits over hits + misses, or 0.0 before any cache lookup.
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self, event: StatEvent) {
        let counter = match event {
            StatEvent::Evaluated => &self.evaluations,
            StatEvent::Blocked => &self.blocked,
            StatEvent::Allowed => &self.allowed,
            StatEvent::CacheHit => &self.cache_hits,
            StatEvent::CacheMiss => &self.cache_misses,
            StatEvent::NotificationQueued => &self.notifications_queued,
            StatEvent::TaskDropped => &self.tasks_dropped,
            StatEvent::ListMutation => &self.list_mutations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            notifications_queued: self.notifications_queued.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
            list_mutations: self.list_mutations.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.evaluations,
            &self.blocked,
            &self.allowed,
            &self.cache_hits,
            &self.cache_misses,
            &self.notifications_queued,
            &self.tasks_dropped,
            &self.list_mutations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
