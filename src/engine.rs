//! Call-screening decision engine.
//!
//! Answers "block or allow" for an incoming call in a short, fixed pipeline:
//! anonymous check, scheme gate, cache, allow list, block list, heuristics.
//! Every path yields a [`Verdict`]; nothing fails toward the caller and
//! anything the engine cannot decide is allowed.

use crate::cache::{CacheKey, DecisionCache};
use crate::config::Config;
use crate::list_store::ListStore;
use crate::normalization::{normalize, normalize_opt, NormalizedNumber, VoipScheme};
use crate::notify::NotificationSink;
use crate::patterns::{NumberClassifier, PatternClassifier};
use crate::persistence::ListPersistence;
use crate::statistics::{StatEvent, StatisticsCollector, StatsSnapshot};
use crate::worker::{Task, TaskQueue, WorkerContext};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Anonymous,
    ScreeningDisabled,
    NonVoip,
    AllowList,
    BlockList,
    Suspicious,
    CachedBlock,
    CachedAllow,
    NoMatch,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Anonymous => "anonymous caller",
            Reason::ScreeningDisabled => "call screening disabled",
            Reason::NonVoip => "non-VoIP call",
            Reason::AllowList => "number on allow list",
            Reason::BlockList => "number on block list",
            Reason::Suspicious => "suspicious VoIP call",
            Reason::CachedBlock => "suspicious VoIP call (cached)",
            Reason::CachedAllow => "allowed (cached)",
            Reason::NoMatch => "no block rule matched",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub block: bool,
    pub reason: Reason,
}

impl Verdict {
    fn allow(reason: Reason) -> Self {
        Self {
            block: false,
            reason,
        }
    }

    fn block(reason: Reason) -> Self {
        Self {
            block: true,
            reason,
        }
    }

    pub fn reason_str(&self) -> &'static str {
        self.reason.as_str()
    }
}

pub struct DecisionEngine {
    lists: Arc<ListStore>,
    cache: Arc<DecisionCache>,
    classifier: Arc<dyn NumberClassifier>,
    queue: TaskQueue,
    stats: Arc<StatisticsCollector>,
    active: AtomicBool,
    block_anonymous: bool,
}

impl DecisionEngine {
    /// Build an engine with the built-in pattern classifier. Loads both lists
    /// from `persistence` and starts the background worker on the current
    /// tokio runtime. Outside a runtime use [`DecisionEngine::with_runtime`].
    pub fn new(
        config: &Config,
        persistence: Arc<dyn ListPersistence>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::with_classifier(
            config,
            persistence,
            sink,
            Arc::new(PatternClassifier::new()),
        )
    }

    pub fn with_classifier(
        config: &Config,
        persistence: Arc<dyn ListPersistence>,
        sink: Arc<dyn NotificationSink>,
        classifier: Arc<dyn NumberClassifier>,
    ) -> Self {
        Self::with_runtime(&Handle::current(), config, persistence, sink, classifier)
    }

    /// Build an engine whose background worker runs on `runtime`. Usable from
    /// code that is not itself running inside that runtime.
    pub fn with_runtime(
        runtime: &Handle,
        config: &Config,
        persistence: Arc<dyn ListPersistence>,
        sink: Arc<dyn NotificationSink>,
        classifier: Arc<dyn NumberClassifier>,
    ) -> Self {
        let lists = Arc::new(ListStore::load(persistence));
        let cache = Arc::new(DecisionCache::new(config.cache_capacity));
        let stats = Arc::new(StatisticsCollector::new());

        let queue = TaskQueue::spawn_on(
            runtime,
            config.queue_capacity,
            WorkerContext {
                lists: lists.clone(),
                cache: cache.clone(),
                sink,
                stats: stats.clone(),
            },
        );

        log::info!(
            "Decision engine ready (cache capacity {}, classifier {})",
            cache.capacity(),
            classifier.name()
        );

        Self {
            lists,
            cache,
            classifier,
            queue,
            stats,
            active: AtomicBool::new(config.enabled),
            block_anonymous: config.block_anonymous,
        }
    }

    /// Decide whether to block a call from `number` arriving over `scheme`.
    pub fn evaluate(&self, number: Option<&str>, scheme: Option<&str>) -> Verdict {
        self.stats.record_event(StatEvent::Evaluated);
        let verdict = self.decide(number.unwrap_or(""), normalize_opt(number), scheme);

        self.stats.record_event(if verdict.block {
            StatEvent::Blocked
        } else {
            StatEvent::Allowed
        });
        log::debug!(
            "{} via {}: {} ({})",
            number.unwrap_or("<none>"),
            scheme.unwrap_or("<none>"),
            if verdict.block { "BLOCK" } else { "ALLOW" },
            verdict.reason
        );
        verdict
    }

    fn decide(&self, raw: &str, number: NormalizedNumber, scheme: Option<&str>) -> Verdict {
        if !self.is_active() {
            return Verdict::allow(Reason::ScreeningDisabled);
        }

        let voip = VoipScheme::parse(scheme);

        if number.is_empty() {
            if self.block_anonymous && voip.is_some() {
                self.notify(raw, Reason::Anonymous);
                return Verdict::block(Reason::Anonymous);
            }
            return Verdict::allow(Reason::Anonymous);
        }

        let Some(voip) = voip else {
            return Verdict::allow(Reason::NonVoip);
        };

        let key = CacheKey::new(voip, number);
        if let Some(block) = self.cache.get(&key) {
            self.stats.record_event(StatEvent::CacheHit);
            if block {
                self.notify(raw, Reason::CachedBlock);
                return Verdict::block(Reason::CachedBlock);
            }
            return Verdict::allow(Reason::CachedAllow);
        }
        self.stats.record_event(StatEvent::CacheMiss);

        let lists = self.lists.snapshot();
        let verdict = if lists.is_allowed(&key.number) {
            Verdict::allow(Reason::AllowList)
        } else if lists.is_blocked(&key.number) {
            Verdict::block(Reason::BlockList)
        } else if self.classifier.matches_suspicious(raw) {
            Verdict::block(Reason::Suspicious)
        } else {
            Verdict::allow(Reason::NoMatch)
        };

        let seen_version = lists.version();
        let cached = self
            .cache
            .put_if(key, verdict.block, || self.lists.version() == seen_version);
        if !cached {
            log::debug!("Lists changed during evaluation, verdict not cached");
        }

        if verdict.block {
            self.notify(raw, verdict.reason);
        }
        verdict
    }

    fn notify(&self, number: &str, reason: Reason) {
        let queued = self.queue.submit(Task::Notify {
            number: number.to_string(),
            reason: reason.as_str().to_string(),
        });
        if queued {
            self.stats.record_event(StatEvent::NotificationQueued);
        }
    }

    /// Queue `raw` for the block list. Returns immediately; the change is
    /// applied, persisted and reflected in decisions by the background worker.
    pub fn add_blocked_number(&self, raw: &str) {
        if normalize(raw).is_empty() {
            return;
        }
        self.queue.submit(Task::AddBlocked(raw.to_string()));
    }

    /// Queue `raw` for the allow list.
    pub fn add_allowed_number(&self, raw: &str) {
        if normalize(raw).is_empty() {
            return;
        }
        self.queue.submit(Task::AddAllowed(raw.to_string()));
    }

    /// Wait for every queued mutation and notification to finish.
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        log::info!("Decision cache cleared");
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
        log::info!(
            "Call screening {}",
            if active { "enabled" } else { "disabled" }
        );
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn blocked_numbers(&self) -> Vec<NormalizedNumber> {
        self.lists.blocked_numbers()
    }

    pub fn allowed_numbers(&self) -> Vec<NormalizedNumber> {
        self.lists.allowed_numbers()
    }

    pub fn cached_decisions(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Zero every counter and return the values they held.
    pub fn reset_stats(&self) -> StatsSnapshot {
        let snapshot = self.stats.snapshot();
        self.stats.reset();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, KEY_BLOCKED_NUMBERS};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingClassifier {
        inner: PatternClassifier,
        calls: AtomicUsize,
    }

    impl CountingClassifier {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl NumberClassifier for CountingClassifier {
        fn matches_suspicious(&self, number: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.matches_suspicious(number)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        fn reasons(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|(_, reason)| reason.clone())
                .collect()
        }
    }

    impl NotificationSink for RecordingSink {
        fn notify_blocked(&self, number: &str, reason: &str) {
            self.seen
                .lock()
                .unwrap()
                .push((number.to_string(), reason.to_string()));
        }
    }

    struct Harness {
        engine: DecisionEngine,
        classifier: Arc<CountingClassifier>,
        sink: Arc<RecordingSink>,
        store: Arc<MemoryStore>,
    }

    fn harness_with(config: Config, store: MemoryStore) -> Harness {
        let classifier = Arc::new(CountingClassifier::default());
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(store);
        let engine = DecisionEngine::with_classifier(
            &config,
            store.clone(),
            sink.clone(),
            classifier.clone(),
        );
        Harness {
            engine,
            classifier,
            sink,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(Config::default(), MemoryStore::new())
    }

    #[tokio::test]
    async fn test_pattern_classification() {
        let h = harness();
        let e = &h.engine;

        assert_eq!(
            e.evaluate(Some("+00000012"), Some("sip")),
            Verdict::block(Reason::Suspicious)
        );
        assert_eq!(
            e.evaluate(Some("+11111199"), Some("sip")),
            Verdict::block(Reason::Suspicious)
        );
        assert_eq!(
            e.evaluate(Some("5555555"), Some("voip")),
            Verdict::block(Reason::Suspicious)
        );
        assert_eq!(
            e.evaluate(Some("+14155551234"), Some("sip")),
            Verdict::allow(Reason::NoMatch)
        );

        e.flush().await;
        assert_eq!(h.sink.reasons(), vec!["suspicious VoIP call"; 3]);
    }

    #[tokio::test]
    async fn test_block_list_then_allow_list() {
        let h = harness();
        let e = &h.engine;

        e.add_blocked_number("+15555550001");
        e.flush().await;
        let verdict = e.evaluate(Some("+15555550001"), Some("sip"));
        assert!(verdict.block);
        assert_eq!(verdict.reason_str(), "number on block list");

        e.add_allowed_number("+15555550001");
        e.flush().await;
        let verdict = e.evaluate(Some("+15555550001"), Some("sip"));
        assert!(!verdict.block);
        assert_eq!(verdict.reason, Reason::AllowList);
        assert!(!e.blocked_numbers().contains(&normalize("+15555550001")));

        e.flush().await;
        assert_eq!(h.sink.reasons(), vec!["number on block list"]);
        assert!(h
            .store
            .load_string_set(KEY_BLOCKED_NUMBERS)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_allow_list_beats_patterns_and_block_list() {
        let store = MemoryStore::with_sets(&[], &["+00000012"]);
        let h = harness_with(Config::default(), store);

        assert_eq!(
            h.engine.evaluate(Some("+00000012"), Some("sip")),
            Verdict::allow(Reason::AllowList)
        );
        assert_eq!(h.classifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_skips_reclassification() {
        let h = harness();
        let e = &h.engine;

        let first = e.evaluate(Some("+14155551234"), Some("sip"));
        let second = e.evaluate(Some("+14155551234"), Some("sip"));
        assert!(!first.block);
        assert!(!second.block);
        assert_eq!(second.reason, Reason::CachedAllow);
        assert_eq!(h.classifier.calls(), 1);

        // Different scheme is a different cache identity
        e.evaluate(Some("+14155551234"), Some("voip"));
        assert_eq!(h.classifier.calls(), 2);

        // Formatting differences share the normalized identity
        e.evaluate(Some("+1 (415) 555-1234"), Some("SIP"));
        assert_eq!(h.classifier.calls(), 2);

        let stats = e.stats();
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 2);
    }

    #[tokio::test]
    async fn test_cached_block_still_notifies() {
        let h = harness();
        let e = &h.engine;

        e.evaluate(Some("5555555"), Some("sip"));
        let again = e.evaluate(Some("5555555"), Some("sip"));
        assert_eq!(again, Verdict::block(Reason::CachedBlock));
        assert_eq!(h.classifier.calls(), 1);

        e.flush().await;
        assert_eq!(
            h.sink.reasons(),
            vec!["suspicious VoIP call", "suspicious VoIP call (cached)"]
        );
    }

    #[tokio::test]
    async fn test_allow_invalidates_cached_block() {
        let h = harness();
        let e = &h.engine;

        assert!(e.evaluate(Some("+00000012"), Some("sip")).block);
        assert!(e.evaluate(Some("+00000012"), Some("voip")).block);
        assert_eq!(e.cached_decisions(), 2);

        e.add_allowed_number("+0000 0012");
        e.flush().await;
        assert_eq!(e.cached_decisions(), 0);

        assert_eq!(
            e.evaluate(Some("+00000012"), Some("sip")),
            Verdict::allow(Reason::AllowList)
        );
        assert_eq!(
            e.evaluate(Some("+00000012"), Some("voip")),
            Verdict::allow(Reason::AllowList)
        );
    }

    #[tokio::test]
    async fn test_non_voip_bypasses_everything() {
        let store = MemoryStore::with_sets(&["+10000000000"], &[]);
        let h = harness_with(Config::default(), store);
        let e = &h.engine;

        assert_eq!(
            e.evaluate(Some("+10000000000"), Some("tel")),
            Verdict::allow(Reason::NonVoip)
        );
        assert_eq!(
            e.evaluate(Some("5555555"), None),
            Verdict::allow(Reason::NonVoip)
        );
        assert_eq!(h.classifier.calls(), 0);
        assert_eq!(e.cached_decisions(), 0);

        // Same number over SIP hits the block list
        assert_eq!(
            e.evaluate(Some("+10000000000"), Some("sip")),
            Verdict::block(Reason::BlockList)
        );
    }

    #[tokio::test]
    async fn test_anonymous_caller() {
        let h = harness();
        let e = &h.engine;

        let verdict = e.evaluate(None, Some("sip"));
        assert_eq!(verdict, Verdict::allow(Reason::Anonymous));
        assert_eq!(verdict.reason_str(), "anonymous caller");
        assert_eq!(e.evaluate(Some(""), Some("voip")).reason, Reason::Anonymous);
        assert_eq!(e.evaluate(Some("unknown"), Some("sip")).reason, Reason::Anonymous);
        assert_eq!(e.evaluate(None, None).reason, Reason::Anonymous);
        assert_eq!(e.cached_decisions(), 0);
        assert_eq!(h.classifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_block_anonymous_policy() {
        let config = Config {
            block_anonymous: true,
            ..Config::default()
        };
        let h = harness_with(config, MemoryStore::new());
        let e = &h.engine;

        assert_eq!(e.evaluate(None, Some("sip")), Verdict::block(Reason::Anonymous));
        assert_eq!(e.evaluate(None, Some("tel")), Verdict::allow(Reason::Anonymous));
        assert_eq!(e.cached_decisions(), 0);

        e.flush().await;
        assert_eq!(h.sink.reasons(), vec!["anonymous caller"]);
    }

    #[tokio::test]
    async fn test_empty_mutations_ignored() {
        let h = harness();
        h.engine.add_blocked_number("");
        h.engine.add_allowed_number("   ");
        h.engine.flush().await;
        assert!(h.engine.blocked_numbers().is_empty());
        assert!(h.engine.allowed_numbers().is_empty());
        assert_eq!(h.engine.stats().list_mutations, 0);
    }

    #[tokio::test]
    async fn test_screening_switch() {
        let h = harness();
        let e = &h.engine;

        e.set_active(false);
        assert_eq!(
            e.evaluate(Some("+00000012"), Some("sip")),
            Verdict::allow(Reason::ScreeningDisabled)
        );
        assert_eq!(e.cached_decisions(), 0);

        e.set_active(true);
        assert!(e.evaluate(Some("+00000012"), Some("sip")).block);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_reevaluation() {
        let h = harness();
        let e = &h.engine;

        e.evaluate(Some("+14155551234"), Some("sip"));
        e.clear_cache();
        assert_eq!(e.cached_decisions(), 0);
        e.evaluate(Some("+14155551234"), Some("sip"));
        assert_eq!(h.classifier.calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_capacity_from_config() {
        let config = Config {
            cache_capacity: 2,
            ..Config::default()
        };
        let h = harness_with(config, MemoryStore::new());
        for n in ["+14155550001", "+14155550002", "+14155550003"] {
            h.engine.evaluate(Some(n), Some("sip"));
        }
        assert_eq!(h.engine.cached_decisions(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_evaluation_and_mutation() {
        // Far more notifications than the queue holds
        let config = Config {
            queue_capacity: 4,
            ..Config::default()
        };
        let h = harness_with(config, MemoryStore::new());
        let engine = Arc::new(h.engine);
        let numbers: Vec<String> = (0..20).map(|i| format!("+1415555{:04}", i)).collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                let numbers = numbers.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        for n in &numbers {
                            engine.evaluate(Some(n), Some("sip"));
                        }
                    }
                })
            })
            .collect();

        for (i, n) in numbers.iter().enumerate() {
            if i % 2 == 0 {
                engine.add_blocked_number(n);
            } else {
                engine.add_allowed_number(n);
            }
        }
        for n in numbers.iter().take(5) {
            engine.add_allowed_number(n);
        }

        for reader in readers {
            reader.join().unwrap();
        }
        engine.flush().await;

        let blocked = engine.blocked_numbers();
        let allowed = engine.allowed_numbers();
        assert!(blocked.iter().all(|n| !allowed.contains(n)));

        // No stale cached verdicts survive the mutations
        for (i, n) in numbers.iter().enumerate() {
            let expect_block = i % 2 == 0 && i >= 5;
            assert_eq!(engine.evaluate(Some(n), Some("sip")).block, expect_block, "{n}");
        }
    }

    #[tokio::test]
    async fn test_full_notification_queue_keeps_list_changes() {
        let config = Config {
            queue_capacity: 4,
            ..Config::default()
        };
        let h = harness_with(config, MemoryStore::new());
        let e = &h.engine;

        // Current-thread runtime: five blocks queue five notifications, one too many
        for i in 1..=5 {
            let verdict = e.evaluate(Some(&format!("+0000000{i}")), Some("sip"));
            assert_eq!(verdict, Verdict::block(Reason::Suspicious));
        }
        e.add_allowed_number("+15555550001");
        e.add_blocked_number("+15555550002");
        e.flush().await;

        assert_eq!(e.allowed_numbers(), vec![normalize("+15555550001")]);
        assert_eq!(e.blocked_numbers(), vec![normalize("+15555550002")]);
        assert_eq!(
            e.evaluate(Some("+15555550001"), Some("sip")),
            Verdict::allow(Reason::AllowList)
        );

        let stats = e.stats();
        assert_eq!(stats.tasks_dropped, 1);
        assert_eq!(stats.list_mutations, 2);
        assert_eq!(h.sink.reasons().len(), 4);
    }

    #[test]
    fn test_engine_built_outside_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let sink = Arc::new(RecordingSink::default());

        let engine = DecisionEngine::with_runtime(
            runtime.handle(),
            &Config::default(),
            Arc::new(MemoryStore::new()),
            sink.clone(),
            Arc::new(PatternClassifier::new()),
        );
        engine.add_blocked_number("+15555550001");
        runtime.block_on(engine.flush());

        assert_eq!(
            engine.evaluate(Some("+15555550001"), Some("sip")),
            Verdict::block(Reason::BlockList)
        );
        runtime.block_on(engine.flush());
        assert_eq!(sink.reasons(), vec!["number on block list".to_string()]);
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let h = harness();
        let e = &h.engine;
        e.evaluate(Some("+14155551234"), Some("sip"));
        e.evaluate(Some("+14155551234"), Some("sip"));

        let before = e.reset_stats();
        assert_eq!(before.evaluations, 2);
        assert_eq!(before.cache_hits, 1);
        assert_eq!(e.stats(), StatsSnapshot::default());
    }

    #[test]
    fn test_verdict_serializes_reason_text() {
        let json = serde_json::to_string(&Verdict::block(Reason::BlockList)).unwrap();
        assert_eq!(json, r#"{"block":true,"reason":"number on block list"}"#);
    }
}
