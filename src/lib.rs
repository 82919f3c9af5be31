pub mod cache;
pub mod config;
pub mod engine;
pub mod list_store;
pub mod normalization;
pub mod notify;
pub mod patterns;
pub mod persistence;
pub mod statistics;
pub mod worker;

pub use config::Config;
pub use engine::{DecisionEngine, Reason, Verdict};
pub use normalization::{normalize, NormalizedNumber, VoipScheme};
pub use notify::{LogNotifier, NotificationSink};
pub use patterns::{NumberClassifier, PatternClassifier};
pub use persistence::{FileStore, ListPersistence, MemoryStore};
pub use statistics::StatsSnapshot;
