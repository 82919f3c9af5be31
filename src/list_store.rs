//! Block and allow lists.
//!
//! Readers work from an immutable [`ListSnapshot`] behind an `Arc`; each
//! mutation builds a complete replacement pair and swaps it in, so a reader
//! never sees one list updated without the other. A number is never in both
//! lists of the same snapshot.

use crate::normalization::{normalize, NormalizedNumber};
use crate::persistence::{ListPersistence, KEY_ALLOWED_NUMBERS, KEY_BLOCKED_NUMBERS};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Default)]
pub struct ListSnapshot {
    blocked: HashSet<NormalizedNumber>,
    allowed: HashSet<NormalizedNumber>,
    version: u64,
}

impl ListSnapshot {
    pub fn is_blocked(&self, number: &NormalizedNumber) -> bool {
        self.blocked.contains(number)
    }

    pub fn is_allowed(&self, number: &NormalizedNumber) -> bool {
        self.allowed.contains(number)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn blocked_len(&self) -> usize {
        self.blocked.len()
    }

    pub fn allowed_len(&self) -> usize {
        self.allowed.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Blocked,
    Allowed,
}

impl ListKind {
    fn label(self) -> &'static str {
        match self {
            ListKind::Blocked => "block",
            ListKind::Allowed => "allow",
        }
    }
}

pub struct ListStore {
    persistence: Arc<dyn ListPersistence>,
    current: RwLock<Arc<ListSnapshot>>,
    write_lock: Mutex<()>,
}

impl ListStore {
    /// Read both lists from `persistence`. Any failure leaves both lists
    /// empty; it is logged, never returned.
    pub fn load(persistence: Arc<dyn ListPersistence>) -> Self {
        let snapshot = match Self::read_lists(persistence.as_ref()) {
            Ok(snapshot) => {
                log::info!(
                    "Loaded {} blocked and {} allowed numbers",
                    snapshot.blocked.len(),
                    snapshot.allowed.len()
                );
                snapshot
            }
            Err(e) => {
                log::error!("Failed to load block/allow lists, starting empty: {e:#}");
                ListSnapshot::default()
            }
        };

        Self {
            persistence,
            current: RwLock::new(Arc::new(snapshot)),
            write_lock: Mutex::new(()),
        }
    }

    fn read_lists(persistence: &dyn ListPersistence) -> anyhow::Result<ListSnapshot> {
        let blocked_raw = persistence.load_string_set(KEY_BLOCKED_NUMBERS)?;
        let allowed_raw = persistence.load_string_set(KEY_ALLOWED_NUMBERS)?;

        let allowed: HashSet<NormalizedNumber> = allowed_raw
            .iter()
            .map(|raw| normalize(raw))
            .filter(|n| !n.is_empty())
            .collect();

        let mut blocked = HashSet::new();
        for raw in &blocked_raw {
            let number = normalize(raw);
            if number.is_empty() {
                continue;
            }
            if allowed.contains(&number) {
                log::warn!("{number} is on both lists in storage, keeping it on the allow list");
                continue;
            }
            blocked.insert(number);
        }

        Ok(ListSnapshot {
            blocked,
            allowed,
            version: 0,
        })
    }

    /// Current lists. The returned snapshot never changes.
    pub fn snapshot(&self) -> Arc<ListSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    pub fn is_blocked(&self, number: &NormalizedNumber) -> bool {
        self.snapshot().is_blocked(number)
    }

    pub fn is_allowed(&self, number: &NormalizedNumber) -> bool {
        self.snapshot().is_allowed(number)
    }

    /// Put `raw` on the block list, taking it off the allow list.
    ///
    /// Returns the normalized number whose cached decisions are now stale, or
    /// `None` when `raw` normalizes to nothing.
    pub fn add_blocked(&self, raw: &str) -> Option<NormalizedNumber> {
        self.apply(ListKind::Blocked, raw)
    }

    /// Put `raw` on the allow list, taking it off the block list.
    pub fn add_allowed(&self, raw: &str) -> Option<NormalizedNumber> {
        self.apply(ListKind::Allowed, raw)
    }

    fn apply(&self, kind: ListKind, raw: &str) -> Option<NormalizedNumber> {
        let number = normalize(raw);
        if number.is_empty() {
            return None;
        }

        let _writer = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let base = self.snapshot();
        let mut blocked = base.blocked.clone();
        let mut allowed = base.allowed.clone();
        match kind {
            ListKind::Blocked => {
                allowed.remove(&number);
                blocked.insert(number.clone());
            }
            ListKind::Allowed => {
                blocked.remove(&number);
                allowed.insert(number.clone());
            }
        }

        let blocked_raw: HashSet<String> = blocked.iter().map(|n| n.to_string()).collect();
        let allowed_raw: HashSet<String> = allowed.iter().map(|n| n.to_string()).collect();
        if let Err(e) = self.persistence.save_string_sets(&[
            (KEY_BLOCKED_NUMBERS, &blocked_raw),
            (KEY_ALLOWED_NUMBERS, &allowed_raw),
        ]) {
            log::error!("Failed to persist {} list change for {number}: {e:#}", kind.label());
        }

        let next = Arc::new(ListSnapshot {
            blocked,
            allowed,
            version: base.version + 1,
        });
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;

        log::info!("Added {number} to {} list", kind.label());
        Some(number)
    }

    pub fn blocked_numbers(&self) -> Vec<NormalizedNumber> {
        let mut numbers: Vec<_> = self.snapshot().blocked.iter().cloned().collect();
        numbers.sort();
        numbers
    }

    pub fn allowed_numbers(&self) -> Vec<NormalizedNumber> {
        let mut numbers: Vec<_> = self.snapshot().allowed.iter().cloned().collect();
        numbers.sort();
        numbers
    }
}
