use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const KEY_BLOCKED_NUMBERS: &str = "blocked_numbers";
pub const KEY_ALLOWED_NUMBERS: &str = "allowed_numbers";

/// Key-value store holding the block and allow lists.
pub trait ListPersistence: Send + Sync {
    /// A key that was never written loads as an empty set.
    fn load_string_set(&self, key: &str) -> Result<HashSet<String>>;

    fn save_string_set(&self, key: &str, values: &HashSet<String>) -> Result<()>;

    /// Write several sets as one unit. Stores that can commit atomically
    /// should override this; the default writes them one after another.
    fn save_string_sets(&self, sets: &[(&str, &HashSet<String>)]) -> Result<()> {
        for (key, values) in sets {
            self.save_string_set(key, values)?;
        }
        Ok(())
    }
}

/// In-process store, used by tests and hosts that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sets(blocked: &[&str], allowed: &[&str]) -> Self {
        let store = Self::new();
        if let Ok(mut sets) = store.sets.lock() {
            sets.insert(
                KEY_BLOCKED_NUMBERS.to_string(),
                blocked.iter().map(|s| s.to_string()).collect(),
            );
            sets.insert(
                KEY_ALLOWED_NUMBERS.to_string(),
                allowed.iter().map(|s| s.to_string()).collect(),
            );
        }
        store
    }
}

impl ListPersistence for MemoryStore {
    fn load_string_set(&self, key: &str) -> Result<HashSet<String>> {
        let sets = self
            .sets
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(sets.get(key).cloned().unwrap_or_default())
    }

    fn save_string_set(&self, key: &str, values: &HashSet<String>) -> Result<()> {
        self.save_string_sets(&[(key, values)])
    }

    fn save_string_sets(&self, entries: &[(&str, &HashSet<String>)]) -> Result<()> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        for (key, values) in entries {
            sets.insert(key.to_string(), (*values).clone());
        }
        Ok(())
    }
}

/// JSON document on disk mapping each key to a sorted list of strings.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash leaves either the old or the new document, never a mix.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

type Document = BTreeMap<String, BTreeSet<String>>;

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Document> {
        if !self.path.exists() {
            return Ok(Document::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read list store: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Document::new());
        }
        let doc = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse list store: {}", self.path.display()))?;
        Ok(doc)
    }

    fn write_document(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create list store directory: {}", parent.display())
                })?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let content = serde_json::to_string_pretty(doc)?;
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write list store: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to replace list store: {}", self.path.display())
        })?;
        Ok(())
    }
}

impl ListPersistence for FileStore {
    fn load_string_set(&self, key: &str) -> Result<HashSet<String>> {
        let doc = self.read_document()?;
        Ok(doc
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn save_string_set(&self, key: &str, values: &HashSet<String>) -> Result<()> {
        self.save_string_sets(&[(key, values)])
    }

    fn save_string_sets(&self, entries: &[(&str, &HashSet<String>)]) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))?;
        // An unreadable document is replaced by the sets being saved
        let mut doc = match self.read_document() {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("{e:#}, rewriting it");
                Document::new()
            }
        };
        for (key, values) in entries {
            doc.insert(key.to_string(), values.iter().cloned().collect());
        }
        self.write_document(&doc)
    }
}
