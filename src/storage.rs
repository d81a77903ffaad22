//! Durable key-value storage seam.
//!
//! The foreground and background collectors share no memory; these keys are
//! their only channel. Each key has a single writer, and every write replaces
//! the whole value, so readers always see a consistent snapshot without locks.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::Result;

/// Well-known storage keys.
pub mod keys {
    /// Background collector's accepted points (JSON array)
    pub const BACKGROUND_POINTS: &str = "run_tracker:background_points";
    /// Background collector's last accepted point (JSON object)
    pub const BACKGROUND_LAST_POINT: &str = "run_tracker:background_last_point";
    /// Background collector's running distance in km (decimal string)
    pub const BACKGROUND_DISTANCE: &str = "run_tracker:background_distance";
    /// Run the background buffer belongs to (written by the session)
    pub const BACKGROUND_RUN_ID: &str = "run_tracker:background_run_id";
    /// Resumable active-run snapshot (JSON object)
    pub const ACTIVE_RUN: &str = "run_tracker:active_run";

    /// Every key owned by the background collector.
    pub const BACKGROUND_KEYS: [&str; 4] = [
        BACKGROUND_POINTS,
        BACKGROUND_LAST_POINT,
        BACKGROUND_DISTANCE,
        BACKGROUND_RUN_ID,
    ];
}

/// String blob store. Every operation may fail; callers decide whether a
/// failure is fatal or only logged.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Write all pairs atomically: either every pair lands or none does.
    fn multi_set(&self, entries: &[(&str, String)]) -> Result<()>;

    fn multi_remove(&self, keys: &[&str]) -> Result<()>;
}

/// In-process store. Values live as long as the store does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn multi_set(&self, entries: &[(&str, String)]) -> Result<()> {
        let mut guard = self.lock();
        for (key, value) in entries {
            guard.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn multi_remove(&self, keys: &[&str]) -> Result<()> {
        let mut guard = self.lock();
        for key in keys {
            guard.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic_ops() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store
            .multi_set(&[("b", "2".to_string()), ("c", "3".to_string())])
            .unwrap();
        assert_eq!(store.len(), 3);

        store.multi_remove(&["a", "b", "missing"]).unwrap();
        assert_eq!(store.len(), 1);

        store.remove("c").unwrap();
        assert!(store.is_empty());
    }
}
