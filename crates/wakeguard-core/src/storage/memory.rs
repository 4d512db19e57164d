//! In-memory key-value store.
//!
//! Used by tests and by hosts that supply their own durability. Clones
//! share the same map, so a "relaunched" engine built from a clone sees
//! what the "killed" one wrote. Writes can be made to fail to exercise
//! degraded-durability paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::KvStore;
use crate::error::PersistenceError;

#[derive(Clone, Default)]
pub struct MemoryStore {
    map: Arc<Mutex<BTreeMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put`/`delete` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.map.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self, key: &str) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Write {
                key: key.to_string(),
                message: "writes disabled".into(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, PersistenceError> {
        self.map
            .lock()
            .map_err(|_| PersistenceError::Backend("memory store mutex poisoned".into()))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.check_writable(key)?;
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        self.check_writable(key)?;
        self.lock()?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, PersistenceError> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.put("k", "v").unwrap();
        assert_eq!(b.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn failing_writes_leave_old_value() {
        let store = MemoryStore::new();
        store.put("k", "old").unwrap();
        store.set_fail_writes(true);
        assert!(store.put("k", "new").is_err());
        assert!(store.delete("k").is_err());
        store.set_fail_writes(false);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn scan_prefix_orders_by_key() {
        let store = MemoryStore::new();
        store.put("queue:b", "2").unwrap();
        store.put("queue:a", "1").unwrap();
        store.put("quiet", "x").unwrap();
        let keys: Vec<_> = store
            .scan_prefix("queue:")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["queue:a", "queue:b"]);
    }
}
