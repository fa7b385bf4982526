use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use super::{CacheClient, CacheError, CacheOp};

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

/// In-memory cache for tests/dev.
///
/// A batch is applied under a single lock, so it is all-or-nothing and never
/// interleaves with another batch. Type mismatches (e.g. `SetAdd` on a hash
/// key) fail the whole batch, as a `MULTI/EXEC` would leave the key untouched.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Value>>,
    failing: AtomicBool,
    batches: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Drop every key, as a cache restart would.
    pub fn flush(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }

    /// Number of batches applied so far.
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("injected failure".to_string()));
        }
        Ok(())
    }

    fn apply(entries: &mut HashMap<String, Value>, op: CacheOp) -> Result<(), CacheError> {
        let wrong_type = |key: &str| CacheError::Command(format!("WRONGTYPE {key}"));
        match op {
            CacheOp::HashSet { key, fields } => {
                let entry = entries
                    .entry(key.clone())
                    .or_insert_with(|| Value::Hash(HashMap::new()));
                match entry {
                    Value::Hash(hash) => hash.extend(fields),
                    Value::Set(_) => return Err(wrong_type(&key)),
                }
            }
            CacheOp::HashSetField { key, field, value } => {
                let entry = entries
                    .entry(key.clone())
                    .or_insert_with(|| Value::Hash(HashMap::new()));
                match entry {
                    Value::Hash(hash) => {
                        hash.insert(field, value);
                    }
                    Value::Set(_) => return Err(wrong_type(&key)),
                }
            }
            CacheOp::Delete { key } => {
                entries.remove(&key);
            }
            CacheOp::SetAdd { key, members } => {
                let entry = entries
                    .entry(key.clone())
                    .or_insert_with(|| Value::Set(BTreeSet::new()));
                match entry {
                    Value::Set(set) => set.extend(members),
                    Value::Hash(_) => return Err(wrong_type(&key)),
                }
            }
            CacheOp::SetRemove { key, members } => {
                let now_empty = match entries.get_mut(&key) {
                    Some(Value::Set(set)) => {
                        for m in &members {
                            set.remove(m);
                        }
                        set.is_empty()
                    }
                    Some(Value::Hash(_)) => return Err(wrong_type(&key)),
                    None => false,
                };
                // Empty sets cease to exist.
                if now_empty {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheClient for InMemoryCache {
    async fn exec_batch(&self, ops: Vec<CacheOp>) -> Result<(), CacheError> {
        self.check()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Command("lock poisoned".to_string()))?;

        let mut staged = entries.clone();
        for op in ops {
            Self::apply(&mut staged, op)?;
        }
        *entries = staged;
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.check()?;
        let entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Command("lock poisoned".to_string()))?;
        match entries.get(key) {
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(Value::Set(_)) => Err(CacheError::Command(format!("WRONGTYPE {key}"))),
            None => Ok(HashMap::new()),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.check()?;
        let entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Command("lock poisoned".to_string()))?;
        match entries.get(key) {
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(Value::Hash(_)) => Err(CacheError::Command(format!("WRONGTYPE {key}"))),
            None => Ok(Vec::new()),
        }
    }
}
