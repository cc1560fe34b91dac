//! Single-flight memoization keyed by hashable values.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{anyhow, Result};

/// A lazily populated map where each key is computed at most once.
///
/// Concurrent readers asking for the same key block on the first loader
/// instead of racing to compute the value twice. Loader failures are sticky:
/// the error message is memoized and replayed to later callers.
pub struct OnceMap<K, V> {
    slots: Mutex<HashMap<K, Arc<OnceLock<Result<V, String>>>>>,
}

impl<K, V> OnceMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(&self, key: K, loader: impl FnOnce() -> Result<V>) -> Result<V> {
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            slots.entry(key).or_insert_with(|| Arc::new(OnceLock::new())).clone()
        };
        let result = slot.get_or_init(|| loader().map_err(|err| format!("{err:#}")));
        match result {
            Ok(value) => Ok(value.clone()),
            Err(message) => Err(anyhow!("{message}")),
        }
    }
}

impl<K, V> Default for OnceMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for OnceMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnceMap").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use anyhow::anyhow;

    use super::OnceMap;

    #[test]
    fn load_computes_once() {
        let counter = AtomicU8::new(0);
        let map = OnceMap::new();
        assert_eq!(
            map.load(1usize, || Ok(counter.fetch_add(1, Ordering::Relaxed))).unwrap(),
            0
        );
        assert_eq!(map.load(1usize, || Ok(counter.fetch_add(1, Ordering::Relaxed))).unwrap(), 0);
        assert_eq!(map.load(2usize, || Ok(counter.fetch_add(1, Ordering::Relaxed))).unwrap(), 1);
    }

    #[test]
    fn load_err_is_sticky() {
        let counter = AtomicU8::new(0);
        let map: OnceMap<usize, ()> = OnceMap::new();
        let load = |key: usize| {
            map.load(key, || {
                Err(anyhow!("{key} {}", counter.fetch_add(1, Ordering::Relaxed)))
            })
        };
        assert_eq!(load(1).unwrap_err().to_string(), "1 0");
        assert_eq!(load(1).unwrap_err().to_string(), "1 0");
        assert_eq!(load(2).unwrap_err().to_string(), "2 1");
    }
}
