#![forbid(unsafe_code)]

use crate::key::Key;
use dashmap::DashMap;
use std::sync::Arc;

/// Store-level settings. `nodes` only affects key homing; the in-memory
/// stand-in holds every key locally regardless.
#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    pub nodes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { nodes: 1 }
    }
}

/// In-memory stand-in for the distributed key-value store.
///
/// Values are opaque byte vectors; this layer knows nothing about
/// columns. Clones share the same underlying map, so a `Store` can be
/// handed around the way a cluster handle would be.
///
/// `compare_and_update` is the one primitive with atomicity guarantees:
/// the closure runs under the entry's lock, so a read-modify-write of a
/// single key can never lose a racing update.
#[derive(Clone, Debug, Default)]
pub struct Store {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    map: DashMap<Key, Vec<u8>>,
    config: StoreConfig,
}

impl Store {
    pub fn new(config: StoreConfig) -> Store {
        Store {
            inner: Arc::new(Inner {
                map: DashMap::new(),
                config,
            }),
        }
    }

    pub fn put(&self, key: Key, value: Vec<u8>) {
        self.inner.map.insert(key, value);
    }

    pub fn get(&self, key: &Key) -> Option<Vec<u8>> {
        self.inner.map.get(key).map(|v| v.clone())
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.inner.map.contains_key(key)
    }

    pub fn remove(&self, key: &Key) {
        self.inner.map.remove(key);
    }

    /// Atomic read-modify-write of one key.
    ///
    /// The closure sees the current value (or `None`) and returns the
    /// replacement; returning `None` removes the key. The returned value
    /// is the bytes now stored under the key, if any.
    pub fn compare_and_update<F>(&self, key: &Key, f: F) -> Option<Vec<u8>>
    where
        F: FnOnce(Option<&[u8]>) -> Option<Vec<u8>>,
    {
        use dashmap::mapref::entry::Entry;
        match self.inner.map.entry(key.clone()) {
            Entry::Occupied(mut entry) => match f(Some(entry.get().as_slice())) {
                Some(next) => {
                    entry.insert(next.clone());
                    Some(next)
                }
                None => {
                    entry.remove();
                    None
                }
            },
            Entry::Vacant(entry) => match f(None) {
                Some(next) => {
                    entry.insert(next.clone());
                    Some(next)
                }
                None => None,
            },
        }
    }

    pub fn home_node(&self, key: &Key) -> usize {
        key.home_node(self.inner.config.nodes)
    }

    pub fn nodes(&self) -> usize {
        self.inner.config.nodes
    }

    /// Number of live keys. Test and diagnostics aid.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(id: u32) -> Key {
        Key::group(b"store-tests").member(id)
    }

    #[test]
    fn put_get_remove() {
        let store = Store::new(StoreConfig::default());
        store.put(key(0), vec![1, 2, 3]);
        assert_eq!(store.get(&key(0)), Some(vec![1, 2, 3]));
        store.remove(&key(0));
        assert_eq!(store.get(&key(0)), None);
    }

    #[test]
    fn clones_share_state() {
        let store = Store::new(StoreConfig::default());
        let alias = store.clone();
        alias.put(key(1), vec![9]);
        assert_eq!(store.get(&key(1)), Some(vec![9]));
    }

    #[test]
    fn compare_and_update_counts_atomically() {
        let store = Store::new(StoreConfig { nodes: 4 });
        let counter = key(2);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.compare_and_update(&counter, |old| {
                            let n = old
                                .map(|b| u64::from_le_bytes(b.try_into().expect("counter bytes")))
                                .unwrap_or(0);
                            Some((n + 1).to_le_bytes().to_vec())
                        });
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().expect("counter thread");
        }
        let bytes = store.get(&counter).expect("counter present");
        let n = u64::from_le_bytes(bytes.as_slice().try_into().expect("counter bytes"));
        assert_eq!(n, 800);
    }

    #[test]
    fn compare_and_update_none_removes() {
        let store = Store::new(StoreConfig::default());
        store.put(key(3), vec![1]);
        let out = store.compare_and_update(&key(3), |_| None);
        assert_eq!(out, None);
        assert!(!store.contains(&key(3)));
    }
}
