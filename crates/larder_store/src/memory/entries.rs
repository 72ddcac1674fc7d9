// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared slot table behind the in-memory stores.

use std::{collections::HashMap, hash::Hash, time::SystemTime};

use parking_lot::Mutex;

#[derive(Debug)]
struct Slot<V> {
    value: V,
    expires_at: Option<SystemTime>,
}

impl<V> Slot<V> {
    fn new(value: V) -> Self {
        Self { value, expires_at: None }
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A map of slots with lazily evaluated expiration.
///
/// Expired slots are purged the first time they are touched. Slots that are alive
/// but fail the `visible` predicate are kept (live handles may still point at
/// them) but are reported as absent.
#[derive(Debug)]
pub(crate) struct Entries<K, V> {
    map: Mutex<HashMap<K, Slot<V>>>,
    visible: fn(&V) -> bool,
}

pub(crate) fn always_visible<V>(_: &V) -> bool {
    true
}

impl<K, V> Entries<K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn new(visible: fn(&V) -> bool) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            visible,
        }
    }

    fn live<'m>(map: &'m mut HashMap<K, Slot<V>>, key: &K, now: SystemTime) -> Option<&'m mut Slot<V>> {
        if map.get(key).is_some_and(|slot| slot.is_expired(now)) {
            map.remove(key);
        }
        map.get_mut(key)
    }

    /// Runs `f` against the visible value under `key`.
    pub(crate) fn with_value<R>(&self, key: &K, now: SystemTime, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut map = self.map.lock();
        let visible = self.visible;
        Self::live(&mut map, key, now)
            .filter(|slot| visible(&slot.value))
            .map(|slot| f(&mut slot.value))
    }

    /// Runs `f` against the live value under `key`, visible or not.
    pub(crate) fn with_live_value<R>(&self, key: &K, now: SystemTime, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut map = self.map.lock();
        Self::live(&mut map, key, now).map(|slot| f(&mut slot.value))
    }

    pub(crate) fn contains(&self, key: &K, now: SystemTime) -> bool {
        self.with_value(key, now, |_| ()).is_some()
    }

    /// Stores `value` unless the key is visible and `overwrite` is off.
    ///
    /// A successful write replaces any previous expiration.
    pub(crate) fn insert(&self, key: K, value: V, now: SystemTime, overwrite: bool) -> bool {
        let mut map = self.map.lock();
        let visible = self.visible;
        if !overwrite && Self::live(&mut map, &key, now).is_some_and(|slot| visible(&slot.value)) {
            return false;
        }
        map.insert(key, Slot::new(value));
        true
    }

    /// Applies `update` to the live value under `key`, inserting `create()` first if absent.
    pub(crate) fn upsert(&self, key: &K, now: SystemTime, create: impl FnOnce() -> V, update: impl FnOnce(&mut V))
    where
        K: Clone,
    {
        let mut map = self.map.lock();
        if Self::live(&mut map, key, now).is_none() {
            map.insert(key.clone(), Slot::new(create()));
        }
        if let Some(slot) = map.get_mut(key) {
            update(&mut slot.value);
        }
    }

    /// Removes `key`, returning whether a visible value was removed.
    pub(crate) fn remove(&self, key: &K, now: SystemTime) -> bool {
        let mut map = self.map.lock();
        let visible = self.visible;
        let existed = Self::live(&mut map, key, now).is_some_and(|slot| visible(&slot.value));
        map.remove(key);
        existed
    }

    /// Changes the expiration of a visible key, returning whether it existed.
    pub(crate) fn set_expiration(&self, key: &K, now: SystemTime, expires_at: Option<SystemTime>) -> bool {
        let mut map = self.map.lock();
        let visible = self.visible;
        match Self::live(&mut map, key, now) {
            Some(slot) if visible(&slot.value) => {
                slot.expires_at = expires_at;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn expires_at(&self, key: &K, now: SystemTime) -> Option<SystemTime> {
        let mut map = self.map.lock();
        Self::live(&mut map, key, now).and_then(|slot| slot.expires_at)
    }

    pub(crate) fn keys(&self, now: SystemTime) -> Vec<K>
    where
        K: Clone,
    {
        let mut map = self.map.lock();
        map.retain(|_, slot| !slot.is_expired(now));
        map.iter()
            .filter(|(_, slot)| (self.visible)(&slot.value))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn len(&self, now: SystemTime) -> usize {
        let mut map = self.map.lock();
        map.retain(|_, slot| !slot.is_expired(now));
        map.values().filter(|slot| (self.visible)(&slot.value)).count()
    }
}
