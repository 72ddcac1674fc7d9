// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for `MemoryStore`.

use std::{collections::HashMap, time::Duration};

use futures::{TryStreamExt, executor::block_on};
use larder_store::{KeyValueStore, MemoryStore, PropertyStore};
use tick::{Clock, ClockControl};

fn key(name: &str) -> String {
    name.to_string()
}

#[test]
fn add_get_remove() {
    block_on(async {
        let store = MemoryStore::<String, i32>::new(Clock::new_frozen());

        assert!(store.try_add(&key("a"), 1, false).await.unwrap());
        assert_eq!(store.get(&key("a")).await.unwrap(), Some(1));
        assert!(store.contains_key(&key("a")).await.unwrap());

        assert!(store.try_remove(&key("a")).await.unwrap());
        assert!(!store.try_remove(&key("a")).await.unwrap());
        assert_eq!(store.get(&key("a")).await.unwrap(), None);
    });
}

#[test]
fn overwrite_controls_replacement() {
    block_on(async {
        let store = MemoryStore::<String, i32>::new(Clock::new_frozen());

        store.try_add(&key("a"), 1, false).await.unwrap();
        assert!(!store.try_add(&key("a"), 2, false).await.unwrap());
        assert_eq!(store.get(&key("a")).await.unwrap(), Some(1));

        assert!(store.try_add(&key("a"), 3, true).await.unwrap());
        assert_eq!(store.get(&key("a")).await.unwrap(), Some(3));
    });
}

#[test]
fn relative_expiration_follows_the_clock() {
    block_on(async {
        let control = ClockControl::new();
        let store = MemoryStore::<String, i32>::new(control.to_clock());
        let expirable = store.as_expirable().unwrap();

        store.try_add(&key("a"), 1, false).await.unwrap();
        assert!(expirable.set_relative_expiration(&key("a"), Duration::from_millis(100)).await.unwrap());

        control.advance(Duration::from_millis(99));
        assert!(store.contains_key(&key("a")).await.unwrap());

        control.advance(Duration::from_millis(1));
        assert!(!store.contains_key(&key("a")).await.unwrap());
        assert!(store.is_empty());
    });
}

#[test]
fn absolute_and_removed_expiration() {
    block_on(async {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let store = MemoryStore::<String, i32>::new(clock.clone());
        let expirable = store.as_expirable().unwrap();

        store.try_add(&key("a"), 1, false).await.unwrap();
        let at = clock.system_time() + Duration::from_secs(10);
        assert!(expirable.set_absolute_expiration(&key("a"), at).await.unwrap());
        assert_eq!(store.expires_at(&key("a")), Some(at));

        assert!(expirable.remove_expiration(&key("a")).await.unwrap());
        control.advance(Duration::from_secs(60));
        assert_eq!(store.get(&key("a")).await.unwrap(), Some(1));
    });
}

#[test]
fn expiration_of_missing_key_reports_false() {
    block_on(async {
        let store = MemoryStore::<String, i32>::new(Clock::new_frozen());
        let expirable = store.as_expirable().unwrap();

        assert!(!expirable.set_relative_expiration(&key("nope"), Duration::from_secs(1)).await.unwrap());
        assert!(!expirable.remove_expiration(&key("nope")).await.unwrap());
    });
}

#[test]
fn overwrite_resets_expiration() {
    block_on(async {
        let store = MemoryStore::<String, i32>::new(Clock::new_frozen());

        store.try_add(&key("a"), 1, false).await.unwrap();
        store
            .as_expirable()
            .unwrap()
            .set_relative_expiration(&key("a"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(store.expires_at(&key("a")).is_some());

        store.try_add(&key("a"), 2, true).await.unwrap();
        assert_eq!(store.expires_at(&key("a")), None);
    });
}

#[test]
fn keys_skip_expired_entries() {
    block_on(async {
        let control = ClockControl::new();
        let store = MemoryStore::<String, i32>::new(control.to_clock());

        store.try_add(&key("a"), 1, false).await.unwrap();
        store.try_add(&key("b"), 2, false).await.unwrap();
        store
            .as_expirable()
            .unwrap()
            .set_relative_expiration(&key("b"), Duration::from_secs(1))
            .await
            .unwrap();
        control.advance(Duration::from_secs(2));

        let keys: Vec<String> = store.as_keys_enumerable().unwrap().keys().try_collect().await.unwrap();
        assert_eq!(keys, vec![key("a")]);
    });
}

#[test]
fn properties_are_set_read_and_merged() {
    block_on(async {
        let store = MemoryStore::<String, HashMap<String, i32>>::new(Clock::new_frozen());

        store.set_property(&key("a"), "x", 1).await.unwrap();
        assert_eq!(store.get_property(&key("a"), "x").await.unwrap(), Some(1));
        assert_eq!(store.get_property(&key("a"), "y").await.unwrap(), None);
        assert_eq!(store.get_property(&key("missing"), "x").await.unwrap(), None);

        let partial = HashMap::from([(key("x"), 10), (key("y"), 20)]);
        store.merge(&key("a"), partial).await.unwrap();

        let value = store.get(&key("a")).await.unwrap().unwrap();
        assert_eq!(value.get("x"), Some(&10));
        assert_eq!(value.get("y"), Some(&20));
    });
}

#[test]
fn clones_share_data() {
    block_on(async {
        let store = MemoryStore::<String, i32>::new(Clock::new_frozen());
        let clone = store.clone();

        store.try_add(&key("a"), 1, false).await.unwrap();
        assert_eq!(clone.get(&key("a")).await.unwrap(), Some(1));
        assert_eq!(clone.len(), 1);
    });
}
