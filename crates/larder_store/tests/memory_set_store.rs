// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for `MemorySetStore`.

use std::time::Duration;

use futures::executor::block_on;
use larder_store::{KeyValueStore, MemorySet, MemorySetStore, SetStore, StoreSet};
use tick::{Clock, ClockControl};

#[test]
fn try_add_copies_items() {
    block_on(async {
        let store = MemorySetStore::<&str, i32>::new(Clock::new_frozen());
        let original: MemorySet<i32> = [1, 2].into_iter().collect();

        assert!(store.try_add(&"k", original.clone().into_handle(), false).await.unwrap());
        original.add(3).await.unwrap();

        let stored = store.get(&"k").await.unwrap().unwrap();
        assert_eq!(stored.len().await.unwrap(), 2);
        assert!(!stored.contains(&3).await.unwrap());
    });
}

#[test]
fn explicit_empty_sets_are_kept_when_supported() {
    block_on(async {
        let store = MemorySetStore::<&str, i32>::new(Clock::new_frozen());
        assert!(store.supports_empty_sets());

        store.try_add(&"k", MemorySet::new().into_handle(), false).await.unwrap();
        assert!(store.contains_key(&"k").await.unwrap());
        assert_eq!(store.get(&"k").await.unwrap().unwrap().len().await.unwrap(), 0);
    });
}

#[test]
fn get_or_empty_attaches_new_set() {
    block_on(async {
        let store = MemorySetStore::<&str, i32>::new(Clock::new_frozen());

        let handle = store.get_or_empty(&"k").await.unwrap();
        handle.add(1).await.unwrap();
        handle.add(2).await.unwrap();
        assert!(handle.try_remove(&1).await.unwrap());

        let items = store.get(&"k").await.unwrap().unwrap().items().await.unwrap();
        assert_eq!(items, vec![2]);
    });
}

#[test]
fn sets_expire() {
    block_on(async {
        let control = ClockControl::new();
        let store = MemorySetStore::<&str, i32>::new(control.to_clock());

        store.get_or_empty(&"k").await.unwrap().add(1).await.unwrap();
        store
            .as_expirable()
            .unwrap()
            .set_relative_expiration(&"k", Duration::from_secs(5))
            .await
            .unwrap();

        control.advance(Duration::from_secs(5));
        assert!(store.get(&"k").await.unwrap().is_none());
    });
}
