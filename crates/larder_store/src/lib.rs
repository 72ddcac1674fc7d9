// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Storage capability contracts for the `larder` caching layer.
//!
//! Caching strategies never talk to a concrete database. They orchestrate two or
//! more stores through the small set of contracts defined here, and detect what a
//! store can do through optional capabilities:
//!
//! | contract | purpose |
//! |---|---|
//! | [`KeyValueStore`] | add, get, remove, presence check |
//! | [`ExpirableKeyStore`] | key-level time-to-live (optional) |
//! | [`KeysEnumerable`] | enumerate every key (optional) |
//! | [`PropertyStore`] | read and write individual properties of a value (optional) |
//! | [`SetStore`] / [`StoreSet`] | collection-valued entries |
//! | [`MessageBus`] | publish/subscribe signaling between instances |
//!
//! The [`memory`] module provides process-local implementations of every contract,
//! and the `test-util` feature enables [`testing::MockStore`] for failure injection.
//!
//! # Implementing a Store
//!
//! ```
//! use std::collections::HashMap;
//!
//! use larder_store::{KeyValueStore, Result};
//! use parking_lot::Mutex;
//!
//! struct SimpleStore(Mutex<HashMap<String, u32>>);
//!
//! impl KeyValueStore<String, u32> for SimpleStore {
//!     async fn try_add(&self, key: &String, value: u32, overwrite: bool) -> Result<bool> {
//!         let mut map = self.0.lock();
//!         if !overwrite && map.contains_key(key) {
//!             return Ok(false);
//!         }
//!         map.insert(key.clone(), value);
//!         Ok(true)
//!     }
//!
//!     async fn get(&self, key: &String) -> Result<Option<u32>> {
//!         Ok(self.0.lock().get(key).copied())
//!     }
//!
//!     async fn try_remove(&self, key: &String) -> Result<bool> {
//!         Ok(self.0.lock().remove(key).is_some())
//!     }
//!
//!     async fn contains_key(&self, key: &String) -> Result<bool> {
//!         Ok(self.0.lock().contains_key(key))
//!     }
//! }
//! ```

mod bus;
pub mod error;
pub mod memory;
mod property;
mod set;
mod store;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use bus::{MessageBus, MessageHandler};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use memory::{InMemoryBus, MemorySet, MemorySetStore, MemoryStore};
#[doc(inline)]
pub use property::{PropertyBag, PropertyStore};
#[doc(inline)]
pub use set::{SetHandle, SetStore, StoreSet};
#[doc(inline)]
pub use store::{ExpirableKeyStore, KeyValueStore, KeysEnumerable};
