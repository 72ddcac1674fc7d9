// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-local store and bus implementations.

mod bus;
mod entries;
mod map;
mod set_map;

pub use bus::InMemoryBus;
pub use map::MemoryStore;
pub use set_map::{MemorySet, MemorySetStore};
