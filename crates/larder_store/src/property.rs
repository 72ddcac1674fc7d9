// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Property-level access to structured values.

use std::collections::HashMap;

use crate::Result;

/// A store whose values are made of named properties that can be read and
/// written individually.
///
/// Unlike [`ExpirableKeyStore`](crate::ExpirableKeyStore), this capability depends on
/// the value type, so strategies require it through trait bounds.
pub trait PropertyStore<K, V>: Send + Sync {
    /// The type of a single property value.
    type Property;

    /// Sets property `name` of the value under `key`, creating the value if needed.
    fn set_property(&self, key: &K, name: &str, value: Self::Property) -> impl Future<Output = Result<()>> + Send;

    /// Returns property `name` of the value under `key`, if both exist.
    fn get_property(&self, key: &K, name: &str) -> impl Future<Output = Result<Option<Self::Property>>> + Send;

    /// Merges the properties present in `value` into the value under `key`.
    fn merge(&self, key: &K, value: V) -> impl Future<Output = Result<()>> + Send;
}

/// A value that exposes named properties.
///
/// In-memory stores use this to implement [`PropertyStore`] for their values.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use larder_store::PropertyBag;
///
/// let mut bag: HashMap<String, i32> = HashMap::new();
/// bag.set_property("x", 1);
///
/// let mut partial = HashMap::new();
/// partial.insert("y".to_string(), 2);
/// bag.merge_from(partial);
///
/// assert_eq!(bag.property("x"), Some(1));
/// assert_eq!(bag.property("y"), Some(2));
/// ```
pub trait PropertyBag {
    /// The type of a single property value.
    type Property: Clone;

    /// Returns a copy of property `name`.
    fn property(&self, name: &str) -> Option<Self::Property>;

    /// Sets property `name`.
    fn set_property(&mut self, name: &str, value: Self::Property);

    /// Overwrites the properties present in `other`.
    fn merge_from(&mut self, other: Self);
}

impl<P: Clone> PropertyBag for HashMap<String, P> {
    type Property = P;

    fn property(&self, name: &str) -> Option<P> {
        self.get(name).cloned()
    }

    fn set_property(&mut self, name: &str, value: P) {
        self.insert(name.to_string(), value);
    }

    fn merge_from(&mut self, other: Self) {
        self.extend(other);
    }
}
