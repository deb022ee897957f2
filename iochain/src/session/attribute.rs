//! Session attribute storage and the factory that creates per-session data
//! structures.

use super::IoSession;
use crate::error::Result;
use crate::write::{DefaultWriteRequestQueue, WriteRequestQueue};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A type-erased attribute value.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

/// Key/value store attached to a session.
pub trait AttributeMap: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Option<AttributeValue>;

    /// Stores `value` and returns the previous value.
    fn set(&self, key: &str, value: AttributeValue) -> Option<AttributeValue>;

    /// Stores `value` only if `key` is vacant; returns the existing value
    /// otherwise.
    fn set_if_absent(&self, key: &str, value: AttributeValue) -> Option<AttributeValue>;

    /// Removes and returns the value stored under `key`.
    fn remove(&self, key: &str) -> Option<AttributeValue>;

    /// Returns `true` if `key` is present.
    fn contains(&self, key: &str) -> bool;

    /// All keys currently present.
    fn keys(&self) -> Vec<String>;

    /// Releases resources once the session is closed.
    fn dispose(&self) {}
}

/// Concurrent attribute map backed by [`DashMap`].
#[derive(Default)]
pub struct DefaultAttributeMap {
    map: DashMap<String, AttributeValue>,
}

impl DefaultAttributeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeMap for DefaultAttributeMap {
    fn get(&self, key: &str) -> Option<AttributeValue> {
        self.map.get(key).map(|v| Arc::clone(v.value()))
    }

    fn set(&self, key: &str, value: AttributeValue) -> Option<AttributeValue> {
        self.map.insert(key.to_owned(), value)
    }

    fn set_if_absent(&self, key: &str, value: AttributeValue) -> Option<AttributeValue> {
        match self.map.entry(key.to_owned()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(value);
                None
            }
        }
    }

    fn remove(&self, key: &str) -> Option<AttributeValue> {
        self.map.remove(key).map(|(_, v)| v)
    }

    fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.map.iter().map(|e| e.key().clone()).collect()
    }
}

impl fmt::Debug for DefaultAttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultAttributeMap")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Creates the attribute map and write queue of each new session.
///
/// Both methods are called exactly once per session, after its addresses and
/// configuration are set and before any event is fired.
pub trait SessionDataStructureFactory: Send + Sync {
    /// Creates the attribute map of `session`.
    fn attribute_map(&self, session: &IoSession) -> Result<Box<dyn AttributeMap>>;

    /// Creates the write queue of `session`.
    fn write_request_queue(&self, session: &IoSession) -> Result<Box<dyn WriteRequestQueue>>;
}

/// Produces a [`DefaultAttributeMap`] and a [`DefaultWriteRequestQueue`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionDataStructureFactory;

impl SessionDataStructureFactory for DefaultSessionDataStructureFactory {
    fn attribute_map(&self, _session: &IoSession) -> Result<Box<dyn AttributeMap>> {
        Ok(Box::new(DefaultAttributeMap::new()))
    }

    fn write_request_queue(&self, _session: &IoSession) -> Result<Box<dyn WriteRequestQueue>> {
        Ok(Box::new(DefaultWriteRequestQueue::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_if_absent_keeps_first_value() {
        let map = DefaultAttributeMap::new();
        assert!(map.set_if_absent("k", Arc::new(1u32)).is_none());

        let existing = map.set_if_absent("k", Arc::new(2u32)).unwrap();
        assert_eq!(existing.downcast_ref::<u32>(), Some(&1));
        assert_eq!(map.get("k").unwrap().downcast_ref::<u32>(), Some(&1));
    }

    #[test]
    fn remove_and_keys() {
        let map = DefaultAttributeMap::new();
        map.set("a", Arc::new("x"));
        map.set("b", Arc::new("y"));

        let mut keys = map.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        assert!(map.remove("a").is_some());
        assert!(!map.contains("a"));
        assert!(map.remove("a").is_none());
    }
}
