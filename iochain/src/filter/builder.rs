use super::chain::{HEAD_NAME, TAIL_NAME};
use super::{Filter, FilterChain};
use crate::error::{Error, Result};
use std::fmt;
use std::sync::{Arc, RwLock};

/// The filter template a service copies onto every new session.
///
/// The builder is never activated itself: adding or removing filters here
/// runs no lifecycle hooks and does not touch sessions that already exist.
/// Hooks run when [`FilterChainBuilder::build_filter_chain`] adds each filter
/// to a session's live chain.
#[derive(Default)]
pub struct FilterChainBuilder {
    entries: RwLock<Vec<(String, Arc<dyn Filter>)>>,
}

impl FilterChainBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(entries: &[(String, Arc<dyn Filter>)], name: &str) -> Option<usize> {
        entries.iter().position(|(n, _)| n == name)
    }

    fn insert(
        &self,
        name: &str,
        filter: Arc<dyn Filter>,
        at: impl FnOnce(&[(String, Arc<dyn Filter>)]) -> Result<usize>,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::NullArgument("name"));
        }
        let mut entries = self.entries.write().unwrap();
        if name == HEAD_NAME || name == TAIL_NAME || Self::position(&entries, name).is_some() {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        let index = at(entries.as_slice())?;
        entries.insert(index, (name.to_owned(), filter));
        Ok(())
    }

    /// Adds `filter` at the head end.
    pub fn add_first(&self, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.insert(name, filter, |_| Ok(0))
    }

    /// Adds `filter` at the tail end.
    pub fn add_last(&self, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.insert(name, filter, |entries| Ok(entries.len()))
    }

    /// Adds `filter` just before `base_name`.
    pub fn add_before(&self, base_name: &str, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.insert(name, filter, |entries| {
            Self::position(entries, base_name).ok_or_else(|| Error::UnknownName(base_name.to_owned()))
        })
    }

    /// Adds `filter` just after `base_name`.
    pub fn add_after(&self, base_name: &str, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.insert(name, filter, |entries| {
            Self::position(entries, base_name)
                .map(|i| i + 1)
                .ok_or_else(|| Error::UnknownName(base_name.to_owned()))
        })
    }

    /// Removes the filter called `name` and returns it.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Filter>> {
        let mut entries = self.entries.write().unwrap();
        let index =
            Self::position(&entries, name).ok_or_else(|| Error::UnknownName(name.to_owned()))?;
        Ok(entries.remove(index).1)
    }

    /// Swaps the filter called `name` for `filter` and returns the old one.
    pub fn replace(&self, name: &str, filter: Arc<dyn Filter>) -> Result<Arc<dyn Filter>> {
        let mut entries = self.entries.write().unwrap();
        let index =
            Self::position(&entries, name).ok_or_else(|| Error::UnknownName(name.to_owned()))?;
        Ok(std::mem::replace(&mut entries[index].1, filter))
    }

    /// The filter called `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        let entries = self.entries.read().unwrap();
        Self::position(&entries, name).map(|i| Arc::clone(&entries[i].1))
    }

    /// Returns `true` if a filter called `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        Self::position(&self.entries.read().unwrap(), name).is_some()
    }

    /// Names of all filters from head to tail.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Returns `true` if no filters are configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every filter.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// Appends every configured filter to `chain`, in order.
    pub fn build_filter_chain(&self, chain: &FilterChain) -> Result<()> {
        let entries = self.entries.read().unwrap().clone();
        for (name, filter) in entries {
            chain.add_last(&name, filter)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FilterChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChainBuilder")
            .field("filters", &self.names())
            .finish()
    }
}
