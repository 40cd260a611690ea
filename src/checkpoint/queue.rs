//! Working endpoint queue

use super::types::EndpointId;
use crate::error::{Error, Result};
use std::collections::VecDeque;

/// Ordered endpoints still to visit, current endpoint at the front.
///
/// Mutated only by shrinking from the front or inserting discovered
/// endpoints. Duplicates are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointQueue {
    items: VecDeque<EndpointId>,
}

impl EndpointQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of endpoints left
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Current endpoint
    pub fn front(&self) -> Option<&EndpointId> {
        self.items.front()
    }

    /// Check if an endpoint is queued
    pub fn contains(&self, endpoint: &EndpointId) -> bool {
        self.items.contains(endpoint)
    }

    /// Index of an endpoint
    pub fn position(&self, endpoint: &EndpointId) -> Option<usize> {
        self.items.iter().position(|e| e == endpoint)
    }

    /// Check if `endpoint` is the last queued element
    pub fn is_last(&self, endpoint: &EndpointId) -> bool {
        self.items.back() == Some(endpoint)
    }

    /// Iterate in order
    pub fn iter(&self) -> impl Iterator<Item = &EndpointId> {
        self.items.iter()
    }

    /// Remove the front endpoint
    pub fn pop_front(&mut self) -> Option<EndpointId> {
        self.items.pop_front()
    }

    /// Append at the end. Returns false if already queued.
    pub fn push_back(&mut self, endpoint: EndpointId) -> bool {
        if self.contains(&endpoint) {
            return false;
        }
        self.items.push_back(endpoint);
        true
    }

    /// Insert `item` directly after `anchor`.
    ///
    /// Returns false if `item` is already queued. Fails if `anchor` is not.
    pub fn insert_after(&mut self, anchor: &EndpointId, item: EndpointId) -> Result<bool> {
        if self.contains(&item) {
            return Ok(false);
        }
        let index = self.position(anchor).ok_or_else(|| {
            Error::contract(format!("cannot insert after {anchor}: not in the working queue"))
        })?;
        self.items.insert(index + 1, item);
        Ok(true)
    }

    /// Insert several items after `anchor`, keeping their relative order
    pub fn insert_all_after(
        &mut self,
        anchor: &EndpointId,
        items: impl IntoIterator<Item = EndpointId>,
    ) -> Result<usize> {
        let mut cursor = anchor.clone();
        let mut inserted = 0;
        for item in items {
            if self.insert_after(&cursor, item.clone())? {
                cursor = item;
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Queue narrowed to start at `endpoint`
    pub fn suffix_from(&self, endpoint: &EndpointId) -> Option<Self> {
        let index = self.position(endpoint)?;
        Some(Self {
            items: self.items.iter().skip(index).cloned().collect(),
        })
    }

    /// Endpoints strictly after `endpoint`
    pub fn after(&self, endpoint: &EndpointId) -> Option<Vec<EndpointId>> {
        let index = self.position(endpoint)?;
        Some(self.items.iter().skip(index + 1).cloned().collect())
    }

    /// Copy out as a vector
    pub fn to_vec(&self) -> Vec<EndpointId> {
        self.items.iter().cloned().collect()
    }
}

impl From<Vec<EndpointId>> for EndpointQueue {
    fn from(endpoints: Vec<EndpointId>) -> Self {
        let mut queue = Self::new();
        for endpoint in endpoints {
            queue.push_back(endpoint);
        }
        queue
    }
}

impl FromIterator<EndpointId> for EndpointQueue {
    fn from_iter<I: IntoIterator<Item = EndpointId>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}
