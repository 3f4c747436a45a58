//! Identifiers and the index of outstanding queries.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

//------------ QueryId -------------------------------------------------------

/// The identifier of an outstanding query.
///
/// Identifiers are unique among all queries currently outstanding in a
/// context. Once a query has been resolved or cancelled, its identifier
/// may be handed out again.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct QueryId(u32);

impl QueryId {
    pub fn from_int(id: u32) -> Self {
        QueryId(id)
    }

    pub fn into_int(self) -> u32 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ Queries -------------------------------------------------------

/// Mapping outstanding queries to their identifier.
///
/// New identifiers are found by probing upwards from the one handed out
/// last, wrapping around to one after the largest value. Zero is never
/// used.
///
/// This is generic over anything rather than our concrete query record
/// for easier testing.
#[derive(Clone, Debug)]
pub(crate) struct Queries<T> {
    /// The identifier handed out most recently.
    last: u32,

    /// The largest identifier to hand out.
    max: u32,

    /// The outstanding items.
    map: BTreeMap<u32, T>,
}

impl<T> Queries<T> {
    /// Creates a new empty index using the full identifier space.
    pub fn new() -> Self {
        Self::with_max(u32::MAX)
    }

    /// Creates a new empty index handing out identifiers up to `max`.
    pub fn with_max(max: u32) -> Self {
        Queries {
            last: 0,
            max: max.max(1),
            map: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts an item under a fresh identifier.
    ///
    /// Upon error, which means every identifier is in use, returns the
    /// item.
    pub fn insert(&mut self, item: T) -> Result<QueryId, T> {
        if self.map.len() as u64 >= u64::from(self.max) {
            return Err(item);
        }
        // There is a free identifier, so this terminates.
        let mut id = self.last;
        loop {
            id = if id >= self.max { 1 } else { id + 1 };
            if let btree_map::Entry::Vacant(entry) = self.map.entry(id) {
                entry.insert(item);
                break;
            }
        }
        self.last = id;
        Ok(QueryId(id))
    }

    pub fn get(&self, id: QueryId) -> Option<&T> {
        self.map.get(&id.0)
    }

    /// Removes and returns the item with the given identifier.
    pub fn remove(&mut self, id: QueryId) -> Option<T> {
        self.map.remove(&id.0)
    }

    /// Removes all items and returns them in identifier order.
    pub fn drain(&mut self) -> impl Iterator<Item = (QueryId, T)> {
        std::mem::take(&mut self.map)
            .into_iter()
            .map(|(id, item)| (QueryId(id), item))
    }
}

impl<T> Default for Queries<T> {
    fn default() -> Self {
        Self::new()
    }
}

//============ Tests =========================================================
