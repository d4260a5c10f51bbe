//! Per-category counters: deltas, running totals, and snapshots.
//!
//! A [`Delta`] holds the matches observed during one tick. The
//! [`CumulativeState`] is the running total across all ticks, and a
//! [`Snapshot`] is its ordered, name-labelled view for output.
//!
//! Categories without an entry read as zero in both maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::category::{Categories, CategoryId};

/// A `(category name, count)` pair as it appears in output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    /// Category name.
    pub category: String,
    /// Count for that category.
    pub count: u64,
}

impl CategoryCount {
    /// Create a pair.
    pub fn new(category: impl Into<String>, count: u64) -> Self {
        Self {
            category: category.into(),
            count,
        }
    }
}

/// Matches per category observed during a single tick.
///
/// Only categories with at least one match carry an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    counts: BTreeMap<CategoryId, u64>,
}

impl Delta {
    /// An empty delta.
    pub const fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// Count one match for `id`.
    pub fn record(&mut self, id: CategoryId) {
        self.add(id, 1);
    }

    /// Add `amount` matches for `id`. Zero amounts leave no entry.
    pub fn add(&mut self, id: CategoryId, amount: u64) {
        if amount == 0 {
            return;
        }
        let slot = self.counts.entry(id).or_insert(0);
        *slot = slot.saturating_add(amount);
    }

    /// Matches for `id`, zero when absent.
    pub fn get(&self, id: CategoryId) -> u64 {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    /// Whether no category matched.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum over all categories.
    pub fn total(&self) -> u64 {
        self.counts
            .values()
            .fold(0_u64, |acc, count| acc.saturating_add(*count))
    }

    /// Iterate `(id, count)` entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, u64)> + '_ {
        self.counts.iter().map(|(id, count)| (*id, *count))
    }

    /// Label the delta with category names, zero-filled, in enumeration order.
    pub fn describe(&self, categories: &Categories) -> Vec<CategoryCount> {
        categories
            .iter()
            .map(|(id, name)| CategoryCount::new(name, self.get(id)))
            .collect()
    }
}

impl FromIterator<(CategoryId, u64)> for Delta {
    fn from_iter<T: IntoIterator<Item = (CategoryId, u64)>>(iter: T) -> Self {
        let mut delta = Self::new();
        for (id, amount) in iter {
            delta.add(id, amount);
        }
        delta
    }
}

/// Running totals per category across every applied tick.
///
/// A category with no entry and one recorded at zero are the same state;
/// equality compares totals, not map entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CumulativeState {
    totals: BTreeMap<CategoryId, u64>,
}

impl CumulativeState {
    /// All categories at zero.
    pub const fn new() -> Self {
        Self {
            totals: BTreeMap::new(),
        }
    }

    /// Total for `id`, zero when nothing was recorded yet.
    pub fn get(&self, id: CategoryId) -> u64 {
        self.totals.get(&id).copied().unwrap_or(0)
    }

    /// Iterate recorded `(id, total)` entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, u64)> + '_ {
        self.totals.iter().map(|(id, total)| (*id, *total))
    }

    /// Return the state with `delta` added, leaving `self` untouched.
    ///
    /// # Errors
    ///
    /// Returns the id of the first category whose total would overflow.
    pub fn checked_add(&self, delta: &Delta) -> Result<Self, CategoryId> {
        let mut totals = self.totals.clone();
        for (id, amount) in delta.iter() {
            let slot = totals.entry(id).or_insert(0);
            *slot = slot.checked_add(amount).ok_or(id)?;
        }
        Ok(Self { totals })
    }

    /// Ordered, name-labelled view over every configured category.
    pub fn snapshot(&self, categories: &Categories) -> Snapshot {
        Snapshot {
            entries: categories
                .iter()
                .map(|(id, name)| CategoryCount::new(name, self.get(id)))
                .collect(),
        }
    }
}

impl PartialEq for CumulativeState {
    fn eq(&self, other: &Self) -> bool {
        self.totals
            .keys()
            .chain(other.totals.keys())
            .all(|id| self.get(*id) == other.get(*id))
    }
}

impl Eq for CumulativeState {}

impl FromIterator<(CategoryId, u64)> for CumulativeState {
    fn from_iter<T: IntoIterator<Item = (CategoryId, u64)>>(iter: T) -> Self {
        Self {
            totals: iter.into_iter().filter(|(_, total)| *total > 0).collect(),
        }
    }
}

/// Cumulative counts in category enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// One entry per configured category.
    pub entries: Vec<CategoryCount>,
}

impl Snapshot {
    /// Counts in enumeration order, without names.
    pub fn counts(&self) -> Vec<u64> {
        self.entries.iter().map(|entry| entry.count).collect()
    }
}
