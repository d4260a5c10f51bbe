//! The state store: owner of the cumulative per-category totals.
//!
//! The store is mutated once per tick through [`StateStore::apply`], which
//! takes the tick index alongside the delta. Ticks must arrive in strictly
//! increasing, gap-free order; anything else is rejected and leaves the
//! state untouched. Applying is all-or-nothing, so the totals never reflect
//! part of a delta.
//!
//! The store also converts itself to and from a checkpoint document. A
//! restored store resumes at `last_applied_tick + 1`.

use chrono::Utc;
use tally_types::{Categories, CategoryId, CumulativeState, Delta, Snapshot};

use crate::checkpoint::{CHECKPOINT_FORMAT_VERSION, CheckpointDocument, CheckpointError};

/// Errors raised when applying a delta.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The tick is not the one the store expects next.
    #[error("tick {actual} applied out of order (expected {expected})")]
    OutOfOrder {
        /// Tick the store was waiting for.
        expected: u64,
        /// Tick that was supplied.
        actual: u64,
    },

    /// The delta names a category outside the configured table.
    #[error("delta references unknown category {id}")]
    UnknownCategory {
        /// The offending id.
        id: CategoryId,
    },

    /// A total would exceed `u64::MAX`.
    #[error("total for category {category} would overflow")]
    CountOverflow {
        /// Name of the overflowing category.
        category: String,
    },

    /// The tick index itself cannot advance further.
    #[error("tick index overflow: cannot advance beyond u64::MAX")]
    TickOverflow,
}

/// Cumulative totals plus the index of the last tick folded into them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStore {
    categories: Categories,
    state: CumulativeState,
    last_applied_tick: Option<u64>,
}

impl StateStore {
    /// A fresh store with every category at zero and no tick applied.
    pub const fn new(categories: Categories) -> Self {
        Self {
            categories,
            state: CumulativeState::new(),
            last_applied_tick: None,
        }
    }

    /// The configured categories.
    pub const fn categories(&self) -> &Categories {
        &self.categories
    }

    /// Current cumulative totals.
    pub const fn state(&self) -> &CumulativeState {
        &self.state
    }

    /// Index of the last applied tick, `None` before the first.
    pub const fn last_applied_tick(&self) -> Option<u64> {
        self.last_applied_tick
    }

    /// Index the next call to [`apply`](Self::apply) must use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TickOverflow`] once `u64::MAX` has been applied.
    pub fn next_tick(&self) -> Result<u64, StoreError> {
        match self.last_applied_tick {
            None => Ok(0),
            Some(last) => last.checked_add(1).ok_or(StoreError::TickOverflow),
        }
    }

    /// Fold `delta` into the totals as tick `tick`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OutOfOrder`] if `tick` is not
    /// [`next_tick`](Self::next_tick), [`StoreError::UnknownCategory`] if the
    /// delta names a category outside the table, or
    /// [`StoreError::CountOverflow`] if a total would overflow. The state is
    /// unchanged on error.
    pub fn apply(&mut self, tick: u64, delta: &Delta) -> Result<&CumulativeState, StoreError> {
        let expected = self.next_tick()?;
        if tick != expected {
            return Err(StoreError::OutOfOrder {
                expected,
                actual: tick,
            });
        }
        if let Some((id, _)) = delta.iter().find(|(id, _)| !self.categories.contains(*id)) {
            return Err(StoreError::UnknownCategory { id });
        }

        let next = self
            .state
            .checked_add(delta)
            .map_err(|id| StoreError::CountOverflow {
                category: self.categories.name(id).unwrap_or_default().to_owned(),
            })?;

        self.state = next;
        self.last_applied_tick = Some(tick);
        Ok(&self.state)
    }

    /// Current totals as an ordered snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot(&self.categories)
    }

    /// Build the checkpoint document for the current state.
    pub fn to_document(&self) -> CheckpointDocument {
        CheckpointDocument {
            format_version: CHECKPOINT_FORMAT_VERSION,
            last_applied_tick: self.last_applied_tick,
            totals: self.snapshot().entries,
            written_at: Utc::now(),
        }
    }

    /// Serialize the current state for durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Encode`] if serialization fails.
    pub fn checkpoint(&self) -> Result<Vec<u8>, CheckpointError> {
        self.to_document().encode()
    }

    /// Rebuild a store from checkpoint bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] if the bytes cannot be decoded,
    /// or [`CheckpointError::Incompatible`] if they were written for a
    /// different category set.
    pub fn restore(categories: Categories, bytes: &[u8]) -> Result<Self, CheckpointError> {
        let document = CheckpointDocument::decode(bytes)?;
        Self::from_document(categories, &document)
    }

    /// Rebuild a store from a decoded document.
    ///
    /// Totals are matched to categories by name, so a reordered
    /// configuration still restores correctly.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] if a category appears twice, or
    /// [`CheckpointError::Incompatible`] if the stored names differ from the
    /// configured ones.
    pub fn from_document(
        categories: Categories,
        document: &CheckpointDocument,
    ) -> Result<Self, CheckpointError> {
        let incompatible = || CheckpointError::Incompatible {
            stored: document
                .totals
                .iter()
                .map(|entry| entry.category.clone())
                .collect(),
            configured: categories.names().to_vec(),
        };

        if document.totals.len() != categories.len() {
            return Err(incompatible());
        }

        let mut totals = Vec::with_capacity(document.totals.len());
        for entry in &document.totals {
            let id = categories.id_of(&entry.category).ok_or_else(incompatible)?;
            if totals.iter().any(|(seen, _)| *seen == id) {
                return Err(CheckpointError::Corrupt {
                    reason: format!("category {} listed twice", entry.category),
                });
            }
            totals.push((id, entry.count));
        }

        Ok(Self {
            categories,
            state: totals.into_iter().collect(),
            last_applied_tick: document.last_applied_tick,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tally_types::CategoryCount;

    use super::*;

    const POS: CategoryId = CategoryId::from_index(0);
    const NEG: CategoryId = CategoryId::from_index(1);

    fn delta(pairs: &[(CategoryId, u64)]) -> Delta {
        pairs.iter().copied().collect()
    }

    #[test]
    fn fresh_store_reads_zero() {
        let store = StateStore::new(Categories::sentiment());
        assert_eq!(store.last_applied_tick(), None);
        assert_eq!(store.next_tick().unwrap(), 0);
        assert_eq!(store.snapshot().counts(), vec![0, 0]);
    }

    #[test]
    fn totals_are_the_sum_of_applied_deltas() {
        let mut store = StateStore::new(Categories::sentiment());
        let deltas = [
            delta(&[(POS, 1), (NEG, 1)]),
            delta(&[(POS, 2), (NEG, 1)]),
            delta(&[]),
            delta(&[(NEG, 7)]),
        ];
        for (tick, d) in (0_u64..).zip(deltas.iter()) {
            store.apply(tick, d).unwrap();
        }
        assert_eq!(store.state().get(POS), 3);
        assert_eq!(store.state().get(NEG), 9);
        assert_eq!(store.last_applied_tick(), Some(3));
    }

    #[test]
    fn empty_delta_keeps_snapshot_unchanged() {
        let mut store = StateStore::new(Categories::sentiment());
        store.apply(0, &delta(&[(POS, 4)])).unwrap();
        let before = store.snapshot();
        store.apply(1, &Delta::new()).unwrap();
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.last_applied_tick(), Some(1));
    }

    #[test]
    fn snapshot_is_idempotent() {
        let mut store = StateStore::new(Categories::sentiment());
        store.apply(0, &delta(&[(POS, 2)])).unwrap();
        assert_eq!(store.snapshot(), store.snapshot());
    }

    #[test]
    fn rejects_duplicate_tick() {
        let mut store = StateStore::new(Categories::sentiment());
        store.apply(0, &delta(&[(POS, 1)])).unwrap();
        let err = store.apply(0, &delta(&[(POS, 1)])).unwrap_err();
        assert_eq!(
            err,
            StoreError::OutOfOrder {
                expected: 1,
                actual: 0
            }
        );
        assert_eq!(store.state().get(POS), 1);
    }

    #[test]
    fn rejects_skipped_tick() {
        let mut store = StateStore::new(Categories::sentiment());
        let err = store.apply(2, &delta(&[(POS, 1)])).unwrap_err();
        assert_eq!(
            err,
            StoreError::OutOfOrder {
                expected: 0,
                actual: 2
            }
        );
        assert_eq!(store.last_applied_tick(), None);
    }

    #[test]
    fn rejects_unknown_category_without_mutation() {
        let mut store = StateStore::new(Categories::sentiment());
        let bad = delta(&[(POS, 1), (CategoryId::from_index(9), 1)]);
        let err = store.apply(0, &bad).unwrap_err();
        assert_eq!(
            err,
            StoreError::UnknownCategory {
                id: CategoryId::from_index(9)
            }
        );
        assert_eq!(store.state().get(POS), 0);
        assert_eq!(store.last_applied_tick(), None);
    }

    #[test]
    fn overflow_is_all_or_nothing() {
        let mut store = StateStore::new(Categories::sentiment());
        store.apply(0, &delta(&[(NEG, u64::MAX)])).unwrap();
        let err = store.apply(1, &delta(&[(POS, 5), (NEG, 1)])).unwrap_err();
        assert_eq!(
            err,
            StoreError::CountOverflow {
                category: "negative".to_owned()
            }
        );
        assert_eq!(store.state().get(POS), 0);
        assert_eq!(store.last_applied_tick(), Some(0));
    }

    #[test]
    fn checkpoint_round_trip() {
        let mut store = StateStore::new(Categories::sentiment());
        store.apply(0, &delta(&[(POS, 10), (NEG, 4)])).unwrap();
        store.apply(1, &delta(&[(POS, 1)])).unwrap();

        let bytes = store.checkpoint().unwrap();
        let restored = StateStore::restore(Categories::sentiment(), &bytes).unwrap();

        assert_eq!(restored, store);
        assert_eq!(restored.next_tick().unwrap(), 2);
    }

    #[test]
    fn checkpoint_round_trip_with_a_zero_category() {
        let mut store = StateStore::new(Categories::sentiment());
        store.apply(0, &delta(&[(POS, 3)])).unwrap();

        let bytes = store.checkpoint().unwrap();
        let restored = StateStore::restore(Categories::sentiment(), &bytes).unwrap();

        assert_eq!(restored, store);
        assert_eq!(restored.snapshot(), store.snapshot());
        assert_eq!(restored.snapshot().counts(), vec![3, 0]);
    }

    #[test]
    fn checkpoint_of_fresh_store_round_trips() {
        let store = StateStore::new(Categories::sentiment());
        let bytes = store.checkpoint().unwrap();
        let restored = StateStore::restore(Categories::sentiment(), &bytes).unwrap();
        assert_eq!(restored.last_applied_tick(), None);
        assert_eq!(restored.next_tick().unwrap(), 0);
    }

    #[test]
    fn restore_continues_after_checkpointed_tick() {
        let document = CheckpointDocument {
            format_version: CHECKPOINT_FORMAT_VERSION,
            last_applied_tick: Some(5),
            totals: vec![
                CategoryCount::new("positive", 10),
                CategoryCount::new("negative", 4),
            ],
            written_at: Utc::now(),
        };
        let mut store = StateStore::from_document(Categories::sentiment(), &document).unwrap();
        assert!(store.apply(5, &delta(&[(POS, 1)])).is_err());
        store.apply(6, &delta(&[(POS, 1)])).unwrap();
        assert_eq!(store.snapshot().counts(), vec![11, 4]);
    }

    #[test]
    fn restore_matches_by_name() {
        let document = CheckpointDocument {
            format_version: CHECKPOINT_FORMAT_VERSION,
            last_applied_tick: Some(0),
            totals: vec![
                CategoryCount::new("negative", 4),
                CategoryCount::new("positive", 10),
            ],
            written_at: Utc::now(),
        };
        let store = StateStore::from_document(Categories::sentiment(), &document).unwrap();
        assert_eq!(store.state().get(POS), 10);
        assert_eq!(store.state().get(NEG), 4);
    }

    #[test]
    fn restore_with_other_categories_is_incompatible() {
        let store = StateStore::new(Categories::sentiment());
        let bytes = store.checkpoint().unwrap();
        let other = Categories::new(["joy", "anger"]).unwrap();
        let result = StateStore::restore(other, &bytes);
        assert!(matches!(result, Err(CheckpointError::Incompatible { .. })));
    }

    #[test]
    fn restore_with_repeated_category_is_corrupt() {
        let document = CheckpointDocument {
            format_version: CHECKPOINT_FORMAT_VERSION,
            last_applied_tick: None,
            totals: vec![
                CategoryCount::new("positive", 1),
                CategoryCount::new("positive", 2),
            ],
            written_at: Utc::now(),
        };
        let result = StateStore::from_document(Categories::sentiment(), &document);
        assert!(matches!(result, Err(CheckpointError::Corrupt { .. })));
    }

    #[test]
    fn restore_from_garbage_is_corrupt() {
        let result = StateStore::restore(Categories::sentiment(), b"\x00\x01garbage");
        assert!(matches!(result, Err(CheckpointError::Corrupt { .. })));
    }
}
