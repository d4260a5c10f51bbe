//! Batch reduction: turn one tick's events into a [`Delta`].
//!
//! Every event is split on whitespace and each token is classified. Tokens
//! no category claims are skipped. The result depends only on the multiset
//! of events, never on their order.

use tally_types::{Delta, Event};

use crate::classifier::Classifier;

/// Outcome of reducing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReduction {
    /// Matches per category.
    pub delta: Delta,
    /// Events in the batch.
    pub events: u64,
    /// Tokens examined across all events.
    pub tokens: u64,
}

/// Reduce a batch of events to per-category match counts.
pub fn reduce<'a, I>(events: I, classifier: &Classifier) -> Delta
where
    I: IntoIterator<Item = &'a Event>,
{
    reduce_batch(events, classifier).delta
}

/// Reduce a batch and report how many events and tokens it held.
pub fn reduce_batch<'a, I>(events: I, classifier: &Classifier) -> BatchReduction
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut reduction = BatchReduction::default();
    for event in events {
        reduction.events = reduction.events.saturating_add(1);
        for token in event.tokens() {
            reduction.tokens = reduction.tokens.saturating_add(1);
            if let Some(id) = classifier.classify(token) {
                reduction.delta.record(id);
            }
        }
    }
    reduction
}
