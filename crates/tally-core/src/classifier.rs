//! Token classification against static membership sets.
//!
//! Each configured category owns a [`MembershipSet`]. The [`Classifier`]
//! folds them into a single token index at construction time, walking the
//! categories in enumeration order so that the first category to claim a
//! token keeps it. Classifying a token is then one hash lookup.

use std::collections::{HashMap, HashSet};

use tally_types::{Categories, CategoryId};

/// Errors raised while assembling a [`Classifier`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    /// The number of membership sets differs from the number of categories.
    #[error("expected {expected} membership sets, got {actual}")]
    SetCountMismatch {
        /// Number of configured categories.
        expected: usize,
        /// Number of sets supplied.
        actual: usize,
    },
}

/// An immutable set of tokens belonging to one category.
///
/// Matching is exact and case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSet {
    tokens: HashSet<String>,
}

impl MembershipSet {
    /// Build a set from tokens.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `token` is a member.
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Number of distinct tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the set has no tokens.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate the tokens in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.tokens.iter().map(String::as_str)
    }
}

impl FromIterator<String> for MembershipSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

/// Maps tokens to at most one category.
#[derive(Debug, Clone)]
pub struct Classifier {
    categories: Categories,
    index: HashMap<String, CategoryId>,
}

impl Classifier {
    /// Build a classifier from one membership set per category.
    ///
    /// `sets` must be in the same order as `categories`. A token listed by
    /// several categories is assigned to the earliest one.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::SetCountMismatch`] if `sets` and
    /// `categories` differ in length.
    pub fn new(categories: Categories, sets: &[MembershipSet]) -> Result<Self, ClassifierError> {
        if sets.len() != categories.len() {
            return Err(ClassifierError::SetCountMismatch {
                expected: categories.len(),
                actual: sets.len(),
            });
        }

        let capacity = sets.iter().map(MembershipSet::len).sum();
        let mut index = HashMap::with_capacity(capacity);
        for ((id, _), set) in categories.iter().zip(sets) {
            for token in set.iter() {
                index.entry(token.to_owned()).or_insert(id);
            }
        }

        Ok(Self { categories, index })
    }

    /// The category that claims `token`, if any.
    pub fn classify(&self, token: &str) -> Option<CategoryId> {
        self.index.get(token).copied()
    }

    /// The category table this classifier was built for.
    pub const fn categories(&self) -> &Categories {
        &self.categories
    }

    /// Number of distinct tokens across all categories.
    pub fn vocabulary_size(&self) -> usize {
        self.index.len()
    }
}
