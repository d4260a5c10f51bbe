//! The closed category enumeration.
//!
//! Categories are configured once at startup as an ordered list of names.
//! A [`CategoryId`] is the position of a category in that list, and the
//! position doubles as classification priority: when a token belongs to
//! more than one category, the one with the lower id wins.

use serde::{Deserialize, Serialize};

/// Name of the default first-priority category.
pub const POSITIVE: &str = "positive";

/// Name of the default second-priority category.
pub const NEGATIVE: &str = "negative";

/// Errors raised when building a [`Categories`] table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CategoryError {
    /// No categories were supplied.
    #[error("at least one category must be configured")]
    Empty,

    /// The same name appears twice.
    #[error("duplicate category name: {name}")]
    Duplicate {
        /// The repeated name.
        name: String,
    },

    /// A category name is empty or only whitespace.
    #[error("category names must not be blank")]
    BlankName,

    /// More categories than a [`CategoryId`] can address.
    #[error("too many categories: {count} (limit {limit})")]
    TooMany {
        /// Number of categories supplied.
        count: usize,
        /// Maximum supported.
        limit: usize,
    },
}

/// Position of a category within the configured enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(u16);

impl CategoryId {
    /// Build an id from a raw position.
    ///
    /// The id is only meaningful against the [`Categories`] table it was
    /// taken from; use [`Categories::id_of`] outside of tests.
    pub const fn from_index(index: u16) -> Self {
        Self(index)
    }

    /// Return the position as a `usize`.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl core::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An ordered, closed set of category names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Categories {
    names: Vec<String>,
}

impl Categories {
    /// Build a table from names in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`CategoryError`] if the list is empty, contains a blank or
    /// repeated name, or is longer than `u16::MAX` entries.
    pub fn new<I, S>(names: I) -> Result<Self, CategoryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(CategoryError::Empty);
        }
        let limit = usize::from(u16::MAX);
        if names.len() > limit {
            return Err(CategoryError::TooMany {
                count: names.len(),
                limit,
            });
        }
        for (position, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(CategoryError::BlankName);
            }
            if names.iter().take(position).any(|earlier| earlier == name) {
                return Err(CategoryError::Duplicate { name: name.clone() });
            }
        }
        Ok(Self { names })
    }

    /// The two-category table: `positive` first, then `negative`.
    pub fn sentiment() -> Self {
        Self {
            names: vec![POSITIVE.to_owned(), NEGATIVE.to_owned()],
        }
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always `false`; an empty table cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Look up the id of a category by name.
    pub fn id_of(&self, name: &str) -> Option<CategoryId> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .and_then(|position| u16::try_from(position).ok())
            .map(CategoryId)
    }

    /// Name of the category with the given id.
    pub fn name(&self, id: CategoryId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    /// Whether `id` addresses a category in this table.
    pub fn contains(&self, id: CategoryId) -> bool {
        id.index() < self.names.len()
    }

    /// Iterate `(id, name)` pairs in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, &str)> + '_ {
        self.names
            .iter()
            .zip(0..=u16::MAX)
            .map(|(name, index)| (CategoryId(index), name.as_str()))
    }

    /// Category names in enumeration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl TryFrom<Vec<String>> for Categories {
    type Error = CategoryError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<Categories> for Vec<String> {
    fn from(categories: Categories) -> Self {
        categories.names
    }
}
