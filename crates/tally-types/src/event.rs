//! Upstream events.

use serde::{Deserialize, Serialize};

/// One unit of text delivered by the upstream source.
///
/// Events are opaque: they are only ever split into whitespace-delimited
/// tokens. An event with no matching tokens contributes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Raw text content.
    pub text: String,
}

impl Event {
    /// Wrap a piece of text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Decode a transport payload, replacing invalid UTF-8 sequences.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            text: String::from_utf8_lossy(payload).into_owned(),
        }
    }

    /// Whitespace-delimited tokens, with no normalization.
    pub fn tokens(&self) -> impl Iterator<Item = &str> + '_ {
        self.text.split_whitespace()
    }
}

impl From<&str> for Event {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Event {
    fn from(text: String) -> Self {
        Self { text }
    }
}
