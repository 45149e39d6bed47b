use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

/// An opaque string naming an artwork resource.
///
/// This may be a direct URL, a content-addressed URI such as `ipfs://…`, or any other
/// indirection scheme. It is used verbatim as the key of the session cache, so two identifiers
/// are only equal if their raw strings are.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier(Arc<str>);

impl Identifier {
    /// Creates a new [`Identifier`] from its raw string.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().into())
    }

    /// Returns the raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the lowercased scheme of this identifier, if it has one.
    pub fn scheme(&self) -> Option<String> {
        let (scheme, _) = self.0.split_once(':')?;
        let valid = !scheme.is_empty()
            && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        valid.then(|| scheme.to_ascii_lowercase())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Identifier {
    fn from(raw: String) -> Self {
        Self(raw.into())
    }
}

/// An ordered sequence of fetchable URLs derived from an [`Identifier`].
///
/// The order encodes preference: the first reachable candidate wins. An empty list means the
/// identifier could not be resolved.
pub type CandidateList = Vec<Url>;
