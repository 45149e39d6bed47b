use std::error::Error;
use std::time::Duration;

use thiserror::Error;

/// The ways resolving and displaying artwork can fail.
///
/// None of these are surfaced to users. They are logged, and every failure path degrades to
/// the fallback placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The normalizer produced no candidates for the identifier.
    #[error("unresolvable identifier")]
    UnresolvableIdentifier,
    /// A candidate could not be queried or parsed as a metadata document.
    #[error("metadata fetch failed: {0}")]
    MetadataFetchFailure(String),
    /// No candidate was confirmed before the resolution deadline.
    #[error("resolution timed out after {}", humantime::format_duration(*.0))]
    ResolutionTimeout(Duration),
    /// A URL which was believed good failed to load.
    #[error("load failed: {0}")]
    TransportLoadFailure(String),
}

/// Returns the message of the innermost error in the `source` chain.
pub(crate) fn root_cause_message(mut error: &dyn Error) -> String {
    while let Some(src) = error.source() {
        error = src;
    }

    let mut error_string = error.to_string();

    // Special-case a few error strings
    if error_string.contains("certificate verify failed") {
        error_string = "certificate verify failed".to_string();
    }

    if error_string.contains("SSL routines") {
        error_string = "SSL error".to_string();
    }

    error_string
}

impl ResolveError {
    /// Wraps any error as a [`MetadataFetchFailure`](Self::MetadataFetchFailure).
    pub fn metadata(error: &dyn Error) -> Self {
        Self::MetadataFetchFailure(root_cause_message(error))
    }

    /// Wraps any error as a [`TransportLoadFailure`](Self::TransportLoadFailure).
    pub fn transport(error: &dyn Error) -> Self {
        Self::TransportLoadFailure(root_cause_message(error))
    }
}
