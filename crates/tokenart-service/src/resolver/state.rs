use url::Url;

/// What a display should currently show.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResolutionState {
    /// No identifier was assigned yet.
    #[default]
    Idle,
    /// Resolution is in progress.
    ///
    /// Holds the best candidate known so far for an immediate, tentative paint, or `None` if
    /// there is nothing to show until metadata resolution completes.
    Resolving(Option<Url>),
    /// Resolution completed with this candidate.
    ///
    /// It was not known to be bad at the time, but may still fail to load.
    Resolved(Url),
    /// All candidates failed, or the resolution timed out. Show the fallback placeholder.
    Exhausted,
}

impl ResolutionState {
    /// Returns the URL to display, if any.
    pub fn url(&self) -> Option<&Url> {
        match self {
            ResolutionState::Resolving(url) => url.as_ref(),
            ResolutionState::Resolved(url) => Some(url),
            ResolutionState::Idle | ResolutionState::Exhausted => None,
        }
    }
}
