use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use tokenart_sources::{CandidateList, Identifier};

use crate::caching::{NegativeCache, SessionEntry};
use crate::error::ResolveError;

use super::{ImageService, ResolutionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Metadata discovery is still running, the candidates are tentative.
    Resolving,
    /// The candidate list is final.
    Resolved,
    /// Terminal for this identifier.
    Exhausted,
}

/// The resolution of one identifier within one controller.
#[derive(Debug)]
struct Resolution {
    identifier: Identifier,
    /// The last known candidates, initial or expanded.
    candidates: CandidateList,
    phase: Phase,
    /// Whether a candidate was confirmed to load.
    confirmed: bool,
    /// Cancelled when the controller moves on to another identifier or is dropped.
    token: CancellationToken,
    /// The pending timeout, cancelled on a confirmed load.
    timer: CancellationToken,
}

impl Resolution {
    fn new(identifier: Identifier) -> Self {
        let token = CancellationToken::new();
        let timer = token.child_token();
        Self {
            identifier,
            candidates: vec![],
            phase: Phase::Exhausted,
            confirmed: false,
            token,
            timer,
        }
    }

    /// The first candidate not known to be bad.
    fn candidate<'a>(&'a self, negative_cache: &NegativeCache) -> Option<&'a Url> {
        self.candidates.iter().find(|url| !negative_cache.has(url))
    }

    /// Moves a resolved display whose candidates all turned out bad to [`Phase::Exhausted`].
    fn refresh(&mut self, negative_cache: &NegativeCache) {
        if self.phase == Phase::Resolved && self.candidate(negative_cache).is_none() {
            tracing::debug!(identifier = %self.identifier, "All candidates failed to load");
            self.phase = Phase::Exhausted;
        }
    }

    fn display(&self, negative_cache: &NegativeCache) -> ResolutionState {
        match self.phase {
            Phase::Resolving => ResolutionState::Resolving(self.candidate(negative_cache).cloned()),
            Phase::Resolved => match self.candidate(negative_cache) {
                Some(url) => ResolutionState::Resolved(url.clone()),
                None => ResolutionState::Exhausted,
            },
            Phase::Exhausted => ResolutionState::Exhausted,
        }
    }

    /// Completes metadata discovery.
    ///
    /// Discovered candidates replace the tentative ones. If nothing was discovered, the initial
    /// candidates become final.
    fn discovered(&mut self, expanded: CandidateList) {
        if self.phase != Phase::Resolving {
            return;
        }
        tracing::trace!(
            identifier = %self.identifier,
            discovered = expanded.len(),
            "Metadata discovery completed"
        );
        if !expanded.is_empty() {
            self.candidates = expanded;
        }
        self.phase = Phase::Resolved;
    }

    /// Handles the resolution deadline.
    ///
    /// Unless a candidate was confirmed in the meantime, the identifier is recorded as timed out
    /// for the rest of the session. A confirmation by another controller counts as well, and its
    /// URL is adopted instead of overwriting it.
    fn deadline_elapsed(&mut self, service: &ImageService) {
        if !self.confirmed {
            if let Some(SessionEntry::Resolved(url)) = service.session_cache().get(&self.identifier)
            {
                if !service.negative_cache().has(&url) {
                    tracing::debug!(identifier = %self.identifier, %url, "Adopting artwork confirmed elsewhere");
                    self.candidates = vec![url];
                    self.phase = Phase::Resolved;
                    self.confirmed = true;
                }
            }
        }
        if self.confirmed {
            if self.phase == Phase::Resolving {
                self.phase = Phase::Resolved;
            }
            return;
        }

        let error = ResolveError::ResolutionTimeout(service.timeout());
        tracing::info!(identifier = %self.identifier, %error, "Giving up on artwork");
        metric!(counter("resolver.timeout") += 1);

        service
            .session_cache()
            .set(&self.identifier, &SessionEntry::TimedOut);
        self.phase = Phase::Exhausted;
    }
}

#[derive(Debug)]
struct Inner {
    service: Arc<ImageService>,
    resolution: Mutex<Option<Resolution>>,
    state: watch::Sender<ResolutionState>,
}

impl Inner {
    /// Publishes the display state of `resolution` to subscribers.
    fn publish(&self, resolution: &mut Resolution) -> ResolutionState {
        let negative_cache = self.service.negative_cache();
        resolution.refresh(negative_cache);
        let state = resolution.display(negative_cache);
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::trace!(identifier = %resolution.identifier, ?state, "Display state changed");
            *current = state.clone();
            true
        });
        state
    }

    /// Applies `f` to the resolution owning `token`.
    ///
    /// Does nothing if `token` was cancelled. Cancellation happens under the same lock, so a
    /// stale task can never touch the resolution of a newer identifier.
    fn update<F>(&self, token: &CancellationToken, f: F)
    where
        F: FnOnce(&mut Resolution, &ImageService),
    {
        let mut guard = self.resolution.lock().unwrap();
        if token.is_cancelled() {
            return;
        }
        if let Some(resolution) = guard.as_mut() {
            f(resolution, &self.service);
            self.publish(resolution);
        }
    }
}

/// Tracks the artwork of one display.
///
/// The controller resolves the identifier most recently passed to
/// [`set_identifier`](Self::set_identifier) and exposes the best candidate through
/// [`current_display_state`](Self::current_display_state). The renderer reports back whether
/// a displayed URL loaded, which confirms or demotes it.
///
/// Background work is spawned on the service's runtime. It is cancelled when the identifier
/// changes and when the controller is dropped.
#[derive(Debug)]
pub struct ResolutionController {
    inner: Arc<Inner>,
}

impl ResolutionController {
    pub(super) fn new(service: Arc<ImageService>) -> Self {
        let (state, _) = watch::channel(ResolutionState::Idle);
        Self {
            inner: Arc::new(Inner {
                service,
                resolution: Mutex::new(None),
                state,
            }),
        }
    }

    /// Starts resolving `identifier`, abandoning the previous one.
    ///
    /// Assigning the identifier that is already being displayed does nothing.
    pub fn set_identifier(&self, identifier: impl Into<Identifier>) {
        let identifier = identifier.into();
        let service = &self.inner.service;

        let mut guard = self.inner.resolution.lock().unwrap();
        if let Some(previous) = guard.as_ref() {
            if previous.identifier == identifier {
                return;
            }
            previous.token.cancel();
        }

        let mut resolution = Resolution::new(identifier.clone());
        match service.session_cache().get(&identifier) {
            Some(SessionEntry::Resolved(url)) if !service.negative_cache().has(&url) => {
                tracing::debug!(%identifier, %url, "Using artwork from session cache");
                metric!(counter("resolver.session_cache") += 1, "status" => "hit");
                resolution.candidates = vec![url];
                resolution.phase = Phase::Resolved;
                resolution.confirmed = true;
            }
            Some(SessionEntry::TimedOut) => {
                tracing::debug!(%identifier, "Artwork timed out earlier in this session");
                metric!(counter("resolver.session_cache") += 1, "status" => "timeout");
            }
            _ => {
                metric!(counter("resolver.session_cache") += 1, "status" => "miss");
                let candidates = service.normalizer().normalize(&identifier);
                if candidates.is_empty() {
                    let error = ResolveError::UnresolvableIdentifier;
                    tracing::debug!(%identifier, %error, "Showing fallback");
                } else {
                    resolution.candidates = candidates.clone();
                    resolution.phase = Phase::Resolving;
                    self.spawn_discovery(&resolution, candidates);
                }
            }
        }

        self.inner.publish(&mut resolution);
        *guard = Some(resolution);
    }

    /// Spawns metadata discovery and the timeout of `resolution`.
    fn spawn_discovery(&self, resolution: &Resolution, initial: CandidateList) {
        let inner = self.inner.clone();
        let service = inner.service.clone();
        let runtime = service.runtime.clone();
        let token = resolution.token.clone();
        let timer = resolution.timer.clone();
        let deadline = Instant::now() + service.timeout();

        let task = async move {
            let discovery = discover(&service, &initial);
            match tokio::time::timeout_at(deadline, discovery).await {
                Ok(expanded) => {
                    inner.update(&token, |resolution, _| resolution.discovered(expanded));
                }
                Err(_) => {
                    // Metadata lookups still in flight are abandoned.
                    inner.update(&token, Resolution::deadline_elapsed);
                    return;
                }
            }

            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    inner.update(&token, Resolution::deadline_elapsed);
                }
            }
        };

        let cancelled = resolution.token.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = task => {}
            }
        });
    }

    /// Returns the identifier currently assigned to this controller.
    pub fn identifier(&self) -> Option<Identifier> {
        let guard = self.inner.resolution.lock().unwrap();
        guard.as_ref().map(|resolution| resolution.identifier.clone())
    }

    /// Returns what the display should show right now.
    ///
    /// This also accounts for URLs which were marked bad by other controllers since the last
    /// state change.
    pub fn current_display_state(&self) -> ResolutionState {
        let mut guard = self.inner.resolution.lock().unwrap();
        match guard.as_mut() {
            Some(resolution) => self.inner.publish(resolution),
            None => ResolutionState::Idle,
        }
    }

    /// Subscribes to changes of the display state.
    pub fn subscribe(&self) -> watch::Receiver<ResolutionState> {
        self.inner.state.subscribe()
    }

    /// Reports that the displayed `url` loaded successfully.
    ///
    /// This remembers `url` for the identifier in the session cache and disarms the timeout.
    /// Reports for URLs which are not currently displayed are ignored.
    pub fn report_load_success(&self, url: &Url) {
        let service = &self.inner.service;
        let mut guard = self.inner.resolution.lock().unwrap();
        let Some(resolution) = guard.as_mut() else {
            return;
        };
        if resolution.display(service.negative_cache()).url() != Some(url) {
            tracing::debug!(%url, "Ignoring load report for URL which is not displayed");
            return;
        }

        tracing::trace!(identifier = %resolution.identifier, %url, "Artwork loaded");
        metric!(counter("resolver.load") += 1, "status" => "success");
        service
            .session_cache()
            .set(&resolution.identifier, &SessionEntry::Resolved(url.clone()));
        resolution.confirmed = true;
        resolution.timer.cancel();
        self.inner.publish(resolution);
    }

    /// Reports that `url` failed to load.
    ///
    /// The URL is marked bad for the lifetime of the process, and the display advances to the
    /// next candidate that is not known to be bad.
    pub fn report_load_failure(&self, url: &Url) {
        let service = &self.inner.service;
        tracing::debug!(%url, "Artwork failed to load");
        metric!(counter("resolver.load") += 1, "status" => "failure");
        service.negative_cache().mark_bad(url);

        let mut guard = self.inner.resolution.lock().unwrap();
        if let Some(resolution) = guard.as_mut() {
            self.inner.publish(resolution);
        }
    }
}

impl Drop for ResolutionController {
    fn drop(&mut self) {
        let guard = self.inner.resolution.lock().unwrap();
        if let Some(resolution) = guard.as_ref() {
            resolution.token.cancel();
        }
    }
}

/// Queries every initial candidate as a metadata document, in parallel.
///
/// The discovered image references are normalized and concatenated in candidate order.
async fn discover(service: &ImageService, initial: &[Url]) -> CandidateList {
    let lookups: Vec<_> = initial
        .iter()
        .cloned()
        .map(|url| {
            let metadata = service.metadata.clone();
            service
                .runtime
                .spawn(async move { metadata.resolve_image(&url).await })
        })
        .collect();

    join_all(lookups)
        .await
        .into_iter()
        .filter_map(|lookup| lookup.ok().flatten())
        .flat_map(|image| service.normalizer().normalize(&image))
        .collect()
}
