//! Resolution of artwork identifiers into displayable URLs.
//!
//! An [`ImageService`] bundles the services shared by all displays: the normalizer, the
//! metadata resolver, and the session and negative caches. Each display creates its own
//! [`ResolutionController`], which tracks the identifier it currently shows.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokenart_sources::UriNormalizer;

use crate::caching::{NegativeCache, SessionCache};
use crate::config::Config;
use crate::metadata::{HttpMetadataResolver, MetadataResolver};

mod controller;
mod state;

pub use controller::ResolutionController;
pub use state::ResolutionState;

#[cfg(test)]
mod tests;

/// The services shared by all [`ResolutionController`]s.
pub struct ImageService {
    runtime: tokio::runtime::Handle,
    normalizer: UriNormalizer,
    metadata: Arc<dyn MetadataResolver>,
    session_cache: SessionCache,
    negative_cache: NegativeCache,
    timeout: Duration,
}

impl std::fmt::Debug for ImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageService")
            .field("normalizer", &self.normalizer)
            .field("session_cache", &self.session_cache)
            .field("negative_cache", &self.negative_cache)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ImageService {
    /// Creates the service from `config`, resolving metadata over HTTP.
    ///
    /// The session cache is kept in the configured `session_dir`, or in memory if there is none.
    pub fn new(config: &Config, runtime: tokio::runtime::Handle) -> Result<Arc<Self>> {
        let metadata =
            HttpMetadataResolver::from_config(config).context("failed to create HTTP client")?;
        let session_cache = SessionCache::from_config(config)?;

        Ok(Self::from_parts(
            config,
            runtime,
            Arc::new(metadata),
            session_cache,
            NegativeCache::new(),
        ))
    }

    /// Creates the service from explicitly provided shared services.
    pub fn from_parts(
        config: &Config,
        runtime: tokio::runtime::Handle,
        metadata: Arc<dyn MetadataResolver>,
        session_cache: SessionCache,
        negative_cache: NegativeCache,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            normalizer: UriNormalizer::new(config.gateways.clone()),
            metadata,
            session_cache,
            negative_cache,
            timeout: config.resolution_timeout,
        })
    }

    /// Creates a new controller for one display.
    pub fn controller(self: &Arc<Self>) -> ResolutionController {
        ResolutionController::new(self.clone())
    }

    pub fn normalizer(&self) -> &UriNormalizer {
        &self.normalizer
    }

    pub fn session_cache(&self) -> &SessionCache {
        &self.session_cache
    }

    pub fn negative_cache(&self) -> &NegativeCache {
        &self.negative_cache
    }

    /// The deadline of a single resolution.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

