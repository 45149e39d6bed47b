use url::Url;

/// The set of URLs known to fail to load.
///
/// Entries are added when an already displayed URL fails at the transport layer and are never
/// removed. Clones share the same underlying set, so a single instance is created at startup
/// and handed to every controller.
#[derive(Clone, Debug)]
pub struct NegativeCache {
    bad_urls: moka::sync::Cache<String, ()>,
}

impl NegativeCache {
    /// Creates an empty [`NegativeCache`].
    pub fn new() -> Self {
        Self {
            // No capacity and no expiry: the set grows for the lifetime of the process.
            bad_urls: moka::sync::Cache::builder().build(),
        }
    }

    /// Returns `true` if `url` is known to fail to load.
    pub fn has(&self, url: &Url) -> bool {
        self.bad_urls.contains_key(url.as_str())
    }

    /// Records that `url` failed to load.
    pub fn mark_bad(&self, url: &Url) {
        if self.has(url) {
            return;
        }
        tracing::debug!(%url, "Marking URL as bad");
        self.bad_urls.insert(url.to_string(), ());
        metric!(counter("resolver.negative_cache.marked") += 1);
    }
}

impl Default for NegativeCache {
    fn default() -> Self {
        Self::new()
    }
}
