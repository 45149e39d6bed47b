use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use url::Url;

use tokenart_sources::Identifier;

use crate::config::Config;

/// The value stored for identifiers whose resolution timed out.
pub const TIMEOUT_SENTINEL: &str = "image-timeout";

/// Durable key-value storage scoped to one session.
///
/// Both operations are synchronous and infallible from the caller's perspective. Storage
/// failures are logged, and a failed read is indistinguishable from an absent key.
pub trait SessionStorage: fmt::Debug + Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str);

    /// Removes all entries. Called when the session ends.
    fn clear(&self);
}

/// A [`SessionStorage`] which lives in memory for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct InMemorySessionStorage {
    entries: moka::sync::Cache<String, String>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            entries: moka::sync::Cache::builder().build(),
        }
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStorage for InMemorySessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key)
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_owned(), value.to_owned());
    }

    fn clear(&self) {
        self.entries.invalidate_all();
    }
}

/// A [`SessionStorage`] keeping one file per key in a directory.
///
/// Entries survive a restart of the process as long as the directory is kept, which is what
/// makes a session outlive a single run. File names are the hex SHA-256 of the key, so
/// arbitrary identifiers map to safe paths.
#[derive(Debug, Clone)]
pub struct FilesystemSessionStorage {
    dir: PathBuf,
}

impl FilesystemSessionStorage {
    /// Opens the storage in `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Returns the directory backing this storage.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        let hash = Sha256::digest(key.as_bytes());
        self.dir.join(hex::encode(hash))
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(value.as_bytes())?;
        file.persist(self.path(key))?;
        Ok(())
    }
}

impl SessionStorage for FilesystemSessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Some(value),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(error = &err as &dyn std::error::Error, key, "Failed to read session entry");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(err) = self.write(key, value) {
            tracing::warn!(error = &err as &dyn std::error::Error, key, "Failed to write session entry");
        }
    }

    fn clear(&self) {
        let result = fs::remove_dir_all(&self.dir).and_then(|_| fs::create_dir_all(&self.dir));
        if let Err(err) = result {
            tracing::warn!(error = &err as &dyn std::error::Error, dir = %self.dir.display(), "Failed to clear session storage");
        }
    }
}

/// An entry of the [`SessionCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEntry {
    /// The identifier resolved to this URL, which was confirmed to load.
    Resolved(Url),
    /// The resolution of the identifier timed out.
    ///
    /// The artwork is treated as unavailable for the rest of the session.
    TimedOut,
}

impl SessionEntry {
    fn encode(&self) -> &str {
        match self {
            SessionEntry::Resolved(url) => url.as_str(),
            SessionEntry::TimedOut => TIMEOUT_SENTINEL,
        }
    }

    fn decode(raw: &str) -> Option<Self> {
        if raw == TIMEOUT_SENTINEL {
            return Some(SessionEntry::TimedOut);
        }
        Url::parse(raw).ok().map(SessionEntry::Resolved)
    }
}

/// Remembers resolution outcomes per [`Identifier`] for the duration of a session.
///
/// Writes are idempotent and the last writer wins. Clones share the same storage.
#[derive(Debug, Clone)]
pub struct SessionCache {
    storage: Arc<dyn SessionStorage>,
}

impl SessionCache {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }

    /// Creates a [`SessionCache`] backed by [`InMemorySessionStorage`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySessionStorage::new()))
    }

    /// Opens the session cache configured in `config`.
    ///
    /// Uses [`FilesystemSessionStorage`] in the configured `session_dir`, so that separate
    /// processes share one session. Without a `session_dir`, the session lives in memory.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let Some(dir) = config.session_dir.as_deref() else {
            return Ok(Self::in_memory());
        };
        let storage = FilesystemSessionStorage::new(dir)
            .with_context(|| format!("failed to open session directory {}", dir.display()))?;
        Ok(Self::new(Arc::new(storage)))
    }

    /// Returns the entry for `identifier`.
    ///
    /// A stored value which is neither the timeout sentinel nor a valid URL reads as absent.
    pub fn get(&self, identifier: &Identifier) -> Option<SessionEntry> {
        let raw = self.storage.get(identifier.as_str())?;
        let entry = SessionEntry::decode(&raw);
        if entry.is_none() {
            tracing::debug!(%identifier, raw, "Ignoring malformed session entry");
        }
        entry
    }

    /// Records `entry` for `identifier`.
    pub fn set(&self, identifier: &Identifier, entry: &SessionEntry) {
        self.storage.set(identifier.as_str(), entry.encode());
    }

    /// Forgets all entries, ending the session.
    pub fn end_session(&self) {
        self.storage.clear();
    }
}
