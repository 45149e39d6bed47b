//! Process-wide caches shared by all resolution controllers.
//!
//! The [`SessionCache`] remembers the outcome of a resolution per [`Identifier`] for the
//! duration of a session, backed by a [`SessionStorage`]. The [`NegativeCache`] remembers
//! URLs which failed to load for the lifetime of the process.
//!
//! [`Identifier`]: tokenart_sources::Identifier

mod negative;
mod session;

pub use negative::NegativeCache;
pub use session::{
    FilesystemSessionStorage, InMemorySessionStorage, SessionCache, SessionEntry,
    SessionStorage, TIMEOUT_SENTINEL,
};
