//! Utilities dealing with artwork sources.
//!
//! Includes the [`Identifier`] naming an artwork resource, the gateway configuration used to
//! rewrite content-addressed schemes, and the [`UriNormalizer`] which turns an identifier into
//! an ordered list of directly fetchable candidate URLs.

#![warn(missing_docs)]

mod gateways;
mod identifier;
mod normalize;

pub use gateways::*;
pub use identifier::*;
pub use normalize::*;
