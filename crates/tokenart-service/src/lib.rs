#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod probe;
pub mod resolver;
pub mod tokens;
pub mod utils;
