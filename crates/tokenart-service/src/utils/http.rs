use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::Config;

/// The user agent sent with every outgoing request.
pub const TOKENART_USER_AGENT: &str = concat!("tokenart/", env!("CARGO_PKG_VERSION"));

/// Timeouts applied to all HTTP requests.
#[derive(Copy, Clone, Debug)]
pub struct DownloadTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// Global timeout for one request.
    pub max_download: Duration,
}

impl DownloadTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            max_download: config.max_download_timeout,
        }
    }
}

impl Default for DownloadTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            max_download: Duration::from_secs(30),
        }
    }
}

/// Creates a [`reqwest::Client`] with the provided timeouts.
pub fn create_client(timeouts: &DownloadTimeouts) -> reqwest::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(TOKENART_USER_AGENT));

    reqwest::ClientBuilder::new()
        .gzip(true)
        .default_headers(headers)
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.max_download)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
}
