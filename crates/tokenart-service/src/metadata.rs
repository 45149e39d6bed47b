//! Discovery of artwork through metadata documents.
//!
//! Token URIs frequently point at a JSON metadata document rather than at the image itself.
//! A [`MetadataResolver`] queries a candidate URL as such a document and extracts the embedded
//! image reference, which is then normalized like any other identifier.

use async_trait::async_trait;
use data_url::DataUrl;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use tokenart_sources::Identifier;

use crate::config::Config;
use crate::error::ResolveError;
use crate::utils::http::{create_client, DownloadTimeouts};

/// Best-effort lookup of the image referenced by a metadata document.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Resolves the image referenced by the metadata document at `url`.
    ///
    /// Every failure resolves to `None`. Implementations do not need their own deadline, the
    /// caller bounds the wait.
    async fn resolve_image(&self, url: &Url) -> Option<Identifier>;
}

/// The subset of a token metadata document we care about.
#[derive(Debug, Deserialize)]
struct MetadataDocument {
    image: Option<String>,
    image_url: Option<String>,
}

impl MetadataDocument {
    fn into_image(self) -> Option<Identifier> {
        [self.image, self.image_url]
            .into_iter()
            .flatten()
            .map(|image| image.trim().to_owned())
            .find(|image| !image.is_empty())
            .map(Identifier::from)
    }
}

fn is_json_mime(type_: &str, subtype: &str) -> bool {
    type_ == "application" && (subtype == "json" || subtype.ends_with("+json"))
}

/// Resolves metadata documents over HTTP and from inline `data:` URLs.
#[derive(Debug, Clone)]
pub struct HttpMetadataResolver {
    client: Client,
    max_document_size: u64,
}

impl HttpMetadataResolver {
    pub fn new(client: Client, max_document_size: u64) -> Self {
        Self {
            client,
            max_document_size,
        }
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let client = create_client(&DownloadTimeouts::from_config(config))?;
        Ok(Self::new(client, config.max_metadata_size))
    }

    /// Fetches and parses the document at `url`.
    pub async fn fetch_document(&self, url: &Url) -> Result<Option<Identifier>, ResolveError> {
        let document = match url.scheme() {
            "data" => self.decode_data_url(url)?,
            "http" | "https" => self.download(url).await?,
            scheme => {
                return Err(ResolveError::MetadataFetchFailure(format!(
                    "unsupported scheme `{scheme}`"
                )));
            }
        };
        Ok(document.into_image())
    }

    fn decode_data_url(&self, url: &Url) -> Result<MetadataDocument, ResolveError> {
        let data_url = DataUrl::process(url.as_str()).map_err(|err| {
            ResolveError::MetadataFetchFailure(format!("invalid data url: {err:?}"))
        })?;
        let mime = data_url.mime_type();
        if !is_json_mime(&mime.type_, &mime.subtype) {
            return Err(ResolveError::MetadataFetchFailure(format!(
                "not a metadata document: {}/{}",
                mime.type_, mime.subtype
            )));
        }
        let (body, _) = data_url.decode_to_vec().map_err(|err| {
            ResolveError::MetadataFetchFailure(format!("invalid data url body: {err:?}"))
        })?;
        serde_json::from_slice(&body).map_err(|err| ResolveError::metadata(&err))
    }

    async fn download(&self, url: &Url) -> Result<MetadataDocument, ResolveError> {
        tracing::trace!("Fetching metadata from `{}`", url);

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| ResolveError::metadata(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::MetadataFetchFailure(format!(
                "unexpected status code {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if content_type.starts_with("image/") {
            return Err(ResolveError::MetadataFetchFailure(format!(
                "candidate is an image ({content_type})"
            )));
        }

        match response.content_length() {
            Some(length) if length > self.max_document_size => {
                return Err(ResolveError::MetadataFetchFailure(format!(
                    "document too large ({length} bytes)"
                )));
            }
            _ => {}
        }

        // Servers may omit the length or lie about it, so the limit applies while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| ResolveError::metadata(&err))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_document_size {
                return Err(ResolveError::MetadataFetchFailure(format!(
                    "document too large (more than {} bytes)",
                    self.max_document_size
                )));
            }
        }

        serde_json::from_slice(&body).map_err(|err| ResolveError::metadata(&err))
    }
}

#[async_trait]
impl MetadataResolver for HttpMetadataResolver {
    async fn resolve_image(&self, url: &Url) -> Option<Identifier> {
        match self.fetch_document(url).await {
            Ok(Some(image)) => {
                tracing::debug!(%url, %image, "Discovered image in metadata");
                metric!(counter("resolver.metadata.resolved") += 1);
                Some(image)
            }
            Ok(None) => {
                tracing::debug!(%url, "Metadata document has no image");
                None
            }
            Err(error) => {
                tracing::debug!(%url, %error, "Metadata lookup failed");
                None
            }
        }
    }
}
