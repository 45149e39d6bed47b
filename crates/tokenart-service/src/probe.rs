//! Loading of resolved artwork.
//!
//! The [`ImageProbe`] stands in for the image loader of a display. It confirms whether a URL
//! actually serves an image, and [`render`] drives a [`ResolutionController`] with its results
//! until the display settles.

use data_url::DataUrl;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use url::Url;

use crate::config::Config;
use crate::error::ResolveError;
use crate::resolver::{ResolutionController, ResolutionState};
use crate::utils::http::{create_client, DownloadTimeouts};

/// Checks whether URLs load as images.
#[derive(Debug, Clone)]
pub struct ImageProbe {
    client: Client,
}

impl ImageProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let client = create_client(&DownloadTimeouts::from_config(config))?;
        Ok(Self::new(client))
    }

    /// Loads `url` and verifies that it is an image.
    ///
    /// Inline `data:` URLs only need an image media type. Remote URLs must respond successfully
    /// with an image content type and the body must download completely.
    pub async fn load(&self, url: &Url) -> Result<(), ResolveError> {
        match url.scheme() {
            "data" => {
                let data_url = DataUrl::process(url.as_str()).map_err(|err| {
                    ResolveError::TransportLoadFailure(format!("invalid data url: {err:?}"))
                })?;
                let mime = data_url.mime_type();
                if mime.type_ != "image" {
                    return Err(ResolveError::TransportLoadFailure(format!(
                        "not an image: {}/{}",
                        mime.type_, mime.subtype
                    )));
                }
                Ok(())
            }
            "http" | "https" => self.download(url).await,
            scheme => Err(ResolveError::TransportLoadFailure(format!(
                "unsupported scheme `{scheme}`"
            ))),
        }
    }

    async fn download(&self, url: &Url) -> Result<(), ResolveError> {
        tracing::trace!("Loading artwork from `{}`", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| ResolveError::transport(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::TransportLoadFailure(format!(
                "unexpected status code {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !content_type.starts_with("image/") {
            return Err(ResolveError::TransportLoadFailure(format!(
                "unexpected content type `{content_type}`"
            )));
        }

        response
            .bytes()
            .await
            .map_err(|err| ResolveError::transport(&err))?;
        Ok(())
    }
}

/// Renders the identifier of `controller` until its display settles.
///
/// Every URL the controller displays is loaded through `probe` and the outcome is reported
/// back. Returns the final state, which is either [`ResolutionState::Resolved`] with a URL that
/// loaded, [`ResolutionState::Exhausted`], or [`ResolutionState::Idle`] if no identifier was
/// assigned.
pub async fn render(controller: &ResolutionController, probe: &ImageProbe) -> ResolutionState {
    let mut changes = controller.subscribe();
    let mut loaded: Option<Url> = None;

    loop {
        changes.borrow_and_update();
        let state = controller.current_display_state();

        match &state {
            ResolutionState::Idle | ResolutionState::Exhausted => return state,
            ResolutionState::Resolved(url) if loaded.as_ref() == Some(url) => {
                return state.clone();
            }
            ResolutionState::Resolving(Some(url)) | ResolutionState::Resolved(url)
                if loaded.as_ref() != Some(url) =>
            {
                match probe.load(url).await {
                    Ok(()) => {
                        controller.report_load_success(url);
                        loaded = Some(url.clone());
                    }
                    Err(error) => {
                        tracing::debug!(%url, %error, "Failed to load artwork");
                        controller.report_load_failure(url);
                    }
                }
                continue;
            }
            // Nothing new to show until the resolution progresses.
            ResolutionState::Resolving(_) | ResolutionState::Resolved(_) => {}
        }

        if changes.changed().await.is_err() {
            return controller.current_display_state();
        }
    }
}
