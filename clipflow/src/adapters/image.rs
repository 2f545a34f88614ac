//! Face image sources.

use super::{ImageRequest, ImageSource};
use crate::errors::StageError;
use async_trait::async_trait;
use std::path::PathBuf;

/// Returns a configured image from disk.
#[derive(Debug, Clone, Default)]
pub struct StaticImageSource {
    path: Option<PathBuf>,
}

impl StaticImageSource {
    /// Creates a source for `path`.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn acquire_image(&self, _request: &ImageRequest<'_>) -> Result<PathBuf, StageError> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| StageError::configuration("no avatar image configured"))?;

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(path.clone()),
            _ => Err(StageError::permanent(format!(
                "avatar image not found: {}",
                path.display()
            ))),
        }
    }
}

#[cfg(feature = "stock-images")]
pub use pexels::PexelsImageSource;

#[cfg(feature = "stock-images")]
mod pexels {
    use super::{ImageRequest, ImageSource, StageError};
    use crate::config::VisualConfig;
    use async_trait::async_trait;
    use reqwest::{Client, StatusCode};
    use serde::Deserialize;
    use std::path::PathBuf;
    use std::time::Duration;
    use tracing::{debug, info};

    #[derive(Debug, Deserialize)]
    struct SearchResponse {
        #[serde(default)]
        photos: Vec<Photo>,
    }

    #[derive(Debug, Deserialize)]
    struct Photo {
        src: PhotoSources,
    }

    #[derive(Debug, Deserialize)]
    struct PhotoSources {
        large: String,
    }

    /// Searches Pexels for a stock photo matching the topic and downloads it.
    #[derive(Clone)]
    pub struct PexelsImageSource {
        client: Client,
        api_key: Option<String>,
        base_url: String,
        orientation: String,
    }

    impl std::fmt::Debug for PexelsImageSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PexelsImageSource")
                .field("base_url", &self.base_url)
                .field("orientation", &self.orientation)
                .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
                .finish()
        }
    }

    impl PexelsImageSource {
        /// Creates a source from the visual settings.
        ///
        /// # Errors
        ///
        /// `Configuration` if the HTTP client cannot be built.
        pub fn new(config: &VisualConfig) -> Result<Self, StageError> {
            let client = Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .map_err(|e| StageError::configuration(format!("cannot build HTTP client: {e}")))?;

            Ok(Self {
                client,
                api_key: config.pexels_api_key.clone().filter(|k| !k.trim().is_empty()),
                base_url: config.pexels_base_url.trim_end_matches('/').to_string(),
                orientation: config.orientation.clone(),
            })
        }

        async fn search(&self, api_key: &str, query: &str) -> Result<String, StageError> {
            let url = format!("{}/v1/search", self.base_url);
            debug!(query, orientation = %self.orientation, "searching pexels");

            let response = self
                .client
                .get(&url)
                .header("Authorization", api_key)
                .query(&[
                    ("query", query),
                    ("orientation", self.orientation.as_str()),
                    ("size", "large"),
                    ("per_page", "1"),
                ])
                .send()
                .await
                .map_err(request_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(status_error(status));
            }

            let parsed: SearchResponse = response
                .json()
                .await
                .map_err(|e| StageError::permanent(format!("unreadable pexels response: {e}")))?;

            parsed
                .photos
                .into_iter()
                .next()
                .map(|photo| photo.src.large)
                .ok_or_else(|| StageError::permanent(format!("no stock image for '{query}'")))
        }

        async fn download(&self, url: &str, output: &std::path::Path) -> Result<(), StageError> {
            let response = self.client.get(url).send().await.map_err(request_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(status_error(status));
            }
            let bytes = response.bytes().await.map_err(request_error)?;
            if bytes.is_empty() {
                return Err(StageError::permanent("pexels returned an empty image"));
            }

            tokio::fs::write(output, &bytes).await.map_err(|e| {
                StageError::permanent(format!("cannot write {}: {e}", output.display()))
            })
        }
    }

    #[async_trait]
    impl ImageSource for PexelsImageSource {
        async fn acquire_image(&self, request: &ImageRequest<'_>) -> Result<PathBuf, StageError> {
            let api_key = self
                .api_key
                .as_deref()
                .ok_or_else(|| StageError::configuration("PEXELS_API_KEY not set"))?;

            let image_url = self.search(api_key, request.topic).await?;

            tokio::fs::create_dir_all(request.output_dir).await.map_err(|e| {
                StageError::permanent(format!(
                    "cannot create {}: {e}",
                    request.output_dir.display()
                ))
            })?;
            let output = request.output_dir.join(format!("stock.{}", extension(&image_url)));
            self.download(&image_url, &output).await?;

            info!(path = %output.display(), "downloaded stock image");
            Ok(output)
        }
    }

    /// Picks the file extension from an image URL, ignoring the query.
    fn extension(url: &str) -> &str {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        match path.rsplit_once('.') {
            Some((_, ext)) if matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "webp") => ext,
            _ => "jpg",
        }
    }

    fn request_error(e: reqwest::Error) -> StageError {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            StageError::transient(format!("pexels request failed: {e}"))
        } else {
            StageError::permanent(format!("pexels request failed: {e}"))
        }
    }

    fn status_error(status: StatusCode) -> StageError {
        let message = format!("pexels returned {status}");
        match status.as_u16() {
            429 | 500..=599 => StageError::transient(message),
            401 | 403 => StageError::configuration(message),
            _ => StageError::permanent(message),
        }
    }

}
