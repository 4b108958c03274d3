//! Fetching generated videos to local files

use crate::error::VeoError;
use crate::provider::ensure_success;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use veo_types::{VeoConfig, VideoUri};

const GCS_API_BASE: &str = "https://storage.googleapis.com";

/// Downloads a video URI of any supported scheme to a local path
#[derive(Debug, Clone)]
pub struct VideoFetcher {
    client: Client,
    gcs_base_url: String,
    gcs_access_token: Option<String>,
    /// Host of the generation API; its download links need the API key
    api_host: Option<String>,
    api_key: String,
}

impl VideoFetcher {
    pub fn new(client: Client, config: &VeoConfig) -> Self {
        Self {
            client,
            gcs_base_url: GCS_API_BASE.to_string(),
            gcs_access_token: config.gcs_access_token.clone(),
            api_host: url::Url::parse(&config.api_base_url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string)),
            api_key: config.api_key.clone(),
        }
    }

    pub fn with_gcs_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.gcs_base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Save `uri` to `local_path`, returning the number of bytes written
    pub async fn download(&self, uri: &str, local_path: &Path) -> Result<u64, VeoError> {
        let parsed = VideoUri::parse(uri)?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = match parsed {
            VideoUri::File(source) => self.copy_local(&source, local_path).await?,
            VideoUri::Gcs { bucket, object } => {
                let url = format!(
                    "{}/storage/v1/b/{}/o/{}?alt=media",
                    self.gcs_base_url,
                    urlencoding::encode(&bucket),
                    urlencoding::encode(&object)
                );
                let mut request = self.client.get(&url);
                if let Some(token) = &self.gcs_access_token {
                    request = request.bearer_auth(token);
                }
                self.stream_to_file(request, local_path).await?
            }
            VideoUri::Http(url) => {
                let mut request = self.client.get(url.as_str());
                if !self.api_key.is_empty() && url.host_str() == self.api_host.as_deref() {
                    request = request.header("x-goog-api-key", &self.api_key);
                }
                self.stream_to_file(request, local_path).await?
            }
        };

        info!("Downloaded {} to {} ({} bytes)", uri, local_path.display(), bytes);
        Ok(bytes)
    }

    async fn copy_local(&self, source: &Path, target: &Path) -> Result<u64, VeoError> {
        if !tokio::fs::try_exists(source).await? {
            return Err(VeoError::NotFound(source.display().to_string()));
        }
        if let (Ok(a), Ok(b)) = (
            tokio::fs::canonicalize(source).await,
            tokio::fs::canonicalize(target).await,
        ) {
            if a == b {
                debug!("{} is already in place", target.display());
                return Ok(tokio::fs::metadata(target).await?.len());
            }
        }
        Ok(tokio::fs::copy(source, target).await?)
    }

    async fn stream_to_file(&self, request: RequestBuilder, path: &Path) -> Result<u64, VeoError> {
        let response = ensure_success(request.send().await?).await?;
        let mut file = File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(config: &VeoConfig) -> VideoFetcher {
        VideoFetcher::new(Client::new(), config)
    }

    #[tokio::test]
    async fn test_copies_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mp4");
        std::fs::write(&source, b"video-bytes").unwrap();
        let target = dir.path().join("nested/out.mp4");

        let bytes = assert_ok!(
            fetcher(&VeoConfig::default())
                .download(&VideoUri::from_path(&source), &target)
                .await
        );

        assert_eq!(bytes, 11);
        assert_eq!(std::fs::read(&target).unwrap(), b"video-bytes");
    }

    #[tokio::test]
    async fn test_missing_local_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = assert_err!(
            fetcher(&VeoConfig::default())
                .download("file:///definitely/not/here.mp4", &dir.path().join("out.mp4"))
                .await
        );
        assert!(matches!(err, VeoError::NotFound(_)));
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[tokio::test]
    async fn test_downloads_from_gcs_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/my-bucket/o/videos%2Fclip.mp4"))
            .and(query_param("alt", "media"))
            .and(header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"gcs-video".to_vec()))
            .mount(&server)
            .await;

        let config = VeoConfig {
            gcs_access_token: Some("token-123".to_string()),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");

        let bytes = fetcher(&config)
            .with_gcs_base_url(server.uri())
            .download("gs://my-bucket/videos/clip.mp4", &target)
            .await
            .unwrap();

        assert_eq!(bytes, 9);
        assert_eq!(std::fs::read(&target).unwrap(), b"gcs-video");
    }

    #[tokio::test]
    async fn test_http_download_sends_api_key_to_api_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/abc:download"))
            .and(header("x-goog-api-key", "key-1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"api-video".to_vec()))
            .mount(&server)
            .await;

        let config = VeoConfig {
            api_key: "key-1".to_string(),
            api_base_url: server.uri(),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");

        assert_ok!(
            fetcher(&config)
                .download(&format!("{}/v1beta/files/abc:download", server.uri()), &target)
                .await
        );
        assert_eq!(std::fs::read(&target).unwrap(), b"api-video");
    }

    #[tokio::test]
    async fn test_http_error_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");
        let err = fetcher(&VeoConfig::default())
            .download(&format!("{}/clip.mp4", server.uri()), &target)
            .await
            .unwrap_err();

        assert!(matches!(err, VeoError::Api { status: 403, .. }));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let err = assert_err!(
            fetcher(&VeoConfig::default())
                .download("ftp://host/clip.mp4", &dir.path().join("clip.mp4"))
                .await
        );
        assert!(matches!(err, VeoError::Validation(_)));
    }
}
