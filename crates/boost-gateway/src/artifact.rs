//! Download-once cache for model artifacts.

use async_trait::async_trait;
use boost_kernel::{ArtifactError, ArtifactFetcher};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// [`ArtifactFetcher`] that keeps each artifact under `data_dir`, named
/// after the last segment of its URL.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    data_dir: PathBuf,
    client: Client,
}

impl ArtifactCache {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            client: Client::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Where `url` is (or would be) cached.
    pub fn path_for(&self, url: &str) -> Result<PathBuf, ArtifactError> {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);
        let file_name = without_query
            .split_once("://")
            .map(|(_, rest)| rest)
            .and_then(|rest| rest.split_once('/'))
            .and_then(|(_, path)| path.rsplit('/').next())
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .ok_or_else(|| ArtifactError::InvalidUrl(url.to_string()))?;
        Ok(self.data_dir.join(file_name))
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), ArtifactError> {
        let download_error = |reason: String| ArtifactError::Download {
            url: url.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(download_error(format!("status {}", resp.status())));
        }
        let bytes = resp.bytes().await.map_err(|e| download_error(e.to_string()))?;

        tokio::fs::create_dir_all(&self.data_dir).await?;
        let partial = target.with_extension("part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, target).await?;
        info!(url = %url, path = %target.display(), bytes = bytes.len(), "artifact downloaded");
        Ok(())
    }
}

#[async_trait]
impl ArtifactFetcher for ArtifactCache {
    async fn fetch(&self, url: &str) -> Result<PathBuf, ArtifactError> {
        let target = self.path_for(url)?;
        if tokio::fs::try_exists(&target).await? {
            debug!(path = %target.display(), "artifact already cached");
            return Ok(target);
        }
        self.download(url, &target).await?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cache_path_uses_last_url_segment() {
        let cache = ArtifactCache::new("/data");
        assert_eq!(
            cache
                .path_for("https://storage.example.com/models/bert.tar.gz?x=1")
                .unwrap(),
            PathBuf::from("/data/bert.tar.gz")
        );
        assert!(matches!(
            cache.path_for("https://example.com"),
            Err(ArtifactError::InvalidUrl(_))
        ));
        assert!(cache.path_for("https://example.com/").is_err());
        assert!(cache.path_for("not a url").is_err());
    }

    #[tokio::test]
    async fn cached_artifact_is_not_downloaded_again() {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let cached = dir.path().join("model.bin");
        std::fs::write(&cached, b"weights").unwrap();

        // The host does not resolve; a download attempt would fail.
        let path = cache.fetch("http://artifacts.invalid/model.bin").await.unwrap();
        assert_eq!(path, cached);
    }

    #[tokio::test]
    async fn downloads_into_data_dir() {
        use axum::{Router, routing::get};

        let app = Router::new().route("/files/model.bin", get(|| async { "weights" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(dir.path().join("nested"));
        let path = cache.fetch(&format!("http://{addr}/files/model.bin")).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"weights");

        let missing = cache.fetch(&format!("http://{addr}/files/other.bin")).await;
        assert!(matches!(missing, Err(ArtifactError::Download { .. })));
    }
}
