use crate::traits::ObjectStorage;
use crate::IngestError;
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use url::Url;

fn resolve_bucket<'a>(bucket: Option<&'a str>, default_bucket: &'a str) -> &'a str {
    bucket
        .map(str::trim)
        .filter(|bucket| !bucket.is_empty())
        .unwrap_or(default_bucket)
}

/// Path-style object storage over HTTP (`{endpoint}/{bucket}/{path}`).
pub struct HttpObjectStorage {
    endpoint: Url,
    default_bucket: String,
    client: Client,
}

impl HttpObjectStorage {
    pub fn new(endpoint: &str, default_bucket: impl Into<String>) -> Result<Self, IngestError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            default_bucket: default_bucket.into(),
            client: Client::new(),
        })
    }

    fn object_url(&self, bucket: &str, path: &str) -> Result<Url, IngestError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                IngestError::InvalidArgument(format!("{} cannot be a base", self.endpoint))
            })?
            .pop_if_empty()
            .push(bucket)
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn fetch(&self, bucket: Option<&str>, path: &str) -> Result<Vec<u8>, IngestError> {
        let bucket = resolve_bucket(bucket, &self.default_bucket);
        let url = self.object_url(bucket, path)?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(IngestError::Storage {
                path: format!("{bucket}/{path}"),
                details: response.status().to_string(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Buckets as sub-directories of a local root.
pub struct FsObjectStorage {
    root: PathBuf,
    default_bucket: String,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>, default_bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            default_bucket: default_bucket.into(),
        }
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, IngestError> {
        let relative = Path::new(bucket).join(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(IngestError::InvalidArgument(format!(
                "object path escapes the storage root: {}",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn fetch(&self, bucket: Option<&str>, path: &str) -> Result<Vec<u8>, IngestError> {
        let bucket = resolve_bucket(bucket, &self.default_bucket);
        let object = self.object_path(bucket, path)?;

        tokio::fs::read(&object)
            .await
            .map_err(|error| IngestError::Storage {
                path: object.display().to_string(),
                details: error.to_string(),
            })
    }
}
