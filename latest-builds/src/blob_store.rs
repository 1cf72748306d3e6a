/// Blob storage for the raw spreadsheet snapshot and the derived document.
/// Every backend overwrites on store and never versions; the last writer wins.
use async_trait::async_trait;
use bytes::Bytes;
use google_cloud_storage::client::{Client as GcsClient, ClientConfig};
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use parking_lot::RwLock;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum BlobError {
    #[error("blob {container}/{name} not found")]
    NotFound { container: String, name: String },

    #[error("invalid blob name: {0:?}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),

    #[error("invalid account URL: {0}")]
    InvalidUrl(String),

    #[error("gcs error: {0}")]
    Gcs(String),
}

impl BlobError {
    fn not_found(container: &str, name: &str) -> Self {
        BlobError::NotFound {
            container: container.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Creates or overwrites `container/name`.
    async fn store(&self, container: &str, name: &str, data: Bytes) -> Result<(), BlobError>;

    /// Returns the full contents of `container/name`.
    async fn retrieve(&self, container: &str, name: &str) -> Result<Bytes, BlobError>;
}

/// Stores blobs as `<base_dir>/<container>/<name>`.
pub struct FilesystemBlobStore {
    base_dir: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        FilesystemBlobStore {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, container: &str, name: &str) -> Result<PathBuf, BlobError> {
        for part in [container, name] {
            if part.is_empty()
                || part == "."
                || part == ".."
                || part.contains(['/', '\\'])
            {
                return Err(BlobError::InvalidName(part.to_string()));
            }
        }
        Ok(self.base_dir.join(container).join(name))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn store(&self, container: &str, name: &str, data: Bytes) -> Result<(), BlobError> {
        let path = self.path(container, name)?;
        let dir = self.base_dir.join(container);
        tokio::fs::create_dir_all(&dir).await?;

        // Write then rename so readers never observe a partial blob.
        let tmp = dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(path = %path.display(), bytes = data.len(), "stored blob");
        Ok(())
    }

    async fn retrieve(&self, container: &str, name: &str) -> Result<Bytes, BlobError> {
        let path = self.path(container, name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BlobError::not_found(container, name))
            }
            Err(e) => Err(e.into()),
        }
    }
}

const AZURE_API_VERSION: &str = "2021-08-06";

/// Azure Blob Storage addressed through an account URL that carries a SAS
/// token in its query string, e.g. `https://acct.blob.core.windows.net/?sv=...`.
pub struct AzureBlobStore {
    client: reqwest::Client,
    account_url: Url,
}

impl AzureBlobStore {
    pub fn new(account_url: &str) -> Result<Self, BlobError> {
        let account_url =
            Url::parse(account_url).map_err(|e| BlobError::InvalidUrl(e.to_string()))?;
        if account_url.cannot_be_a_base() {
            return Err(BlobError::InvalidUrl(account_url.to_string()));
        }

        Ok(AzureBlobStore {
            client: reqwest::Client::new(),
            account_url,
        })
    }

    fn blob_url(&self, container: &str, name: &str) -> Result<Url, BlobError> {
        let mut url = self.account_url.clone();
        url.path_segments_mut()
            .map_err(|_| BlobError::InvalidUrl(self.account_url.to_string()))?
            .pop_if_empty()
            .push(container)
            .push(name);
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn store(&self, container: &str, name: &str, data: Bytes) -> Result<(), BlobError> {
        let response = self
            .client
            .put(self.blob_url(container, name)?)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", AZURE_API_VERSION)
            .body(data)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BlobError::UnexpectedStatus(response.status()));
        }
        Ok(())
    }

    async fn retrieve(&self, container: &str, name: &str) -> Result<Bytes, BlobError> {
        let response = self
            .client
            .get(self.blob_url(container, name)?)
            .header("x-ms-version", AZURE_API_VERSION)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.bytes().await?),
            StatusCode::NOT_FOUND => Err(BlobError::not_found(container, name)),
            status => Err(BlobError::UnexpectedStatus(status)),
        }
    }
}

/// Google Cloud Storage. The container is the bucket and the name is the
/// object. Credentials come from application default credentials.
pub struct GcsBlobStore {
    client: GcsClient,
}

impl GcsBlobStore {
    pub async fn new() -> Result<Self, BlobError> {
        let config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| BlobError::Gcs(e.to_string()))?;

        Ok(GcsBlobStore {
            client: GcsClient::new(config),
        })
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn store(&self, container: &str, name: &str, data: Bytes) -> Result<(), BlobError> {
        let request = UploadObjectRequest {
            bucket: container.to_string(),
            ..Default::default()
        };
        let upload_type = UploadType::Simple(Media::new(name.to_string()));

        self.client
            .upload_object(&request, data.to_vec(), &upload_type)
            .await
            .map_err(|e| BlobError::Gcs(e.to_string()))?;
        Ok(())
    }

    async fn retrieve(&self, container: &str, name: &str) -> Result<Bytes, BlobError> {
        let request = GetObjectRequest {
            bucket: container.to_string(),
            object: name.to_string(),
            ..Default::default()
        };

        match self.client.download_object(&request, &Range::default()).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(google_cloud_storage::http::Error::Response(e)) if e.code == 404 => {
                Err(BlobError::not_found(container, name))
            }
            Err(e) => Err(BlobError::Gcs(e.to_string())),
        }
    }
}

/// In-process store used by tests and dry runs. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, container: &str, name: &str, data: Bytes) -> Result<(), BlobError> {
        self.blobs
            .write()
            .insert((container.to_string(), name.to_string()), data);
        Ok(())
    }

    async fn retrieve(&self, container: &str, name: &str) -> Result<Bytes, BlobError> {
        self.blobs
            .read()
            .get(&(container.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| BlobError::not_found(container, name))
    }
}
