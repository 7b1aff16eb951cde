use std::path::PathBuf;

use crate::error::NotifyError;

/// A downloaded attachment, ready to embed in a MIME message.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, bucket: &str, key: &str) -> Result<StoredObject, NotifyError>;
}

/// Object store laid out on the local filesystem: one directory per bucket.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn content_type_of(key: &str) -> &'static str {
        match key.rsplit('.').next() {
            Some("pdf") => "application/pdf",
            Some("html") => "text/html",
            Some("txt") => "text/plain",
            Some("png") => "image/png",
            _ => "application/octet-stream",
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<StoredObject, NotifyError> {
        let path = self.root.join(bucket).join(key);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| NotifyError::Attachment {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: err.to_string(),
            })?;

        let filename = key.rsplit('/').next().unwrap_or(key).to_string();

        Ok(StoredObject {
            filename,
            content_type: Self::content_type_of(key).to_string(),
            bytes,
        })
    }
}
