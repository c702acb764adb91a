mod local;
mod s3;
mod transfer;
mod url;

use std::{fmt::Debug, path::Path, sync::Arc};

use async_trait::async_trait;

use crate::error::Result;

pub use self::{local::LocalRemote, s3::S3Remote, transfer::TransferCommand, url::RemoteUrl};

pub type SharedRemote = Arc<dyn Remote + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageClass {
    /// Hot storage, immediately readable.
    Standard,
    /// Cold storage for objects that are not expected to change again.
    Archived,
}

/// Object storage that backups are uploaded to. Keys are file identities.
#[async_trait]
pub trait Remote: Debug {
    /// Storage class of the object at `key`, or `None` if there is no object.
    async fn head(&self, key: &str) -> Result<Option<StorageClass>>;

    /// Succeeds only once the transfer reports completion.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()>;

    /// No-op when the object is already in `class`.
    async fn reclassify(&self, key: &str, class: StorageClass) -> Result<()>;

    async fn delete_if_exists(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key).await?.is_some())
    }
}
