use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs;

use crate::error::{Error, Result};

use super::{Remote, StorageClass};

const STANDARD_DIR: &str = "standard";
const ARCHIVED_DIR: &str = "archived";

/// Remote backed by a local directory; each storage class is a subdirectory.
#[derive(Debug)]
pub struct LocalRemote {
    path: PathBuf,
}

impl LocalRemote {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        LocalRemote { path: path.into() }
    }

    fn object_path(&self, key: &str, class: StorageClass) -> PathBuf {
        let class_dir = match class {
            StorageClass::Standard => STANDARD_DIR,
            StorageClass::Archived => ARCHIVED_DIR,
        };
        self.path.join(class_dir).join(key)
    }
}

#[async_trait]
impl Remote for LocalRemote {
    async fn head(&self, key: &str) -> Result<Option<StorageClass>> {
        for class in [StorageClass::Archived, StorageClass::Standard] {
            if fs::try_exists(self.object_path(key, class)).await? {
                return Ok(Some(class));
            }
        }

        Ok(None)
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let path = self.object_path(key, StorageClass::Standard);
        create_parent_dir(&path).await?;
        fs::copy(local_path, &path).await?;
        Ok(())
    }

    async fn reclassify(&self, key: &str, class: StorageClass) -> Result<()> {
        let current = self
            .head(key)
            .await?
            .ok_or_else(|| Error::ItemNotFound(key.to_owned()))?;
        if current == class {
            return Ok(());
        }

        let target = self.object_path(key, class);
        create_parent_dir(&target).await?;
        fs::rename(self.object_path(key, current), target).await?;
        Ok(())
    }

    async fn delete_if_exists(&self, key: &str) -> Result<()> {
        for class in [StorageClass::Standard, StorageClass::Archived] {
            match fs::remove_file(self.object_path(key, class)).await {
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                result => result,
            }?;
        }

        Ok(())
    }
}

async fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    Ok(())
}
