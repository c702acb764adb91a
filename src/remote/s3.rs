use std::{path::Path, time::Duration};

use async_trait::async_trait;
use aws_sdk_s3::{
    error::SdkError,
    operation::head_object::HeadObjectError,
    presigning::PresigningConfig,
    types::{MetadataDirective, StorageClass as S3StorageClass},
    Client,
};
use log::debug;

use crate::error::{Error, Result};

use super::{Remote, StorageClass, TransferCommand};

/// S3 (or S3-compatible) bucket. Object metadata goes through the SDK; file
/// bytes go through the external transfer command with a presigned URL.
#[derive(Debug)]
pub struct S3Remote {
    client: Client,
    bucket: String,
    transfer: TransferCommand,
    grant_ttl: Duration,
}

impl S3Remote {
    pub async fn new(
        endpoint: Option<String>,
        bucket: String,
        transfer: TransferCommand,
        grant_ttl: Duration,
    ) -> Self {
        let sdk_config = aws_config::load_from_env().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        S3Remote {
            client,
            bucket,
            transfer,
            grant_ttl,
        }
    }

    fn copy_source(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, urlencoding::encode(key))
    }
}

#[async_trait]
impl Remote for S3Remote {
    async fn head(&self, key: &str) -> Result<Option<StorageClass>> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(SdkError::into_service_error);

        match response {
            Ok(output) => Ok(Some(storage_class(output.storage_class()))),
            Err(HeadObjectError::NotFound(_)) => Ok(None),
            Err(err) => Err(Error::other(err)),
        }
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let presigning_config = PresigningConfig::expires_in(self.grant_ttl)?;
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await?;

        self.transfer.run(local_path, request.uri()).await
    }

    async fn reclassify(&self, key: &str, class: StorageClass) -> Result<()> {
        match self.head(key).await? {
            Some(current) if current == class => return Ok(()),
            Some(_) => {}
            None => return Err(Error::ItemNotFound(key.to_owned())),
        }

        debug!("changing storage class of {key} to {class:?}");
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(key)
            .copy_source(self.copy_source(key))
            .metadata_directive(MetadataDirective::Copy)
            .storage_class(s3_storage_class(class))
            .send()
            .await?;
        Ok(())
    }

    async fn delete_if_exists(&self, key: &str) -> Result<()> {
        // DeleteObject succeeds for missing keys.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }
}

fn storage_class(class: Option<&S3StorageClass>) -> StorageClass {
    match class {
        Some(S3StorageClass::DeepArchive | S3StorageClass::Glacier) => StorageClass::Archived,
        _ => StorageClass::Standard,
    }
}

fn s3_storage_class(class: StorageClass) -> S3StorageClass {
    match class {
        StorageClass::Standard => S3StorageClass::Standard,
        StorageClass::Archived => S3StorageClass::DeepArchive,
    }
}
