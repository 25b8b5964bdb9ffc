use std::time::Duration;

use async_trait::async_trait;

use amora_shared::clients::minio::MinioClient;

use crate::ports::*;

#[derive(Clone)]
pub struct MinioSigner {
    minio: MinioClient,
}

impl MinioSigner {
    pub fn new(minio: MinioClient) -> Self {
        Self { minio }
    }
}

#[async_trait]
impl StorageSigner for MinioSigner {
    async fn sign_upload(
        &self,
        key: &str,
        content_type: &str,
        content_length: i64,
        expiry: Duration,
    ) -> Result<String, PortError> {
        self.minio
            .presigned_put(key, content_type, content_length, expiry.as_secs())
            .await
            .map_err(PortError::Unavailable)
    }

    async fn sign_download(&self, key: &str, expiry: Duration) -> Result<String, PortError> {
        self.minio
            .presigned_get(key, expiry.as_secs())
            .await
            .map_err(PortError::Unavailable)
    }

    async fn delete_object(&self, key: &str) -> Result<(), PortError> {
        self.minio.delete(key).await.map_err(PortError::Unavailable)
    }
}
