use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;

use crate::config::StorageConfig;

/// Binary object storage split into buckets.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> anyhow::Result<()>;
    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()>;
    fn public_url(&self, bucket: &str, key: &str) -> String;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    public_base: String,
}

impl Storage {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            public_base: cfg.public_url.clone(),
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {}/{}", bucket, key))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("s3 delete_object {}/{}", bucket, key))?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        public_url(&self.public_base, bucket, key)
    }
}

pub(crate) fn public_url(base: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key)
}

#[cfg(test)]
mod tests {
    #[test]
    fn public_url_joins_without_double_slash() {
        assert_eq!(
            super::public_url("http://minio:9000/", "avatars", "profiles/u/1_a.png"),
            "http://minio:9000/avatars/profiles/u/1_a.png"
        );
        assert_eq!(
            super::public_url("https://cdn.example", "food_images", "k.jpg"),
            "https://cdn.example/food_images/k.jpg"
        );
    }
}
