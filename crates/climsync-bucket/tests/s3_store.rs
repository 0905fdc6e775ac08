use anyhow::{Context, Result};
use bytes::Bytes;
use climsync_bucket::{BucketGateway, ObjectMetadata, S3Config, S3ObjectStore};
use futures::TryStreamExt;
use std::sync::Arc;
use uuid::Uuid;

const REQUIRED_VARS: &[&str] = &[
    "CLIMSYNC_TEST_S3_BUCKET",
    "CLIMSYNC_TEST_S3_ENDPOINT",
    "CLIMSYNC_TEST_S3_ACCESS_KEY_ID",
    "CLIMSYNC_TEST_S3_SECRET_ACCESS_KEY",
];

#[tokio::test]
async fn s3_store_put_list_get() -> Result<()> {
    let Some(config) = S3TestConfig::from_env() else {
        eprintln!(
            "Skipping S3 object store test; set {} to enable",
            REQUIRED_VARS.join(", ")
        );
        return Ok(());
    };

    let store = S3ObjectStore::new(S3Config {
        region: config.region.unwrap_or_else(|| "us-east-1".to_string()),
        endpoint: Some(config.endpoint),
        access_key_id: Some(config.access_key_id),
        secret_access_key: Some(config.secret_access_key),
        force_path_style: true,
    })
    .await
    .context("failed to build S3 object store")?;

    let gateway = BucketGateway::new(Arc::new(store), [config.bucket.clone()]);
    let bucket = gateway.bucket(&config.bucket)?;
    bucket.probe().await.context("bucket probe failed")?;

    let prefix = format!("climsync-it/{}/", Uuid::new_v4());
    let key = format!("{prefix}data.csv");
    let mut metadata = ObjectMetadata::new();
    metadata.insert("source-script".into(), "integration".into());

    bucket
        .put(&key, Bytes::from_static(b"a,b\n1,2\n"), "text/csv", &metadata)
        .await
        .context("upload to S3 failed")?;

    let listed: Vec<String> = bucket
        .list(&prefix)
        .map_ok(|summary| summary.key)
        .try_collect()
        .await
        .context("list prefix failed")?;
    assert_eq!(listed, vec![key.clone()]);

    let body = bucket.get(&key).await.context("download failed")?;
    assert_eq!(body, Bytes::from_static(b"a,b\n1,2\n"));

    Ok(())
}

struct S3TestConfig {
    bucket: String,
    region: Option<String>,
    endpoint: String,
    access_key_id: String,
    secret_access_key: String,
}

impl S3TestConfig {
    fn from_env() -> Option<Self> {
        for &var in REQUIRED_VARS {
            if std::env::var(var)
                .ok()
                .filter(|value| !value.is_empty())
                .is_none()
            {
                return None;
            }
        }

        Some(Self {
            bucket: std::env::var("CLIMSYNC_TEST_S3_BUCKET").ok()?,
            region: std::env::var("CLIMSYNC_TEST_S3_REGION").ok(),
            endpoint: std::env::var("CLIMSYNC_TEST_S3_ENDPOINT").ok()?,
            access_key_id: std::env::var("CLIMSYNC_TEST_S3_ACCESS_KEY_ID").ok()?,
            secret_access_key: std::env::var("CLIMSYNC_TEST_S3_SECRET_ACCESS_KEY").ok()?,
        })
    }
}
