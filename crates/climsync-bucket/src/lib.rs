//! Abstractions over S3-compatible storage backends holding climsoft scripts, landing files
//! and build artifacts.

mod gateway;
mod memory;
mod s3;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

pub use gateway::{Bucket, BucketGateway};
pub use memory::MemoryObjectStore;
pub use s3::{S3Config, S3ObjectStore};

/// User-defined metadata attached to a stored object.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Lazily paged listing of the objects below a prefix.
pub type ObjectStream<'a> = BoxStream<'a, Result<ObjectSummary, BucketError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("Bucket '{0}' not allowed")]
    BucketNotAllowed(String),
}

impl BucketError {
    fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams every object under `prefix`. Calling it again restarts the scan.
    fn list<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> ObjectStream<'a>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), BucketError>;

    /// Cheap reachability check used by startup probes.
    async fn probe(&self, bucket: &str) -> Result<(), BucketError>;
}
