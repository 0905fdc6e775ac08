use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::{BucketError, ObjectMetadata, ObjectStore, ObjectStream, ObjectSummary};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    metadata: ObjectMetadata,
    last_modified: DateTime<Utc>,
}

/// In-process object store. Buckets must be created before use, mirroring S3 where writes
/// to a missing bucket fail.
type Buckets = HashMap<String, BTreeMap<String, StoredObject>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    buckets: Arc<RwLock<Buckets>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buckets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for name in names {
            store.create_bucket(name);
        }
        store
    }

    pub fn create_bucket(&self, name: impl Into<String>) {
        self.write().entry(name.into()).or_default();
    }

    // Mutations are single map operations, so a poisoned lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, Buckets> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keys currently held by `bucket`, in key order.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.read()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn metadata(&self, bucket: &str, key: &str) -> Option<(String, ObjectMetadata)> {
        let buckets = self.read();
        let object = buckets.get(bucket)?.get(key)?;
        Some((object.content_type.clone(), object.metadata.clone()))
    }

    fn snapshot(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, BucketError> {
        let buckets = self.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| BucketError::NotFound(format!("bucket {bucket}")))?;

        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                last_modified: Some(object.last_modified),
                size: object.data.len() as u64,
            })
            .collect())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn list<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> ObjectStream<'a> {
        match self.snapshot(bucket, prefix) {
            Ok(summaries) => stream::iter(summaries.into_iter().map(Ok)).boxed(),
            Err(err) => stream::once(async move { Err::<ObjectSummary, _>(err) }).boxed(),
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError> {
        let buckets = self.read();
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.clone())
            .ok_or_else(|| BucketError::NotFound(format!("{bucket}/{key}")))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), BucketError> {
        let mut buckets = self.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| BucketError::NotFound(format!("bucket {bucket}")))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data: bytes,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn probe(&self, bucket: &str) -> Result<(), BucketError> {
        let buckets = self.read();
        if buckets.contains_key(bucket) {
            Ok(())
        } else {
            Err(BucketError::NotFound(format!("bucket {bucket}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn list_is_prefix_scoped_and_ordered() {
        let store = MemoryObjectStore::with_buckets(["landing"]);
        let meta = ObjectMetadata::new();
        for key in ["US/STN02/a.csv", "US/STN01/b.csv", "US/STN01/a.csv", "US/STN010/c.csv"] {
            store
                .put_object("landing", key, Bytes::from_static(b"x"), "text/csv", &meta)
                .await
                .unwrap();
        }

        let keys: Vec<String> = store
            .list("landing", "US/STN01/")
            .map_ok(|summary| summary.key)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(keys, vec!["US/STN01/a.csv", "US/STN01/b.csv"]);
    }

    #[tokio::test]
    async fn missing_bucket_is_reported() {
        let store = MemoryObjectStore::new();
        let err = store.get_object("builds", "k").await.unwrap_err();
        assert!(matches!(err, BucketError::NotFound(_)));

        let listed: Result<Vec<_>, _> = store.list("builds", "").try_collect().await;
        assert!(listed.is_err());
        assert!(store.probe("builds").await.is_err());
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let store = MemoryObjectStore::with_buckets(["builds"]);
        let meta = ObjectMetadata::new();
        store
            .put_object("builds", "k", Bytes::from_static(b"first"), "text/csv", &meta)
            .await
            .unwrap();
        store
            .put_object("builds", "k", Bytes::from_static(b"second"), "text/csv", &meta)
            .await
            .unwrap();

        assert_eq!(store.get_object("builds", "k").await.unwrap(), Bytes::from_static(b"second"));
        assert_eq!(store.keys("builds").len(), 1);
    }

    #[tokio::test]
    async fn poisoned_lock_does_not_hide_new_buckets() {
        let store = MemoryObjectStore::new();
        let shared = Arc::clone(&store.buckets);
        let _ = std::thread::spawn(move || {
            let _guard = shared.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(store.buckets.is_poisoned());

        store.create_bucket("builds");
        store
            .put_object("builds", "k", Bytes::from_static(b"v"), "text/csv", &ObjectMetadata::new())
            .await
            .unwrap();

        assert_eq!(store.keys("builds"), vec!["k"]);
        assert!(store.probe("builds").await.is_ok());
    }
}
