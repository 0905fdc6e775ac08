use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::{BucketError, ObjectMetadata, ObjectStore, ObjectStream};

/// Hands out bucket handles, refusing any bucket outside the configured allow-list.
#[derive(Clone)]
pub struct BucketGateway {
    store: Arc<dyn ObjectStore>,
    allowed: Arc<BTreeSet<String>>,
}

impl BucketGateway {
    pub fn new<I, S>(store: Arc<dyn ObjectStore>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store,
            allowed: Arc::new(allowed.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.contains(name)
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    pub fn bucket(&self, name: &str) -> Result<Bucket, BucketError> {
        if !self.is_allowed(name) {
            return Err(BucketError::BucketNotAllowed(name.to_string()));
        }
        Ok(Bucket {
            store: Arc::clone(&self.store),
            name: name.to_string(),
        })
    }
}

/// A single allow-listed bucket.
#[derive(Clone)]
pub struct Bucket {
    store: Arc<dyn ObjectStore>,
    name: String,
}

impl Bucket {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn list<'a>(&'a self, prefix: &'a str) -> ObjectStream<'a> {
        self.store.list(&self.name, prefix)
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, BucketError> {
        self.store.get_object(&self.name, key).await
    }

    pub async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), BucketError> {
        self.store
            .put_object(&self.name, key, bytes, content_type, metadata)
            .await
    }

    pub async fn probe(&self) -> Result<(), BucketError> {
        self.store.probe(&self.name).await
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryObjectStore;

    #[test]
    fn rejects_buckets_outside_allow_list() {
        let store = Arc::new(MemoryObjectStore::with_buckets(["landing", "secrets"]));
        let gateway = BucketGateway::new(store, ["landing", "scripts", "builds"]);

        assert!(gateway.bucket("landing").is_ok());
        let err = gateway.bucket("secrets").unwrap_err();
        assert!(matches!(err, BucketError::BucketNotAllowed(ref name) if name == "secrets"));
        assert_eq!(err.to_string(), "Bucket 'secrets' not allowed");
    }

    #[tokio::test]
    async fn handle_reads_and_writes_its_own_bucket() {
        let store = Arc::new(MemoryObjectStore::with_buckets(["landing", "builds"]));
        let gateway = BucketGateway::new(store.clone(), ["landing", "builds"]);
        let builds = gateway.bucket("builds").unwrap();

        builds
            .put("a/b.csv", Bytes::from_static(b"1,2"), "text/csv", &ObjectMetadata::new())
            .await
            .unwrap();

        assert_eq!(store.keys("builds"), vec!["a/b.csv"]);
        assert!(store.keys("landing").is_empty());
        assert_eq!(builds.get("a/b.csv").await.unwrap(), Bytes::from_static(b"1,2"));
    }
}
