use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use climsync_bucket::{Bucket, ObjectMetadata};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::paths::artifact_key;
use crate::script::ScriptKey;

const ARTIFACT_CONTENT_TYPE: &str = "text/csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub region: String,
    pub station: String,
    pub timestamp: DateTime<Utc>,
    pub storage_key: String,
    pub source_script: ScriptKey,
    pub size_bytes: u64,
    pub content_hash: String,
}

pub struct ArtifactPublisher {
    bucket: Bucket,
}

impl ArtifactPublisher {
    pub fn new(bucket: Bucket) -> Self {
        Self { bucket }
    }

    /// Writes `content` under a timestamped key in the builds bucket. A second publish for
    /// the same station within the same UTC second replaces the first.
    pub async fn publish(
        &self,
        region: &str,
        station: &str,
        content: Bytes,
        source_script: &ScriptKey,
    ) -> Result<BuildArtifact> {
        self.publish_at(region, station, content, source_script, Utc::now())
            .await
    }

    pub(crate) async fn publish_at(
        &self,
        region: &str,
        station: &str,
        content: Bytes,
        source_script: &ScriptKey,
        now: DateTime<Utc>,
    ) -> Result<BuildArtifact> {
        let timestamp = now.trunc_subsecs(0);
        let storage_key = artifact_key(region, station, timestamp);
        let content_hash = blake3::hash(&content).to_hex().to_string();
        let size_bytes = content.len() as u64;

        let mut metadata = ObjectMetadata::new();
        metadata.insert("source-script".into(), source_script.storage_key.clone());
        metadata.insert("content-blake3".into(), content_hash.clone());
        metadata.insert("region".into(), region.to_string());
        metadata.insert("station".into(), station.to_string());

        self.bucket
            .put(&storage_key, content, ARTIFACT_CONTENT_TYPE, &metadata)
            .await?;

        info!(
            bucket = self.bucket.name(),
            key = %storage_key,
            size_bytes,
            "published build artifact"
        );

        Ok(BuildArtifact {
            region: region.to_string(),
            station: station.to_string(),
            timestamp,
            storage_key,
            source_script: source_script.clone(),
            size_bytes,
            content_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use climsync_bucket::{BucketGateway, MemoryObjectStore, ObjectStore};

    use super::*;

    fn script() -> ScriptKey {
        ScriptKey {
            region: "US".into(),
            name_prefix: "US/STN01/climsoft/".into(),
            year: 2023,
            version: 2,
            storage_key: "US/STN01/climsoft/US-2023-v2.R".into(),
        }
    }

    #[tokio::test]
    async fn publishes_under_timestamped_key_with_metadata() {
        let store = Arc::new(MemoryObjectStore::with_buckets(["builds"]));
        let gateway = BucketGateway::new(store.clone(), ["builds"]);
        let publisher = ArtifactPublisher::new(gateway.bucket("builds").unwrap());
        let now = Utc.with_ymd_and_hms(2024, 11, 2, 23, 59, 58).unwrap()
            + chrono::Duration::milliseconds(750);

        let artifact = publisher
            .publish_at("US", "STN01", Bytes::from_static(b"a,b\n1,2\n"), &script(), now)
            .await
            .unwrap();

        assert_eq!(
            artifact.storage_key,
            "US/STN01/climsoft/dataset_update_20241102235958.csv"
        );
        assert_eq!(artifact.timestamp.timestamp_subsec_nanos(), 0);
        assert_eq!(artifact.size_bytes, 8);
        assert_eq!(store.keys("builds"), vec![artifact.storage_key.clone()]);

        let (content_type, metadata) = store.metadata("builds", &artifact.storage_key).unwrap();
        assert_eq!(content_type, "text/csv");
        assert_eq!(metadata["source-script"], "US/STN01/climsoft/US-2023-v2.R");
        assert_eq!(metadata["content-blake3"], artifact.content_hash);
    }

    #[tokio::test]
    async fn same_second_publish_replaces_previous_artifact() {
        let store = Arc::new(MemoryObjectStore::with_buckets(["builds"]));
        let gateway = BucketGateway::new(store.clone(), ["builds"]);
        let publisher = ArtifactPublisher::new(gateway.bucket("builds").unwrap());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        publisher
            .publish_at("US", "STN01", Bytes::from_static(b"first"), &script(), now)
            .await
            .unwrap();
        let second = publisher
            .publish_at("US", "STN01", Bytes::from_static(b"second"), &script(), now)
            .await
            .unwrap();

        assert_eq!(store.keys("builds").len(), 1);
        assert_eq!(
            store.get_object("builds", &second.storage_key).await.unwrap(),
            Bytes::from_static(b"second")
        );
    }
}
