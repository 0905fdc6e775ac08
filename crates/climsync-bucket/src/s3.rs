use std::collections::VecDeque;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::{BucketError, ObjectMetadata, ObjectStore, ObjectStream, ObjectSummary};

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(config: S3Config) -> Result<Self, BucketError> {
        if config.region.is_empty() {
            return Err(BucketError::Configuration(
                "region cannot be empty".into(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self { client })
    }
}

struct ListState {
    continuation: Option<String>,
    buffered: VecDeque<ObjectSummary>,
    exhausted: bool,
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn list<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> ObjectStream<'a> {
        let initial = ListState {
            continuation: None,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        stream::try_unfold(initial, move |mut state| async move {
            loop {
                if let Some(summary) = state.buffered.pop_front() {
                    return Ok(Some((summary, state)));
                }
                if state.exhausted {
                    return Ok(None);
                }

                let page = self
                    .client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(prefix)
                    .set_continuation_token(state.continuation.take())
                    .send()
                    .await
                    .map_err(|err| BucketError::from_sdk(DisplayErrorContext(&err)))?;

                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    state.buffered.push_back(ObjectSummary {
                        key: key.to_string(),
                        last_modified: object
                            .last_modified()
                            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())),
                        size: object.size().unwrap_or_default().max(0) as u64,
                    });
                }

                state.continuation = page.next_continuation_token().map(str::to_string);
                state.exhausted = state.continuation.is_none();
                debug!(
                    bucket,
                    prefix,
                    objects = state.buffered.len(),
                    more = !state.exhausted,
                    "fetched listing page"
                );
            }
        })
        .boxed()
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err.into_service_error() {
                GetObjectError::NoSuchKey(_) => BucketError::NotFound(format!("{bucket}/{key}")),
                other => BucketError::from_sdk(DisplayErrorContext(&other)),
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|err| BucketError::from_sdk(DisplayErrorContext(&err)))?;
        Ok(data.into_bytes())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), BucketError> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type);

        for (name, value) in metadata {
            request = request.metadata(name, value);
        }

        request
            .send()
            .await
            .map_err(|err| BucketError::from_sdk(DisplayErrorContext(&err)))?;
        debug!(bucket, key, "stored object");
        Ok(())
    }

    async fn probe(&self, bucket: &str) -> Result<(), BucketError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| BucketError::from_sdk(DisplayErrorContext(&err)))?;
        Ok(())
    }
}
