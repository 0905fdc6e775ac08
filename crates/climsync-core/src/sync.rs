//! Sync orchestration: resolve script -> collect inputs -> execute -> publish.
//!
//! Stages run strictly in order and the first failure ends the request. Nothing is retried
//! and nothing is published unless every earlier stage succeeded.

use std::fmt;
use std::sync::Arc;

use climsync_bucket::BucketGateway;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::{InputMode, SyncConfig};
use crate::error::{Result, SyncError};
use crate::executor::{TransformExecutor, TransformRunner};
use crate::inputs::InputAggregator;
use crate::publisher::{ArtifactPublisher, BuildArtifact};
use crate::script::VersionResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    ResolvingScript,
    AggregatingInputs,
    Executing,
    Publishing,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStage::ResolvingScript => "resolving_script",
            SyncStage::AggregatingInputs => "aggregating_inputs",
            SyncStage::Executing => "executing",
            SyncStage::Publishing => "publishing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub job_id: Uuid,
    pub artifact: BuildArtifact,
    pub inputs: Vec<String>,
}

impl SyncOutcome {
    pub fn message(&self) -> String {
        format!(
            "Processed files for {}/{} and stored in builds bucket.",
            self.artifact.region, self.artifact.station
        )
    }

    pub fn processed_file(&self) -> &str {
        &self.artifact.storage_key
    }

    pub fn script_used(&self) -> &str {
        &self.artifact.source_script.storage_key
    }
}

/// Wire shape of a successful trigger call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub message: String,
    pub processed_file: String,
    pub script_used: String,
}

impl From<&SyncOutcome> for SyncResponse {
    fn from(outcome: &SyncOutcome) -> Self {
        Self {
            message: outcome.message(),
            processed_file: outcome.processed_file().to_string(),
            script_used: outcome.script_used().to_string(),
        }
    }
}

pub struct SyncService {
    resolver: VersionResolver,
    aggregator: InputAggregator,
    executor: TransformExecutor,
    publisher: ArtifactPublisher,
    input_mode: InputMode,
}

impl SyncService {
    pub fn new(
        gateway: &BucketGateway,
        config: &SyncConfig,
        runner: Arc<dyn TransformRunner>,
    ) -> Result<Self> {
        let scripts = gateway.bucket(&config.buckets.scripts)?;
        let landing = gateway.bucket(&config.buckets.landing)?;
        let builds = gateway.bucket(&config.buckets.builds)?;

        Ok(Self {
            resolver: VersionResolver::new(scripts, config.transform.script_extensions.clone()),
            aggregator: InputAggregator::new(landing, config.transform.input_extension.clone()),
            executor: TransformExecutor::new(
                runner,
                config.transform.timeout(),
                config.transform.scratch_dir.clone(),
            ),
            publisher: ArtifactPublisher::new(builds),
            input_mode: config.input_mode,
        })
    }

    pub async fn sync(&self, region: &str, station: &str) -> Result<SyncOutcome> {
        let job_id = Uuid::new_v4();
        let span = tracing::info_span!("sync", %job_id, region, station);
        self.run(job_id, region, station).instrument(span).await
    }

    async fn run(&self, job_id: Uuid, region: &str, station: &str) -> Result<SyncOutcome> {
        validate_segment("region", region)?;
        validate_segment("station", station)?;

        let (script, script_body) = self
            .stage(SyncStage::ResolvingScript, async {
                let script = self.resolver.resolve_latest_script(region, station).await?;
                let body = self.resolver.fetch(&script).await?;
                Ok::<_, SyncError>((script, body))
            })
            .await?;

        let staged = self
            .stage(SyncStage::AggregatingInputs, async {
                let batch = self.aggregator.collect_inputs(region, station).await?;
                batch.stage(self.input_mode)
            })
            .await?;

        let content = self
            .stage(
                SyncStage::Executing,
                self.executor.execute(&script, &script_body, &staged.content),
            )
            .await?;

        let artifact = self
            .stage(
                SyncStage::Publishing,
                self.publisher.publish(region, station, content, &script),
            )
            .await?;

        info!(
            processed_file = %artifact.storage_key,
            script_used = %artifact.source_script.storage_key,
            inputs = staged.source_keys.len(),
            "sync complete"
        );

        Ok(SyncOutcome {
            job_id,
            artifact,
            inputs: staged.source_keys,
        })
    }

    async fn stage<T, F>(&self, stage: SyncStage, work: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        info!(%stage, "entering stage");
        work.await.map_err(|err| {
            warn!(%stage, kind = ?err.kind(), error = %err, "sync failed");
            err
        })
    }
}

fn validate_segment(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SyncError::InvalidInput(format!("{name} must not be empty")));
    }
    if value.contains('/') {
        return Err(SyncError::InvalidInput(format!(
            "{name} must not contain '/': '{value}'"
        )));
    }
    Ok(())
}
