use bytes::Bytes;
use chrono::{DateTime, Utc};
use climsync_bucket::Bucket;
use futures::TryStreamExt;
use tracing::{debug, info};

use crate::config::InputMode;
use crate::error::{Result, SyncError};
use crate::paths::climsoft_prefix;

#[derive(Debug, Clone)]
pub struct RawInput {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub content: Bytes,
}

/// Qualifying landing files for one station, in enumeration order. Never empty.
#[derive(Debug, Clone)]
pub struct RawInputBatch {
    inputs: Vec<RawInput>,
}

/// The single file handed to the transform, plus the landing keys it was built from.
#[derive(Debug, Clone)]
pub struct StagedInput {
    pub content: Bytes,
    pub source_keys: Vec<String>,
}

impl RawInputBatch {
    pub fn new(inputs: Vec<RawInput>) -> Option<Self> {
        if inputs.is_empty() {
            None
        } else {
            Some(Self { inputs })
        }
    }

    pub fn inputs(&self) -> &[RawInput] {
        &self.inputs
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|input| input.key.as_str())
    }

    /// Most recent modification time reported by the store, if any input carries one.
    pub fn newest_modified(&self) -> Option<DateTime<Utc>> {
        self.inputs.iter().filter_map(|input| input.last_modified).max()
    }

    pub fn total_bytes(&self) -> usize {
        self.inputs.iter().map(|input| input.content.len()).sum()
    }

    pub fn stage(&self, mode: InputMode) -> Result<StagedInput> {
        match (mode, self.inputs.as_slice()) {
            (InputMode::First, [first, ..]) | (InputMode::Merge, [first]) => Ok(StagedInput {
                content: first.content.clone(),
                source_keys: vec![first.key.clone()],
            }),
            (InputMode::Merge, inputs) => Ok(StagedInput {
                content: Bytes::from(merge_csv(inputs)?),
                source_keys: inputs.iter().map(|input| input.key.clone()).collect(),
            }),
            (InputMode::First, []) => Err(SyncError::not_found("no inputs to stage")),
        }
    }
}

/// Concatenates CSV files under the union of their headers (first-seen column order).
/// Columns a file lacks are written empty. Fields are copied as raw bytes, so landing files
/// keep whatever encoding they were exported in. A row wider than its header, or a header
/// naming the same column twice, fails the merge instead of losing fields.
fn merge_csv(inputs: &[RawInput]) -> Result<Vec<u8>> {
    let mut header: Vec<Vec<u8>> = Vec::new();
    let mut tables = Vec::with_capacity(inputs.len());

    for input in inputs {
        let invalid = |detail: String| {
            SyncError::InvalidInput(format!("could not read '{}' as CSV: {detail}", input.key))
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(input.content.as_ref());

        let columns: Vec<Vec<u8>> = reader
            .byte_headers()
            .map_err(|err| invalid(err.to_string()))?
            .iter()
            .map(<[u8]>::to_vec)
            .collect();
        for (index, column) in columns.iter().enumerate() {
            if columns[..index].contains(column) {
                return Err(invalid(format!(
                    "duplicate column '{}' in header",
                    String::from_utf8_lossy(column)
                )));
            }
        }

        let mut rows = Vec::new();
        for row in reader.byte_records() {
            let row = row.map_err(|err| invalid(err.to_string()))?;
            if row.len() > columns.len() {
                let line = row.position().map(|pos| pos.line()).unwrap_or_default();
                return Err(invalid(format!(
                    "line {line} has {} fields but the header has {}",
                    row.len(),
                    columns.len()
                )));
            }
            rows.push(row);
        }

        for column in &columns {
            if !header.contains(column) {
                header.push(column.clone());
            }
        }
        tables.push((columns, rows));
    }

    let write_err = |err: csv::Error| SyncError::InvalidInput(format!("could not merge inputs: {err}"));
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header).map_err(write_err)?;

    for (columns, rows) in &tables {
        let positions: Vec<Option<usize>> = header
            .iter()
            .map(|name| columns.iter().position(|column| column == name))
            .collect();
        for row in rows {
            writer
                .write_record(
                    positions
                        .iter()
                        .map(|position| position.and_then(|index| row.get(index)).unwrap_or_default()),
                )
                .map_err(write_err)?;
        }
    }

    writer
        .into_inner()
        .map_err(|err| SyncError::InvalidInput(format!("could not merge inputs: {err}")))
}

pub struct InputAggregator {
    bucket: Bucket,
    extension: String,
}

impl InputAggregator {
    pub fn new(bucket: Bucket, extension: impl Into<String>) -> Self {
        Self {
            bucket,
            extension: extension.into(),
        }
    }

    pub async fn collect_inputs(&self, region: &str, station: &str) -> Result<RawInputBatch> {
        let prefix = climsoft_prefix(region, station);
        let mut listing = self.bucket.list(&prefix);
        let mut inputs = Vec::new();

        while let Some(summary) = listing.try_next().await? {
            if !summary.key.ends_with(&self.extension) {
                debug!(key = %summary.key, "skipping non-qualifying landing object");
                continue;
            }
            debug!(key = %summary.key, size = summary.size, "fetching landing input");
            let content = self.bucket.get(&summary.key).await?;
            inputs.push(RawInput {
                key: summary.key,
                last_modified: summary.last_modified,
                content,
            });
        }

        let batch = RawInputBatch::new(inputs).ok_or_else(|| {
            SyncError::not_found(format!(
                "no inputs ({} files) found in bucket '{}' for region '{region}' and station '{station}' under {prefix}",
                self.extension,
                self.bucket.name()
            ))
        })?;

        info!(
            count = batch.len(),
            bytes = batch.total_bytes(),
            newest = ?batch.newest_modified(),
            "collected landing inputs"
        );
        Ok(batch)
    }
}
