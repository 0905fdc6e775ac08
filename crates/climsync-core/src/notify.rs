//! Client used by upload services to ask a climsync server for a sync after a landing write.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::sync::SyncResponse;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sync rejected with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug, Clone)]
pub struct SyncTriggerClient {
    http: reqwest::Client,
    base_url: String,
}

impl SyncTriggerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn notify(&self, region: &str, station: &str) -> Result<SyncResponse, NotifyError> {
        let response = self
            .http
            .post(format!("{}/sync", self.base_url))
            .query(&[("region", region), ("station", station)])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<SyncResponse>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body)
            .map(|err| err.detail)
            .unwrap_or(body);
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            detail,
        })
    }

    /// Like [`notify`](Self::notify) but never fails: the upload that prompted the call has
    /// already succeeded, so a failed sync is only logged.
    pub async fn notify_best_effort(&self, region: &str, station: &str) -> Option<SyncResponse> {
        match self.notify(region, station).await {
            Ok(response) => {
                info!(
                    region,
                    station,
                    processed_file = %response.processed_file,
                    "sync trigger accepted"
                );
                Some(response)
            }
            Err(err) => {
                warn!(region, station, error = %err, "sync trigger failed; upload unaffected");
                None
            }
        }
    }
}
