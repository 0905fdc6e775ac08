use chrono::{DateTime, Utc};

/// Second-resolution UTC stamp used in artifact names.
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Prefix shared by the scripts, landing and builds buckets for one station.
pub fn climsoft_prefix(region: &str, station: &str) -> String {
    format!("{region}/{station}/climsoft/")
}

pub fn artifact_key(region: &str, station: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}dataset_update_{}.csv",
        climsoft_prefix(region, station),
        timestamp.format(ARTIFACT_TIMESTAMP_FORMAT)
    )
}
