//! Versioned transformation scripts and selection of the newest one for a station.
//!
//! Scripts live in the scripts bucket under `{region}/{station}/climsoft/` and are named
//! `{region}-{year}-v{version}.{ext}`. Anything else under the prefix is ignored.

use bytes::Bytes;
use climsync_bucket::Bucket;
use futures::TryStreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::paths::climsoft_prefix;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptKey {
    pub region: String,
    pub name_prefix: String,
    pub year: u32,
    pub version: u64,
    pub storage_key: String,
}

impl ScriptKey {
    /// Final path segment of the storage key, e.g. `US-2023-v2.R`.
    pub fn file_name(&self) -> &str {
        self.storage_key
            .rsplit('/')
            .next()
            .unwrap_or(&self.storage_key)
    }

    fn rank(&self) -> (u32, u64) {
        (self.year, self.version)
    }
}

/// Compiled filename grammar for one region/station prefix.
#[derive(Debug, Clone)]
pub struct ScriptGrammar {
    region: String,
    prefix: String,
    pattern: Regex,
}

impl ScriptGrammar {
    pub fn new(region: &str, station: &str, extensions: &[String]) -> Result<Self> {
        let prefix = climsoft_prefix(region, station);
        let extensions = extensions
            .iter()
            .map(|ext| regex::escape(ext.trim_start_matches('.')))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(
            r"^{}{}-([0-9]{{4}})-v([0-9]+)\.(?i:{})$",
            regex::escape(&prefix),
            regex::escape(region),
            extensions
        );
        let pattern = Regex::new(&pattern)
            .map_err(|err| SyncError::InvalidInput(format!("invalid script grammar: {err}")))?;

        Ok(Self {
            region: region.to_string(),
            prefix,
            pattern,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn parse(&self, key: &str) -> Option<ScriptKey> {
        let captures = self.pattern.captures(key)?;
        let year = captures.get(1)?.as_str().parse().ok()?;
        let version = captures.get(2)?.as_str().parse().ok()?;

        Some(ScriptKey {
            region: self.region.clone(),
            name_prefix: self.prefix.clone(),
            year,
            version,
            storage_key: key.to_string(),
        })
    }
}

/// Keeps `candidate` when it outranks the current pick. Equal ranks keep the earlier one.
fn consider(latest: &mut Option<ScriptKey>, candidate: ScriptKey) {
    let newer = latest
        .as_ref()
        .map_or(true, |current| candidate.rank() > current.rank());
    if newer {
        *latest = Some(candidate);
    }
}

/// Picks the newest script among `keys`, ignoring names that do not fit the grammar.
pub fn select_latest<'a, I>(grammar: &ScriptGrammar, keys: I) -> Option<ScriptKey>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut latest = None;
    for key in keys {
        if let Some(candidate) = grammar.parse(key) {
            consider(&mut latest, candidate);
        }
    }
    latest
}

pub struct VersionResolver {
    bucket: Bucket,
    extensions: Vec<String>,
}

impl VersionResolver {
    pub fn new(bucket: Bucket, extensions: Vec<String>) -> Self {
        Self { bucket, extensions }
    }

    pub async fn resolve_latest_script(&self, region: &str, station: &str) -> Result<ScriptKey> {
        let grammar = ScriptGrammar::new(region, station, &self.extensions)?;
        let mut listing = self.bucket.list(grammar.prefix());
        let mut latest = None;
        let mut scanned = 0usize;

        while let Some(summary) = listing.try_next().await? {
            scanned += 1;
            match grammar.parse(&summary.key) {
                Some(candidate) => consider(&mut latest, candidate),
                None => debug!(key = %summary.key, "skipping object outside script grammar"),
            }
        }

        let script = latest.ok_or_else(|| {
            SyncError::not_found(format!(
                "no script found for region '{region}' in bucket '{}' under {}",
                self.bucket.name(),
                grammar.prefix()
            ))
        })?;

        info!(
            script = %script.storage_key,
            year = script.year,
            version = script.version,
            scanned,
            "resolved transformation script"
        );
        Ok(script)
    }

    pub async fn fetch(&self, script: &ScriptKey) -> Result<Bytes> {
        Ok(self.bucket.get(&script.storage_key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> ScriptGrammar {
        ScriptGrammar::new("US", "STN01", &["r".to_string()]).unwrap()
    }

    #[test]
    fn parses_conforming_names() {
        let key = grammar().parse("US/STN01/climsoft/US-2023-v12.R").unwrap();
        assert_eq!(key.year, 2023);
        assert_eq!(key.version, 12);
        assert_eq!(key.region, "US");
        assert_eq!(key.name_prefix, "US/STN01/climsoft/");
        assert_eq!(key.file_name(), "US-2023-v12.R");
    }

    #[test]
    fn rejects_non_conforming_names() {
        let grammar = grammar();
        for key in [
            "US/STN01/climsoft/us-2023-v1.R",
            "US/STN01/climsoft/US-23-v1.R",
            "US/STN01/climsoft/US-2023-1.R",
            "US/STN01/climsoft/US-2023-v1.py",
            "US/STN01/climsoft/US-2023-v1.R.bak",
            "US/STN01/climsoft/nested/US-2023-v1.R",
            "US/STN02/climsoft/US-2023-v1.R",
            "US/STN01/climsoft/README.md",
            "US/STN01/climsoft/US-2023-v99999999999999999999999.R",
        ] {
            assert!(grammar.parse(key).is_none(), "{key} should not match");
        }
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let grammar = grammar();
        assert!(grammar.parse("US/STN01/climsoft/US-2023-v1.r").is_some());
        assert!(grammar.parse("US/STN01/climsoft/US-2023-v1.R").is_some());
    }

    #[test]
    fn region_is_matched_literally() {
        let grammar = ScriptGrammar::new("U.S", "STN01", &["r".to_string()]).unwrap();
        assert!(grammar.parse("U.S/STN01/climsoft/U.S-2023-v1.R").is_some());
        assert!(grammar.parse("U.S/STN01/climsoft/UXS-2023-v1.R").is_none());
    }

    #[test]
    fn selects_highest_version_within_newest_year() {
        let latest = select_latest(
            &grammar(),
            [
                "US/STN01/climsoft/US-2022-v1.R",
                "US/STN01/climsoft/US-2023-v1.R",
                "US/STN01/climsoft/US-2023-v2.R",
            ],
        )
        .unwrap();
        assert_eq!(latest.storage_key, "US/STN01/climsoft/US-2023-v2.R");
    }

    #[test]
    fn newer_year_wins_over_higher_version() {
        let latest = select_latest(
            &grammar(),
            [
                "US/STN01/climsoft/US-2022-v40.R",
                "US/STN01/climsoft/US-2024-v1.r",
                "US/STN01/climsoft/US-2023-v9.R",
            ],
        )
        .unwrap();
        assert_eq!(latest.year, 2024);
        assert_eq!(latest.version, 1);
    }

    #[test]
    fn versions_compare_numerically() {
        let latest = select_latest(
            &grammar(),
            [
                "US/STN01/climsoft/US-2023-v9.R",
                "US/STN01/climsoft/US-2023-v10.R",
            ],
        )
        .unwrap();
        assert_eq!(latest.version, 10);
    }

    #[test]
    fn noise_never_changes_the_pick() {
        let base = ["US/STN01/climsoft/US-2021-v3.R", "US/STN01/climsoft/US-2021-v4.R"];
        let noisy = [
            "US/STN01/climsoft/US-2099-v1.txt",
            "US/STN01/climsoft/US-2021-v4.R",
            "US/STN01/climsoft/CA-2030-v1.R",
            "US/STN01/climsoft/US-2021-v3.R",
            "US/STN01/climsoft/data.csv",
        ];
        assert_eq!(
            select_latest(&grammar(), base),
            select_latest(&grammar(), noisy)
        );
    }

    #[test]
    fn nothing_conforming_yields_none() {
        assert!(select_latest(&grammar(), ["US/STN01/climsoft/notes.txt"]).is_none());
        assert!(select_latest(&grammar(), std::iter::empty()).is_none());
    }
}
