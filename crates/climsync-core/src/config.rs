use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use climsync_bucket::{BucketError, MemoryObjectStore, ObjectStore, S3Config, S3ObjectStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    S3,
    Memory,
}

/// How qualifying landing files are combined before the transform runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Concatenate every qualifying CSV into a single staged input.
    #[default]
    Merge,
    /// Stage only the first enumerated file.
    First,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub kind: StoreKind,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::S3,
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            force_path_style: true,
        }
    }
}

impl StoreSettings {
    pub fn s3_config(&self) -> S3Config {
        S3Config {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            force_path_style: self.force_path_style,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketNames {
    pub landing: String,
    pub scripts: String,
    pub builds: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            landing: "landing".to_string(),
            scripts: "scripts".to_string(),
            builds: "builds".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    pub interpreter: String,
    pub timeout_secs: u64,
    pub scratch_dir: Option<PathBuf>,
    /// Accepted script extensions, compared case-insensitively.
    pub script_extensions: Vec<String>,
    pub input_extension: String,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            interpreter: "Rscript".to_string(),
            timeout_secs: 300,
            scratch_dir: None,
            script_extensions: vec!["r".to_string()],
            input_extension: ".csv".to_string(),
        }
    }
}

impl TransformSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub store: StoreSettings,
    pub buckets: BucketNames,
    pub allowed_buckets: Vec<String>,
    pub transform: TransformSettings,
    pub input_mode: InputMode,
    pub bind: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            buckets: BucketNames::default(),
            allowed_buckets: vec![
                "landing".to_string(),
                "scripts".to_string(),
                "builds".to_string(),
            ],
            transform: TransformSettings::default(),
            input_mode: InputMode::default(),
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

impl SyncConfig {
    /// Reads an optional TOML file, then layers process environment variables on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(kind) = var("CLIMSYNC_OBJECT_STORE_KIND") {
            self.store.kind = match kind.trim().to_ascii_lowercase().as_str() {
                "s3" => StoreKind::S3,
                "memory" => StoreKind::Memory,
                other => {
                    return Err(ConfigError::InvalidValue {
                        name: "CLIMSYNC_OBJECT_STORE_KIND",
                        message: format!("expected 's3' or 'memory', got '{other}'"),
                    })
                }
            };
        }
        if let Some(endpoint) = var("S3_ENDPOINT") {
            self.store.endpoint = Some(endpoint);
        }
        if let Some(region) = var("AWS_REGION") {
            self.store.region = region;
        }
        if let Some(key) = var("AWS_ACCESS_KEY_ID") {
            self.store.access_key_id = Some(key);
        }
        if let Some(secret) = var("AWS_SECRET_ACCESS_KEY") {
            self.store.secret_access_key = Some(secret);
        }
        if let Some(flag) = var("S3_FORCE_PATH_STYLE") {
            self.store.force_path_style = parse_bool("S3_FORCE_PATH_STYLE", &flag)?;
        }
        if let Some(buckets) = var("S3_BUCKETS") {
            self.allowed_buckets = split_list(&buckets);
        }
        if let Some(name) = var("CLIMSYNC_LANDING_BUCKET") {
            self.buckets.landing = name;
        }
        if let Some(name) = var("CLIMSYNC_SCRIPTS_BUCKET") {
            self.buckets.scripts = name;
        }
        if let Some(name) = var("CLIMSYNC_BUILDS_BUCKET") {
            self.buckets.builds = name;
        }
        if let Some(interpreter) = var("CLIMSYNC_INTERPRETER") {
            self.transform.interpreter = interpreter;
        }
        if let Some(timeout) = var("CLIMSYNC_TRANSFORM_TIMEOUT_SECS") {
            self.transform.timeout_secs =
                timeout
                    .trim()
                    .parse()
                    .map_err(|err| ConfigError::InvalidValue {
                        name: "CLIMSYNC_TRANSFORM_TIMEOUT_SECS",
                        message: format!("{err}"),
                    })?;
        }
        if let Some(dir) = var("CLIMSYNC_SCRATCH_DIR") {
            self.transform.scratch_dir = Some(PathBuf::from(dir));
        }
        if let Some(extensions) = var("CLIMSYNC_SCRIPT_EXTENSIONS") {
            self.transform.script_extensions = split_list(&extensions);
        }
        if let Some(mode) = var("CLIMSYNC_INPUT_MODE") {
            self.input_mode = match mode.trim().to_ascii_lowercase().as_str() {
                "merge" => InputMode::Merge,
                "first" => InputMode::First,
                other => {
                    return Err(ConfigError::InvalidValue {
                        name: "CLIMSYNC_INPUT_MODE",
                        message: format!("expected 'merge' or 'first', got '{other}'"),
                    })
                }
            };
        }
        if let Some(bind) = var("CLIMSYNC_BIND") {
            self.bind = bind;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, bucket) in [
            ("buckets.landing", &self.buckets.landing),
            ("buckets.scripts", &self.buckets.scripts),
            ("buckets.builds", &self.buckets.builds),
        ] {
            if !self.allowed_buckets.iter().any(|allowed| allowed == bucket) {
                return Err(ConfigError::InvalidValue {
                    name,
                    message: format!("bucket '{bucket}' is not in the allow-list"),
                });
            }
        }
        if self.transform.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "transform.timeout_secs",
                message: "timeout must be at least one second".into(),
            });
        }
        if self.transform.interpreter.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "transform.interpreter",
                message: "interpreter cannot be empty".into(),
            });
        }
        if self.transform.script_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "transform.script_extensions",
                message: "at least one script extension is required".into(),
            });
        }
        Ok(())
    }

    /// Builds the object store backend selected by `store.kind`.
    pub async fn connect_store(&self) -> Result<Arc<dyn ObjectStore>, BucketError> {
        match self.store.kind {
            StoreKind::S3 => Ok(Arc::new(S3ObjectStore::new(self.store.s3_config()).await?)),
            StoreKind::Memory => Ok(Arc::new(MemoryObjectStore::with_buckets(
                self.allowed_buckets.iter().cloned(),
            ))),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            name,
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
