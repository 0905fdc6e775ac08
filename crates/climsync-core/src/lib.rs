pub mod config;
pub mod error;
pub mod executor;
pub mod inputs;
pub mod notify;
pub mod paths;
pub mod publisher;
pub mod script;
pub mod sync;

pub use config::{InputMode, SyncConfig};
pub use error::{ErrorKind, Result, SyncError};
pub use executor::{ProcessRunner, RunOutcome, RunRequest, TransformExecutor, TransformRunner};
pub use publisher::BuildArtifact;
pub use script::ScriptKey;
pub use sync::{SyncOutcome, SyncResponse, SyncService, SyncStage};
