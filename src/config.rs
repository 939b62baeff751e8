use crate::storage::MEMORY_ENGINE;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "varstore")]
#[command(about = "Variant storage query and indexing service")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "VARSTORE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "VARSTORE_PORT", default_value = "8080")]
    pub port: u16,

    /// JSON catalog seed (studies, samples, files, sessions)
    #[arg(long, env = "VARSTORE_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Directory bulk operations write their artifacts to
    #[arg(long, env = "VARSTORE_OUT_DIR", default_value = "./out")]
    pub out_dir: PathBuf,

    /// Enable CORS for all origins
    #[arg(long, env = "VARSTORE_CORS", default_value = "true")]
    pub cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Result limit applied to `get` when the caller sets none
    #[arg(long, env = "VARSTORE_LIMIT_DEFAULT", default_value = "1000")]
    pub limit_default: u64,

    /// Hard ceiling for `get` result limits
    #[arg(long, env = "VARSTORE_LIMIT_MAX", default_value = "5000")]
    pub limit_max: u64,

    /// Storage engine for studies whose datastore names none
    #[arg(long, env = "VARSTORE_DEFAULT_ENGINE", default_value = MEMORY_ENGINE)]
    pub default_engine: String,

    /// Abort bulk operations running longer than this many seconds
    #[arg(long, env = "VARSTORE_OPERATION_TIMEOUT")]
    pub operation_timeout_secs: Option<u64>,
}

impl Config {
    pub fn storage_configuration(&self) -> StorageConfiguration {
        let limit_max = self.limit_max.max(1);
        StorageConfiguration {
            limit_default: self.limit_default.clamp(1, limit_max),
            limit_max,
            default_engine: self.default_engine.clone(),
            out_dir: self.out_dir.clone(),
            operation_timeout: self.operation_timeout_secs.map(Duration::from_secs),
            ..Default::default()
        }
    }
}

/// Tunables of the variant storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfiguration {
    pub limit_default: u64,
    pub limit_max: u64,
    pub rank_limit_default: u64,
    pub rank_limit_max: u64,
    /// Distance in bases searched around a variant by `get_phased`.
    pub phased_window: u64,
    /// Engine used when a study's datastore names none.
    pub default_engine: String,
    pub out_dir: PathBuf,
    pub operation_timeout: Option<Duration>,
}

impl Default for StorageConfiguration {
    fn default() -> Self {
        Self {
            limit_default: 1000,
            limit_max: 5000,
            rank_limit_default: 10,
            rank_limit_max: 30,
            phased_window: 5000,
            default_engine: MEMORY_ENGINE.to_string(),
            out_dir: PathBuf::from("./out"),
            operation_timeout: None,
        }
    }
}
