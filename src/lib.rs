pub mod catalog;
pub mod config;
pub mod error;
pub mod formats;
pub mod handlers;
pub mod manager;
pub mod operations;
pub mod permissions;
pub mod query;
pub mod resolver;
pub mod storage;
pub mod study_configuration;
pub mod types;

pub use config::{Config, StorageConfiguration};
pub use error::{Error, Result};
pub use manager::VariantStorageManager;
