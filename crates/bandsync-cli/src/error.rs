use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] bandsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error(
        "No config found at {}. Run `bandsync config init --api-url <URL> --tenant <ID>` first.",
        .0.display()
    )]
    NotConfigured(PathBuf),
    #[error("Config already exists at {}; pass --force to overwrite", .0.display())]
    ConfigExists(PathBuf),
}
