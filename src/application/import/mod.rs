use std::path::PathBuf;

use thiserror::Error;

use crate::infrastructure::error::StoreError;

pub mod consolidator;
pub mod records;
pub mod reconciler;
pub mod runner;

pub use runner::{run_import, StdinChooser, Survivor, SurvivorChooser, TagCandidate};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse '{path}'")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("path '{0}' is not a directory")]
    NotADirectory(PathBuf),
    #[error("missing an \"order.json\" file in '{0}'")]
    MissingOrderFile(PathBuf),
    #[error("data file '{0}' does not exist")]
    MissingDataFile(PathBuf),
    #[error("unknown file type '{0}'")]
    UnknownFileType(String),
    #[error("no user with username '{0}'")]
    UnknownUser(String),
    #[error("invalid epoch timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("invalid color '{0}'")]
    InvalidColor(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
