//! Error type shared by every engine operation.

use crate::entry::StreamId;
use crate::source::SourceError;
use std::collections::TryReserveError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid stream handle {0:?}")]
    InvalidStream(StreamId),

    #[error("Cannot open more than {0} streams")]
    TooManyStreams(usize),

    #[error("Failed to open trace {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: SourceError,
    },

    #[error("Trace source error: {0}")]
    Source(#[from] SourceError),

    #[error("Out of memory while building entry arrays")]
    OutOfMemory,

    #[error("Content filter is active on {0}; reload the stream instead of recomputing visibility")]
    ContentFilterActive(StreamId),

    #[error("No such collection")]
    UnknownCollection,

    #[error("Collection indexes {expected} entries but was queried with {actual}")]
    StaleCollection { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
