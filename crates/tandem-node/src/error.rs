//! Node errors.

use tandem_core::{ExecutionError, error::StorageError};
use thiserror::Error;

/// Failure running the node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Storage could not be opened or written
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A protocol round failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// An install committed without naming its app instance
    #[error("install committed without an app instance id")]
    MissingApp,

    /// Filesystem or output failure
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
