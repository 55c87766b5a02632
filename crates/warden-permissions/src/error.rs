//! Permission error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PermissionError {
    #[error("Storage error: {0}")]
    Storage(#[from] warden_storage::StorageError),
}
