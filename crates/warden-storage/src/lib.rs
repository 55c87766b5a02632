//! Warden Storage Layer
//!
//! SQLite-backed persistence for request permission decisions.
//! The engine only uses it as a get/set row store.

mod database;
mod error;
mod migrations;

pub use database::Database;
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
