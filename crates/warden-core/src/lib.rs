//! Warden Core
//!
//! Wires configuration, logging and the permission store together.
//! The store is shared process-wide; each frame gets its own `RequestManager`.

mod config;
mod error;
mod warden;

pub use config::{Config, StoreBackend};
pub use error::CoreError;
pub use warden::Warden;

// Re-export the engine
pub use warden_permissions::{
    BoardId, CellId, DatabasePermissionStore, InMemoryPermissionStore, Permission,
    PermissionEntry, PermissionError, PermissionResult, PermissionStore, PermissionSystem,
    Request, RequestCounters, RequestKind, RequestManager, RowId,
};
pub use warden_storage::{Database, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging. `RUST_LOG` wins over the configured filter.
pub fn init_logging(config: &Config) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    fmt().with_env_filter(filter).with_target(true).init();
}
