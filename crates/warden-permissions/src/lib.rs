//! Warden Request Permissions
//!
//! Decides whether a sub-request issued while rendering a page may be fetched.
//!
//! Decisions are tri-state (Allow / Deny / Undecided) and resolved through a
//! small graph per navigation:
//! - a default board (`*`) and a frame board (`*.frame-host`)
//! - one row per request host in each board, created on first use
//! - one host-level cell plus one cell per request kind in each row
//!
//! Precedence: explicit > Deny among parents > Allow among parents >
//! grandparent > fallback board.

mod bitmask;
mod db_store;
mod error;
mod kind;
mod manager;
mod store;
mod system;

pub use bitmask::{decode_row, encode_row};
pub use db_store::DatabasePermissionStore;
pub use error::PermissionError;
pub use kind::{KindPermissions, Permission, PermissionResult, Request, RequestKind};
pub use manager::{HostCounters, RequestCounters, RequestManager};
pub use store::{
    seed_permissions, InMemoryPermissionStore, PermissionEntry, PermissionStore, RowPermissions,
    DEFAULT_HOST_PATTERN,
};
pub use system::{BoardId, CellId, PermissionSystem, RowId};

pub type Result<T> = std::result::Result<T, PermissionError>;
