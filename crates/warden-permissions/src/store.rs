//! Permission persistence
//!
//! Decisions are keyed by (frame host pattern, request host). A row holds one
//! host-level decision plus one decision per request kind.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::kind::{KindPermissions, Permission, RequestKind};
use crate::Result;

/// Pattern of the board that applies to every frame
pub const DEFAULT_HOST_PATTERN: &str = "*";

/// Decisions stored for one (pattern, request host) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPermissions {
    pub host: Permission,
    pub kinds: KindPermissions,
}

impl RowPermissions {
    pub fn undecided() -> Self {
        Self {
            host: Permission::Undecided,
            kinds: [Permission::Undecided; RequestKind::COUNT],
        }
    }

    pub fn kind(&self, kind: RequestKind) -> Permission {
        self.kinds[kind.ordinal()]
    }

    /// `None` addresses the host-level decision
    pub fn get(&self, kind: Option<RequestKind>) -> Permission {
        match kind {
            Some(kind) => self.kind(kind),
            None => self.host,
        }
    }

    pub fn set(&mut self, kind: Option<RequestKind>, value: Permission) {
        match kind {
            Some(kind) => self.kinds[kind.ordinal()] = value,
            None => self.host = value,
        }
    }

    pub fn is_undecided(&self) -> bool {
        !self.host.is_decided() && self.kinds.iter().all(|p| !p.is_decided())
    }
}

impl Default for RowPermissions {
    fn default() -> Self {
        Self::undecided()
    }
}

/// Defaults installed for `("*", "")` the first time a store is initialized.
///
/// Request hosts are denied, except for images and stylesheets.
pub fn seed_permissions() -> RowPermissions {
    let mut row = RowPermissions::undecided();
    row.host = Permission::Deny;
    row.set(Some(RequestKind::Image), Permission::Allow);
    row.set(Some(RequestKind::Css), Permission::Allow);
    row
}

/// A stored row, as listed for the permission editor and for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub frame_host_pattern: String,
    pub request_host: String,
    pub permissions: RowPermissions,
}

pub trait PermissionStore: Send + Sync {
    /// All-undecided when no row exists; never creates one.
    fn get_permissions(&self, pattern: &str, request_host: &str) -> Result<RowPermissions>;

    /// Update one field of a row, creating the row if needed.
    ///
    /// `kind == None` updates the host-level decision.
    fn store_permissions(
        &self,
        pattern: &str,
        request_host: &str,
        kind: Option<RequestKind>,
        value: Permission,
    ) -> Result<()>;

    /// Remove a row, reverting all of its decisions to undecided.
    fn clear_permissions(&self, pattern: &str, request_host: &str) -> Result<()>;

    /// Every stored row, sorted by pattern then request host.
    fn entries(&self) -> Result<Vec<PermissionEntry>>;
}

/// Map-backed store, seeded on construction.
pub struct InMemoryPermissionStore {
    rows: RwLock<HashMap<(String, String), RowPermissions>>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        let mut rows = HashMap::new();
        rows.insert(
            (DEFAULT_HOST_PATTERN.to_string(), String::new()),
            seed_permissions(),
        );

        Self {
            rows: RwLock::new(rows),
        }
    }
}

impl Default for InMemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionStore for InMemoryPermissionStore {
    fn get_permissions(&self, pattern: &str, request_host: &str) -> Result<RowPermissions> {
        Ok(self
            .rows
            .read()
            .get(&(pattern.to_string(), request_host.to_string()))
            .copied()
            .unwrap_or_default())
    }

    fn store_permissions(
        &self,
        pattern: &str,
        request_host: &str,
        kind: Option<RequestKind>,
        value: Permission,
    ) -> Result<()> {
        self.rows
            .write()
            .entry((pattern.to_string(), request_host.to_string()))
            .or_default()
            .set(kind, value);
        Ok(())
    }

    fn clear_permissions(&self, pattern: &str, request_host: &str) -> Result<()> {
        self.rows
            .write()
            .remove(&(pattern.to_string(), request_host.to_string()));
        Ok(())
    }

    fn entries(&self) -> Result<Vec<PermissionEntry>> {
        let mut entries: Vec<PermissionEntry> = self
            .rows
            .read()
            .iter()
            .map(|((pattern, host), permissions)| PermissionEntry {
                frame_host_pattern: pattern.clone(),
                request_host: host.clone(),
                permissions: *permissions,
            })
            .collect();

        entries.sort_by(|a, b| {
            (&a.frame_host_pattern, &a.request_host).cmp(&(&b.frame_host_pattern, &b.request_host))
        });

        Ok(entries)
    }
}
