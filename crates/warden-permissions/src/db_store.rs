//! SQLite-backed permission store
//!
//! Each (pattern, request host) pair is one `Permissions` row whose
//! `PermissionsBitmask` packs every decision of the row.

use rusqlite::OptionalExtension;
use warden_storage::Database;

use crate::bitmask::{decode_row, encode_field, encode_row, field_index};
use crate::kind::{Permission, RequestKind};
use crate::store::{
    seed_permissions, PermissionEntry, PermissionStore, RowPermissions, DEFAULT_HOST_PATTERN,
};
use crate::Result;

pub struct DatabasePermissionStore {
    db: Database,
}

impl DatabasePermissionStore {
    /// Wrap a database, installing the seed defaults if it was never initialized.
    pub fn new(db: Database) -> Result<Self> {
        let store = Self { db };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let seeded = self.db.transaction(|conn| {
            let initialized: Option<bool> = conn
                .query_row(
                    "SELECT PermissionsInitialized FROM Globals LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            if initialized == Some(true) {
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO Permissions (FrameHostPattern, RequestHost, PermissionsBitmask)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (FrameHostPattern, RequestHost)
                 DO UPDATE SET PermissionsBitmask = excluded.PermissionsBitmask",
                rusqlite::params![DEFAULT_HOST_PATTERN, "", encode_row(&seed_permissions())],
            )?;
            conn.execute("DELETE FROM Globals", [])?;
            conn.execute(
                "INSERT INTO Globals (PermissionsInitialized) VALUES (?1)",
                [true],
            )?;

            Ok(true)
        })?;

        if seeded {
            tracing::info!("Seeded default request permissions");
        }

        Ok(())
    }
}

impl PermissionStore for DatabasePermissionStore {
    fn get_permissions(&self, pattern: &str, request_host: &str) -> Result<RowPermissions> {
        let bitmask: Option<i64> = self.db.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT PermissionsBitmask FROM Permissions
                     WHERE FrameHostPattern = ?1 AND RequestHost = ?2",
                    [pattern, request_host],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        Ok(bitmask.map(decode_row).unwrap_or_default())
    }

    fn store_permissions(
        &self,
        pattern: &str,
        request_host: &str,
        kind: Option<RequestKind>,
        value: Permission,
    ) -> Result<()> {
        self.db.transaction(|conn| {
            let current: i64 = conn
                .query_row(
                    "SELECT PermissionsBitmask FROM Permissions
                     WHERE FrameHostPattern = ?1 AND RequestHost = ?2",
                    [pattern, request_host],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);

            let bitmask = encode_field(current, field_index(kind), value);

            conn.execute(
                "INSERT INTO Permissions (FrameHostPattern, RequestHost, PermissionsBitmask)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (FrameHostPattern, RequestHost)
                 DO UPDATE SET PermissionsBitmask = excluded.PermissionsBitmask",
                rusqlite::params![pattern, request_host, bitmask],
            )?;
            Ok(())
        })?;

        tracing::debug!(
            pattern = %pattern,
            request_host = %request_host,
            kind = %kind.map(|k| k.short_name()).unwrap_or("host"),
            value = %value,
            "Stored permission"
        );

        Ok(())
    }

    fn clear_permissions(&self, pattern: &str, request_host: &str) -> Result<()> {
        Ok(self.db.with_connection(|conn| {
            conn.execute(
                "DELETE FROM Permissions WHERE FrameHostPattern = ?1 AND RequestHost = ?2",
                [pattern, request_host],
            )?;
            Ok(())
        })?)
    }

    fn entries(&self) -> Result<Vec<PermissionEntry>> {
        Ok(self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT FrameHostPattern, RequestHost, PermissionsBitmask FROM Permissions
                 ORDER BY FrameHostPattern, RequestHost",
            )?;

            let entries = stmt
                .query_map([], |row| {
                    Ok(PermissionEntry {
                        frame_host_pattern: row.get(0)?,
                        request_host: row.get(1)?,
                        permissions: decode_row(row.get(2)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(entries)
        })?)
    }
}
