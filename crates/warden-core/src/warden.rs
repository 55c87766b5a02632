//! Process-wide permission state
//!
//! Owns the permission store shared by every frame and hands out one
//! `RequestManager` per frame.

use std::sync::Arc;
use url::Url;

use warden_permissions::{
    DatabasePermissionStore, InMemoryPermissionStore, PermissionEntry, PermissionStore,
    RequestKind, RequestManager,
};
use warden_storage::Database;

use crate::config::{Config, StoreBackend};
use crate::Result;

pub struct Warden {
    config: Config,
    store: Arc<dyn PermissionStore>,
}

impl Warden {
    /// Open the store selected by the configuration.
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn PermissionStore> = match config.store {
            StoreBackend::Database => {
                if let Some(parent) = config.database_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let db = Database::open(&config.database_path)?;
                Arc::new(DatabasePermissionStore::new(db)?)
            }
            StoreBackend::Memory => Arc::new(InMemoryPermissionStore::new()),
        };

        tracing::info!(store = ?config.store, "Warden initialized");

        Ok(Self { config, store })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn PermissionStore> {
        Arc::clone(&self.store)
    }

    /// A manager with no navigation yet; every check is denied until `reset`.
    pub fn request_manager(&self) -> RequestManager {
        RequestManager::new(self.store())
    }

    /// A manager already reset for `frame_url`.
    pub fn navigate(&self, frame_url: &str) -> Result<RequestManager> {
        let manager = self.request_manager();
        manager.reset(Url::parse(frame_url)?)?;
        Ok(manager)
    }

    /// All stored decisions as JSON.
    pub fn export_permissions(&self) -> Result<String> {
        let entries = self.store.entries()?;
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    /// Write every field of every exported row back into the store.
    pub fn import_permissions(&self, json: &str) -> Result<usize> {
        let entries: Vec<PermissionEntry> = serde_json::from_str(json)?;

        for entry in &entries {
            let pattern = entry.frame_host_pattern.as_str();
            let host = entry.request_host.as_str();

            self.store
                .store_permissions(pattern, host, None, entry.permissions.host)?;
            for kind in RequestKind::ALL {
                self.store
                    .store_permissions(pattern, host, Some(kind), entry.permissions.kind(kind))?;
            }
        }

        tracing::info!(rows = entries.len(), "Imported permissions");

        Ok(entries.len())
    }
}
