//! Request Manager
//!
//! One per frame. Answers permission checks for the frame's sub-requests,
//! applies the HTTPS to HTTP downgrade rule and counts requests per host.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::kind::{host_of, Permission, Request, RequestKind};
use crate::store::PermissionStore;
use crate::system::PermissionSystem;
use crate::Result;

type KindCounts = [u32; RequestKind::COUNT];

/// Requests seen for one host since the last navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCounters {
    pub host: String,
    pub counts: KindCounts,
}

impl HostCounters {
    pub fn count(&self, kind: RequestKind) -> u32 {
        self.counts[kind.ordinal()]
    }
}

/// Snapshot of a manager's bookkeeping, for the permission editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounters {
    /// Sorted by host
    pub hosts: Vec<HostCounters>,
    pub accepted: u32,
    pub rejected: u32,
}

impl RequestCounters {
    pub fn count(&self, host: &str, kind: RequestKind) -> u32 {
        self.hosts
            .iter()
            .find(|h| h.host == host)
            .map(|h| h.count(kind))
            .unwrap_or(0)
    }
}

fn count_request(counters: &mut HashMap<String, KindCounts>, host: &str, kind: RequestKind) {
    let counts = counters
        .entry(host.to_string())
        .or_insert([0; RequestKind::COUNT]);
    counts[kind.ordinal()] = counts[kind.ordinal()].saturating_add(1);
}

#[derive(Default)]
struct ManagerState {
    frame_url: Option<Url>,
    counters: HashMap<String, KindCounts>,
    accepted: u32,
    rejected: u32,
    permission_system: Option<PermissionSystem>,
}

impl ManagerState {
    fn frame_host(&self) -> Option<String> {
        self.frame_url.as_ref().map(host_of)
    }

    // data: URIs carry no host; they take on the identity of the enclosing frame
    fn rewrite_request(&self, request: &Request) -> Request {
        match &self.frame_url {
            Some(frame_url) if request.scheme() == "data" => {
                Request::new(frame_url.clone(), request.kind)
            }
            _ => request.clone(),
        }
    }

    fn is_downgrade(&self, request: &Request) -> bool {
        request.scheme() == "http"
            && self
                .frame_url
                .as_ref()
                .map(|frame| frame.scheme() == "https")
                .unwrap_or(false)
    }
}

/// Per-frame permission checks behind a single lock.
pub struct RequestManager {
    store: Arc<dyn PermissionStore>,
    state: Mutex<ManagerState>,
}

impl RequestManager {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Start a new navigation.
    ///
    /// Counters are cleared and a fresh permission system is built for the
    /// frame host. If the store fails, no system is active afterwards and every
    /// check is denied until the next successful reset.
    pub fn reset(&self, frame_url: Url) -> Result<()> {
        let frame_host = host_of(&frame_url);
        let mut state = self.state.lock();

        *state = ManagerState::default();
        state
            .counters
            .insert(frame_host.clone(), [0; RequestKind::COUNT]);

        let mut system = PermissionSystem::new(&frame_host, Arc::clone(&self.store))?;
        system.row(system.frame_board(), &frame_host)?;

        state.frame_url = Some(frame_url);
        state.permission_system = Some(system);

        tracing::info!(frame_host = %frame_host, "Reset request permissions");

        Ok(())
    }

    pub fn frame_url(&self) -> Option<Url> {
        self.state.lock().frame_url.clone()
    }

    pub fn frame_host(&self) -> Option<String> {
        self.state.lock().frame_host()
    }

    /// Decide a sub-request and record it in the counters.
    pub fn is_request_permitted(&self, request: &Request) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let rewritten = state.rewrite_request(request);
        let downgrade = state.is_downgrade(request);

        let Some(system) = state.permission_system.as_mut() else {
            tracing::error!(
                url = %request.url,
                kind = %request.kind,
                "Permission check without an active navigation"
            );
            state.rejected = state.rejected.saturating_add(1);
            return Ok(false);
        };

        let host = rewritten.host();
        let mut permitted = system.is_request_permitted(&rewritten)?;
        // Counted even when the downgrade rule vetoes the request below
        count_request(&mut state.counters, &host, rewritten.kind);

        if permitted && downgrade {
            count_request(&mut state.counters, &host, RequestKind::UnsecuredHttp);
            permitted = system.is_unsecured_http_permitted(&rewritten)?;
        }

        if permitted {
            state.accepted = state.accepted.saturating_add(1);
        } else {
            state.rejected = state.rejected.saturating_add(1);
        }

        tracing::debug!(
            host = %host,
            kind = %rewritten.kind,
            downgrade,
            permitted,
            "Request permission checked"
        );

        Ok(permitted)
    }

    /// Whether a plain HTTP request may be issued from this frame.
    pub fn is_unsecured_http_permitted(&self, request: &Request) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let rewritten = state.rewrite_request(request);

        match state.permission_system.as_mut() {
            Some(system) => system.is_unsecured_http_permitted(&rewritten),
            None => {
                tracing::error!(
                    url = %request.url,
                    "Unsecured HTTP check without an active navigation"
                );
                Ok(false)
            }
        }
    }

    /// Allow every request to the frame's own host.
    pub fn allow_all_first_party_requests(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let (Some(frame_host), Some(system)) =
            (state.frame_host(), state.permission_system.as_mut())
        else {
            tracing::warn!("Cannot allow first-party requests without an active navigation");
            return Ok(());
        };

        let row = system.row(system.frame_board(), &frame_host)?;
        let cell = system.host_cell(row);
        let previous = system.cell_permission(cell);

        system.set_permission(cell, Permission::Allow)?;

        if previous == Permission::Deny {
            state.rejected = state.rejected.saturating_sub(1);
        }
        state.accepted = state.accepted.saturating_add(1);

        tracing::info!(frame_host = %frame_host, "Allowed all first-party requests");

        Ok(())
    }

    /// Give the permission editor locked access to the active system.
    pub fn with_permission_system<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut PermissionSystem) -> T,
    {
        self.state.lock().permission_system.as_mut().map(f)
    }

    pub fn request_counters(&self) -> RequestCounters {
        let state = self.state.lock();

        let mut hosts: Vec<HostCounters> = state
            .counters
            .iter()
            .map(|(host, counts)| HostCounters {
                host: host.clone(),
                counts: *counts,
            })
            .collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));

        RequestCounters {
            hosts,
            accepted: state.accepted,
            rejected: state.rejected,
        }
    }

    /// Log the counter table at debug level.
    pub fn dump_counters(&self) {
        let counters = self.request_counters();
        let header: Vec<&str> = RequestKind::ALL.iter().map(|k| k.short_name()).collect();

        tracing::debug!(
            accepted = counters.accepted,
            rejected = counters.rejected,
            "Request counters: {}",
            header.join(" ")
        );
        for host in &counters.hosts {
            let counts: Vec<String> = host.counts.iter().map(|c| c.to_string()).collect();
            tracing::debug!(host = %host.host, "{}", counts.join(" "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryPermissionStore, PermissionEntry, RowPermissions};
    use crate::PermissionError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use warden_storage::StorageError;

    /// Fails every row read while `failing` is set.
    struct FlakyStore {
        inner: InMemoryPermissionStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryPermissionStore::new(),
                failing: AtomicBool::new(false),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl PermissionStore for FlakyStore {
        fn get_permissions(&self, pattern: &str, request_host: &str) -> Result<RowPermissions> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Database(rusqlite::Error::InvalidQuery).into());
            }
            self.inner.get_permissions(pattern, request_host)
        }

        fn store_permissions(
            &self,
            pattern: &str,
            request_host: &str,
            kind: Option<RequestKind>,
            value: Permission,
        ) -> Result<()> {
            self.inner.store_permissions(pattern, request_host, kind, value)
        }

        fn clear_permissions(&self, pattern: &str, request_host: &str) -> Result<()> {
            self.inner.clear_permissions(pattern, request_host)
        }

        fn entries(&self) -> Result<Vec<PermissionEntry>> {
            self.inner.entries()
        }
    }

    fn assert_send_sync<T: Send + Sync>() {}

    fn manager(frame_url: &str) -> (Arc<InMemoryPermissionStore>, RequestManager) {
        let store = Arc::new(InMemoryPermissionStore::new());
        let manager = RequestManager::new(store.clone());
        manager.reset(Url::parse(frame_url).unwrap()).unwrap();
        (store, manager)
    }

    fn request(url: &str, kind: RequestKind) -> Request {
        Request::parse(url, kind).unwrap()
    }

    fn set_frame_permission(
        manager: &RequestManager,
        request_host: &str,
        kind: Option<RequestKind>,
        value: Permission,
    ) {
        manager
            .with_permission_system(|system| {
                let row = system.row(system.frame_board(), request_host).unwrap();
                let cell = match kind {
                    Some(kind) => system.kind_cell(row, kind),
                    None => system.host_cell(row),
                };
                system.set_permission(cell, value).unwrap();
            })
            .unwrap();
    }

    #[test]
    fn test_seeded_defaults() {
        let (_, manager) = manager("http://example.com/");

        assert!(manager
            .is_request_permitted(&request("http://cdn.example.com/a.png", RequestKind::Image))
            .unwrap());
        assert!(!manager
            .is_request_permitted(&request("http://cdn.example.com/a.js", RequestKind::JavaScript))
            .unwrap());

        let counters = manager.request_counters();
        assert_eq!(counters.count("cdn.example.com", RequestKind::Image), 1);
        assert_eq!(counters.count("cdn.example.com", RequestKind::JavaScript), 1);
        assert_eq!(counters.accepted, 1);
        assert_eq!(counters.rejected, 1);
    }

    #[test]
    fn test_reset_primes_frame_host() {
        let (_, manager) = manager("https://Example.com/index.html");
        let counters = manager.request_counters();

        assert_eq!(counters.hosts.len(), 1);
        assert_eq!(counters.hosts[0].host, "example.com");
        assert_eq!(counters.hosts[0].counts, [0; RequestKind::COUNT]);
        assert_eq!(manager.frame_host().as_deref(), Some("example.com"));

        let materialized = manager
            .with_permission_system(|system| {
                let board = system.frame_board();
                system
                    .rows(board)
                    .into_iter()
                    .map(|row| system.request_host(row).to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap();
        assert_eq!(materialized, vec!["example.com".to_string()]);
    }

    #[test]
    fn test_downgrade_veto() {
        let (_, manager) = manager("https://example.com/");
        set_frame_permission(
            &manager,
            "example.com",
            Some(RequestKind::JavaScript),
            Permission::Allow,
        );

        let script = request("http://example.com/x.js", RequestKind::JavaScript);
        assert!(!manager.is_request_permitted(&script).unwrap());

        let counters = manager.request_counters();
        assert_eq!(counters.count("example.com", RequestKind::JavaScript), 1);
        assert_eq!(counters.count("example.com", RequestKind::UnsecuredHttp), 1);
        assert_eq!(counters.rejected, 1);

        // Explicitly allowing plain HTTP lifts the veto
        set_frame_permission(
            &manager,
            "example.com",
            Some(RequestKind::UnsecuredHttp),
            Permission::Allow,
        );
        assert!(manager.is_unsecured_http_permitted(&script).unwrap());
        assert!(manager.is_request_permitted(&script).unwrap());
    }

    #[test]
    fn test_https_request_is_not_a_downgrade() {
        let (_, manager) = manager("https://example.com/");
        assert!(manager
            .is_request_permitted(&request("https://example.com/a.png", RequestKind::Image))
            .unwrap());

        let counters = manager.request_counters();
        assert_eq!(counters.count("example.com", RequestKind::UnsecuredHttp), 0);
    }

    #[test]
    fn test_denied_request_skips_downgrade_counter() {
        let (_, manager) = manager("https://example.com/");
        assert!(!manager
            .is_request_permitted(&request("http://example.com/x.js", RequestKind::JavaScript))
            .unwrap());

        let counters = manager.request_counters();
        assert_eq!(counters.count("example.com", RequestKind::JavaScript), 1);
        assert_eq!(counters.count("example.com", RequestKind::UnsecuredHttp), 0);
    }

    #[test]
    fn test_allow_all_first_party_requests() {
        let (_, manager) = manager("http://example.com/");
        set_frame_permission(&manager, "example.com", None, Permission::Deny);

        assert!(!manager
            .is_request_permitted(&request("http://example.com/a.png", RequestKind::Image))
            .unwrap());
        assert_eq!(manager.request_counters().rejected, 1);

        manager.allow_all_first_party_requests().unwrap();
        let counters = manager.request_counters();
        assert_eq!(counters.rejected, 0);
        assert_eq!(counters.accepted, 1);

        assert!(manager
            .is_request_permitted(&request("http://example.com/b.png", RequestKind::Image))
            .unwrap());
        assert!(manager
            .is_request_permitted(&request("http://example.com/app.js", RequestKind::JavaScript))
            .unwrap());
    }

    #[test]
    fn test_allow_all_persists_across_navigations() {
        let (store, manager) = manager("http://example.com/");
        manager.allow_all_first_party_requests().unwrap();
        // Host cell was undecided, so nothing is taken back from rejected
        assert_eq!(manager.request_counters().accepted, 1);
        assert_eq!(manager.request_counters().rejected, 0);

        let next = RequestManager::new(store);
        next.reset(Url::parse("http://example.com/other").unwrap())
            .unwrap();
        assert!(next
            .is_request_permitted(&request("http://example.com/app.js", RequestKind::JavaScript))
            .unwrap());
    }

    #[test]
    fn test_counter_integrity() {
        let (_, manager) = manager("http://example.com/");

        for i in 0..5 {
            let url = format!("http://a.org/{}.png", i);
            manager
                .is_request_permitted(&request(&url, RequestKind::Image))
                .unwrap();
        }
        for i in 0..3 {
            let url = format!("http://b.org/{}.js", i);
            manager
                .is_request_permitted(&request(&url, RequestKind::JavaScript))
                .unwrap();
        }

        let counters = manager.request_counters();
        assert_eq!(counters.count("a.org", RequestKind::Image), 5);
        assert_eq!(counters.count("b.org", RequestKind::JavaScript), 3);
        assert_eq!(counters.accepted + counters.rejected, 8);
        assert_eq!(counters.accepted, 5);

        let hosts: Vec<&str> = counters.hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(hosts, vec!["a.org", "b.org", "example.com"]);
    }

    #[test]
    fn test_no_navigation_fails_closed() {
        let manager = RequestManager::new(Arc::new(InMemoryPermissionStore::new()));

        assert!(!manager
            .is_request_permitted(&request("http://a.org/a.png", RequestKind::Image))
            .unwrap());
        assert!(!manager
            .is_unsecured_http_permitted(&request("http://a.org/a.png", RequestKind::Image))
            .unwrap());
        manager.allow_all_first_party_requests().unwrap();

        let counters = manager.request_counters();
        assert_eq!(counters.rejected, 1);
        assert_eq!(counters.accepted, 0);
        assert!(counters.hosts.is_empty());
        assert!(manager.with_permission_system(|_| ()).is_none());
    }

    #[test]
    fn test_data_uri_uses_frame_identity() {
        let (_, manager) = manager("http://example.com/");
        let data = request("data:text/javascript,alert(1)", RequestKind::JavaScript);

        assert!(!manager.is_request_permitted(&data).unwrap());
        set_frame_permission(
            &manager,
            "example.com",
            Some(RequestKind::JavaScript),
            Permission::Allow,
        );
        assert!(manager.is_request_permitted(&data).unwrap());

        let counters = manager.request_counters();
        assert_eq!(counters.count("example.com", RequestKind::JavaScript), 2);
        assert_eq!(counters.count("", RequestKind::JavaScript), 0);
    }

    #[test]
    fn test_reset_clears_counters() {
        let (_, manager) = manager("http://example.com/");
        manager
            .is_request_permitted(&request("http://a.org/a.png", RequestKind::Image))
            .unwrap();

        manager.reset(Url::parse("http://other.net/").unwrap()).unwrap();
        let counters = manager.request_counters();
        assert_eq!(counters.accepted, 0);
        assert_eq!(counters.count("a.org", RequestKind::Image), 0);
        assert_eq!(counters.hosts.len(), 1);
        assert_eq!(counters.hosts[0].host, "other.net");

        manager.dump_counters();
    }

    #[test]
    fn test_counters_serialize() {
        let (_, manager) = manager("http://example.com/");
        manager
            .is_request_permitted(&request("http://example.com/a.css", RequestKind::Css))
            .unwrap();

        let json = serde_json::to_value(manager.request_counters()).unwrap();
        assert_eq!(json["accepted"], 1);
        assert_eq!(json["hosts"][0]["host"], "example.com");
        assert_eq!(json["hosts"][0]["counts"][1], 1);
    }

    #[test]
    fn test_store_error_propagates() {
        let store = Arc::new(FlakyStore::new());
        let manager = RequestManager::new(store.clone());
        manager.reset(Url::parse("http://example.com/").unwrap()).unwrap();

        store.set_failing(true);
        let image = request("http://new.org/a.png", RequestKind::Image);
        let result = manager.is_request_permitted(&image);
        assert!(matches!(result, Err(PermissionError::Storage(_))));

        // A failed check is neither accepted, rejected nor counted
        let counters = manager.request_counters();
        assert_eq!(counters.accepted, 0);
        assert_eq!(counters.rejected, 0);
        assert_eq!(counters.count("new.org", RequestKind::Image), 0);

        // No system survives a failed reset, so later checks are denied
        assert!(manager.reset(Url::parse("http://other.net/").unwrap()).is_err());
        store.set_failing(false);
        assert!(!manager.is_request_permitted(&image).unwrap());
        assert_eq!(manager.request_counters().rejected, 1);
        assert!(manager.with_permission_system(|_| ()).is_none());
    }

    #[test]
    fn test_concurrent_checks_keep_counters_consistent() {
        assert_send_sync::<RequestManager>();

        let (_, manager) = manager("http://example.com/");
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    for i in 0..200 {
                        let (url, kind) = if i % 4 == 0 {
                            (format!("http://t{}.org/{}.js", t, i), RequestKind::JavaScript)
                        } else {
                            (format!("http://t{}.org/{}.png", t, i), RequestKind::Image)
                        };
                        manager.is_request_permitted(&request(&url, kind)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let counters = manager.request_counters();
        let total: u32 = counters
            .hosts
            .iter()
            .flat_map(|h| h.counts.iter())
            .sum();
        assert_eq!(total, 1600);
        assert_eq!(counters.accepted + counters.rejected, total);
        assert_eq!(counters.accepted, 1200);
        assert_eq!(counters.count("t3.org", RequestKind::Image), 150);
    }

    #[test]
    fn test_counters_saturate() {
        let mut counters = HashMap::new();
        counters.insert("a.org".to_string(), [u32::MAX; RequestKind::COUNT]);

        count_request(&mut counters, "a.org", RequestKind::Image);
        assert_eq!(counters["a.org"][RequestKind::Image.ordinal()], u32::MAX);
    }
}
