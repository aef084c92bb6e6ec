//! Facade wiring the data layer together from a `Config`.
//!
//! Front ends (the CLI, a web bridge) hold one `Dashboard` and call the four
//! public operations on it: `fetch_data`, `resolve_region`, `cache_status`
//! and `clear_cache`. Background tasks (cache sweeper, reconnect listener,
//! position watch) are started with `start_background` and stopped with
//! `shutdown`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, RequestSpec, Transport};
use crate::cache::{CacheStatus, CacheStore, EntrySource, SetOptions, WriteResult, QUEUE_KEY, USER_PREFS_KEY};
use crate::config::Config;
use crate::error::{ResolveError, SyncError};
use crate::models::UserPrefs;
use crate::network::{NetworkState, Transition};
use crate::queue::{DrainReport, OfflineQueue};
use crate::region::{LocationProvider, Region, RegionCatalog, RegionResolver, Resolution, ResolveOptions};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::sync::{FallbackGenerator, FetchOptions, FetchOutcome, FetchSource, SyncOrchestrator};

/// Subdirectory of the cache dir holding the persistent store
const STORE_DIR: &str = "store";

pub struct Dashboard {
    config: Config,
    cache: Arc<CacheStore>,
    network: Arc<NetworkState>,
    sync: Arc<SyncOrchestrator>,
    resolver: Arc<RegionResolver>,
    catalog: Arc<RegionCatalog>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Dashboard {
    /// Build from config: file-backed store under the cache directory
    /// (memory-only if that fails), HTTP transport, and the configured or
    /// bundled region catalog.
    pub fn new(config: Config, provider: Arc<dyn LocationProvider>) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match config
            .cache_dir()
            .and_then(|dir| Ok(FileStore::new(dir.join(STORE_DIR))?))
        {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(error = %e, "Persistent storage unavailable, running memory-only");
                Arc::new(MemoryStore::new())
            }
        };
        let transport = Arc::new(ApiClient::new(&config.api)?);
        let catalog = match config.resolver.regions_file {
            Some(ref path) => RegionCatalog::from_path(path)?,
            None => RegionCatalog::load_default()?,
        };
        Ok(Self::with_parts(config, store, transport, provider, catalog))
    }

    /// Build from explicit parts. Used by tests and embedders with their own
    /// storage or transport.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        provider: Arc<dyn LocationProvider>,
        catalog: RegionCatalog,
    ) -> Self {
        let cache = Arc::new(CacheStore::open(store, config.cache.clone()));
        let network = NetworkState::new(!config.offline_mode);
        let queue = Arc::new(OfflineQueue::new(cache.clone(), network.clone()));
        let catalog = Arc::new(catalog);
        let sync = Arc::new(SyncOrchestrator::new(
            transport,
            cache.clone(),
            queue,
            network.clone(),
            FallbackGenerator::new(catalog.clone()),
            &config.api,
        ));
        let resolver = Arc::new(RegionResolver::new(
            catalog.clone(),
            provider,
            cache.clone(),
            config.resolver.clone(),
        ));
        info!(
            persistent = cache.is_persistent(),
            online = network.is_online(),
            regions = catalog.len(),
            "Dashboard data layer ready"
        );
        Self {
            config,
            cache,
            network,
            sync,
            resolver,
            catalog,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sync(&self) -> &Arc<SyncOrchestrator> {
        &self.sync
    }

    pub fn resolver(&self) -> &Arc<RegionResolver> {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn network(&self) -> &Arc<NetworkState> {
        &self.network
    }

    pub fn catalog(&self) -> &RegionCatalog {
        &self.catalog
    }

    pub async fn fetch_data(
        &self,
        spec: &RequestSpec,
        options: FetchOptions,
    ) -> Result<FetchOutcome, SyncError> {
        self.sync.fetch_data(spec, options).await
    }

    pub async fn resolve_region(&self, options: ResolveOptions) -> Result<Resolution, ResolveError> {
        self.resolver.resolve_region(options).await
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.cache.status()
    }

    /// Remove cached data. The offline queue is always kept; user
    /// preferences are kept when asked.
    pub fn clear_cache(&self, preserve_user_prefs: bool) -> usize {
        let mut preserve = vec![QUEUE_KEY];
        if preserve_user_prefs {
            preserve.push(USER_PREFS_KEY);
        }
        self.cache.clear(&preserve)
    }

    /// Feed a platform connectivity event.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        self.network.set_online(online)
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    pub async fn replay_queue(&self) -> DrainReport {
        self.sync.replay_queue().await
    }

    pub fn user_prefs(&self) -> UserPrefs {
        self.cache
            .get::<UserPrefs>(USER_PREFS_KEY, None)
            .unwrap_or_default()
    }

    pub fn save_user_prefs(&self, prefs: &UserPrefs) -> WriteResult {
        self.cache
            .set(USER_PREFS_KEY, prefs, SetOptions::reserved(EntrySource::User))
    }

    /// Remember a manually chosen region. `None` if the code is unknown.
    pub fn select_region(&self, code: &str) -> Option<Region> {
        let region = self.catalog.find(code)?.clone();
        let mut prefs = self.user_prefs();
        prefs.preferred_region = Some(region.code.clone());
        let result = self.save_user_prefs(&prefs);
        if !result.is_ok() {
            warn!(reason = ?result.reason, "Failed to save preferred region");
        }
        Some(region)
    }

    /// Fetch every dataset the dashboard shows, filling the cache.
    /// Returns how many came from the network.
    pub async fn warm_cache(&self) -> usize {
        let mut specs = vec![RequestSpec::regions(), RequestSpec::all_data(), RequestSpec::health()];
        specs.extend(
            self.catalog
                .regions()
                .iter()
                .map(|r| RequestSpec::region_data(&r.code)),
        );
        let results = self.sync.prefetch_all(specs).await;
        let fetched = results
            .iter()
            .filter(|(_, r)| matches!(r, Ok(o) if o.source == FetchSource::Network))
            .count();
        info!(fetched, total = results.len(), "Cache warmed");
        fetched
    }

    /// Start the cache sweeper, the reconnect listener and the position
    /// watch.
    pub fn start_background(&self) {
        let interval = Duration::from_secs(self.config.cache.sweep_interval_secs.max(1));
        let sweeper = self
            .cache
            .spawn_sweeper(interval, self.network.shutdown_signal());
        let listener = self.sync.spawn_reconnect_listener();
        let watch = self
            .resolver
            .spawn_watch(true, self.network.shutdown_signal());
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        background.push(sweeper);
        background.push(listener);
        background.push(watch);
        debug!("Background tasks started");
    }

    /// Signal background tasks to stop and wait for them.
    pub async fn shutdown(&self) {
        self.network.shutdown();
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Dashboard shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::region::StaticLocationProvider;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn send(&self, _spec: &RequestSpec) -> Result<Value, ApiError> {
            Err(ApiError::Unreachable("connection refused".into()))
        }
    }

    fn dashboard(offline: bool) -> Dashboard {
        let config = Config {
            offline_mode: offline,
            ..Config::default()
        };
        Dashboard::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(Unreachable),
            Arc::new(StaticLocationProvider::at(8.5241, 76.9366, 20.0)),
            RegionCatalog::load_default().unwrap(),
        )
    }

    #[test]
    fn test_clear_cache_preserves_queue_and_optionally_prefs() {
        let dashboard = dashboard(true);
        dashboard.select_region("KL-KKD").unwrap();
        dashboard.cache().set(
            "data:GET /regions",
            &json!({"data": []}),
            SetOptions::new(EntrySource::Network, chrono::Duration::hours(1)),
        );
        dashboard.cache().set(
            QUEUE_KEY,
            &json!([]),
            SetOptions::new(EntrySource::System, chrono::Duration::hours(1)),
        );

        assert_eq!(dashboard.clear_cache(true), 1);
        assert_eq!(
            dashboard.user_prefs().preferred_region.as_deref(),
            Some("KL-KKD")
        );
        assert!(dashboard.cache().is_valid(QUEUE_KEY));

        dashboard.clear_cache(false);
        assert_eq!(dashboard.user_prefs(), UserPrefs::default());
        assert!(dashboard.cache().is_valid(QUEUE_KEY));
    }

    #[test]
    fn test_select_unknown_region() {
        assert!(dashboard(true).select_region("XX-NOPE").is_none());
    }

    #[tokio::test]
    async fn test_resolve_region_through_facade() {
        let resolution = dashboard(true)
            .resolve_region(ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(resolution.region_code(), Some("KL-TVM"));
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_shutdown() {
        let dashboard = dashboard(false);
        dashboard.start_background();
        tokio::time::timeout(Duration::from_secs(2), dashboard.shutdown())
            .await
            .unwrap();
        assert!(dashboard.network().is_shut_down());
    }

    #[tokio::test]
    async fn test_background_watch_caches_current_region() {
        let dashboard = dashboard(true);
        dashboard.start_background();
        let mut cached = None;
        for _ in 0..100 {
            cached = dashboard.resolver().last_resolution();
            if cached.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cached.unwrap().region.code, "KL-TVM");
        dashboard.shutdown().await;
    }

    #[tokio::test]
    async fn test_cache_status_reports_memory_only() {
        let dashboard = dashboard(true);
        let status = dashboard.cache_status();
        assert!(!status.persistent);
        assert_eq!(status.entry_count, 0);
        assert_eq!(status.last_sync_display(), "never");
    }
}
