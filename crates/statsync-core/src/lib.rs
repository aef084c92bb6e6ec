//! statsync-core - offline-resilient data layer for the program statistics dashboard.
//!
//! This crate contains everything below the presentation layer:
//!
//! - `cache`: quota-aware key/value cache with per-entry expiry
//! - `queue`: offline request queue replayed when connectivity returns
//! - `sync`: the orchestrator every dataset request goes through
//!   (network → cache → fallback)
//! - `region`: coordinate fix to administrative region resolution
//! - `dashboard`: a facade wiring the components together from a `Config`

pub mod api;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod models;
pub mod network;
pub mod queue;
pub mod region;
pub mod storage;
pub mod sync;
pub mod utils;

pub use api::{ApiClient, ApiError, DataClass, Method, RequestSpec, Transport};
pub use cache::{CacheEntry, CacheStatus, CacheStore, EntrySource, WriteResult};
pub use cancel::{CancelRegistry, CancelToken};
pub use config::Config;
pub use dashboard::Dashboard;
pub use error::{ErrorKind, FailureLabel, ResolveError, StorageError, SyncError};
pub use network::NetworkState;
pub use queue::{DrainReport, OfflineQueue, QueueItem, RequestDescriptor};
pub use region::{
    Confidence, LocationFix, LocationProvider, Region, RegionCatalog, RegionResolver, Resolution,
    ResolutionMethod, ResolutionResult, ResolvePhase,
};
pub use sync::{FetchOptions, FetchOutcome, FetchSource, SyncOrchestrator};
