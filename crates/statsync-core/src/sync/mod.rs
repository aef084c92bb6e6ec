//! Sync orchestration.
//!
//! `SyncOrchestrator::fetch_data` is the single entry point for dataset
//! requests. It tries the network (with bounded retry), then the cache, then
//! a generated fallback, and always hands back a payload unless the call
//! was cancelled.

pub mod backoff;
pub mod fallback;
pub mod orchestrator;

pub use backoff::RetryPolicy;
pub use fallback::{FallbackGenerator, FALLBACK_SOURCE};
pub use orchestrator::{FetchOptions, FetchOutcome, FetchSource, SyncOrchestrator};
