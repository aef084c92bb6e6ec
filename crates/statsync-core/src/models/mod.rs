//! Data models for dashboard payloads.
//!
//! - `DatasetEnvelope`: the `{ data, source, count }` wrapper every endpoint returns
//! - `RegionStats`, `MonthlyStat`: employment-program statistics per region
//! - `RegionSummary`: entry of the region list
//! - `HealthStatus`: backend liveness check
//! - `UserPrefs`: preferences kept across cache clears
//!
//! With the `ts` feature these types also export TypeScript bindings for
//! the web front end.

pub mod prefs;
pub mod stats;

pub use prefs::UserPrefs;
pub use stats::{DatasetEnvelope, HealthStatus, MonthlyStat, RegionStats, RegionSummary};
