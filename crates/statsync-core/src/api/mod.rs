//! Remote data API module.
//!
//! This module provides the `RequestSpec` describing a dataset request,
//! the `Transport` trait the orchestrator sends requests through, and the
//! reqwest-backed `ApiClient` implementing it against the statistics API.
//!
//! Endpoints return JSON envelopes `{ data, source?, count? }`:
//! - `GET /data`: aggregate statistics for all regions
//! - `GET /regions`: the region list
//! - `GET /regions/{code}/data`: statistics for one region
//! - `GET /health`: backend liveness

pub mod client;
pub mod error;
pub mod request;

pub use client::ApiClient;
pub use error::ApiError;
pub use request::{DataClass, Method, RequestSpec};

use async_trait::async_trait;
use serde_json::Value;

/// Anything that can execute a `RequestSpec` and hand back the JSON body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, spec: &RequestSpec) -> Result<Value, ApiError>;
}
