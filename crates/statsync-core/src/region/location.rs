//! Contract for the platform location service.
//!
//! The resolver only talks to `LocationProvider`; platform bindings (and the
//! fixed provider used by the CLI and tests) implement it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ResolverConfig;
use crate::error::ResolveError;

use super::model::GeoPoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            captured_at: Utc::now(),
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location service not supported")]
    Unsupported,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Location request timed out")]
    Timeout,
}

impl From<LocationError> for ResolveError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::PermissionDenied => ResolveError::PermissionDenied,
            LocationError::Unsupported => ResolveError::Unsupported,
            LocationError::PositionUnavailable(_) => ResolveError::PositionUnavailable,
            LocationError::Timeout => ResolveError::Timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet; asking will prompt the user.
    Prompt,
    /// No location service on this platform.
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
}

impl LocationOptions {
    pub fn from_config(config: &ResolverConfig, high_accuracy: bool) -> Self {
        let secs = if high_accuracy {
            config.high_accuracy_timeout_secs
        } else {
            config.low_accuracy_timeout_secs
        };
        Self {
            high_accuracy,
            timeout: Duration::from_secs(secs),
        }
    }
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self::from_config(&ResolverConfig::default(), true)
    }
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn permission(&self) -> PermissionState;

    /// Ask the user for permission. Providers without a prompt just report
    /// the current state.
    async fn request_permission(&self) -> PermissionState {
        self.permission().await
    }

    async fn current_fix(&self, options: &LocationOptions) -> Result<LocationFix, LocationError>;

    /// Stream of position updates. The stream ends when the receiver is
    /// dropped or the provider stops watching.
    fn watch_position(
        &self,
        options: &LocationOptions,
    ) -> mpsc::Receiver<Result<LocationFix, LocationError>>;
}

/// Provider with a fixed answer. Used where no platform service exists
/// (the CLI takes coordinates as arguments) and in tests.
#[derive(Debug, Clone)]
pub struct StaticLocationProvider {
    permission: PermissionState,
    outcome: Result<(f64, f64, f64), LocationError>,
    delay: Option<Duration>,
}

impl StaticLocationProvider {
    pub fn at(latitude: f64, longitude: f64, accuracy_meters: f64) -> Self {
        Self {
            permission: PermissionState::Granted,
            outcome: Ok((latitude, longitude, accuracy_meters)),
            delay: None,
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: PermissionState::Denied,
            outcome: Err(LocationError::PermissionDenied),
            delay: None,
        }
    }

    /// A platform without a location service.
    pub fn unsupported() -> Self {
        Self {
            permission: PermissionState::Unsupported,
            outcome: Err(LocationError::Unsupported),
            delay: None,
        }
    }

    pub fn failing(error: LocationError) -> Self {
        Self {
            permission: PermissionState::Granted,
            outcome: Err(error),
            delay: None,
        }
    }

    /// Wait this long before answering `current_fix`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn answer(&self) -> Result<LocationFix, LocationError> {
        self.outcome
            .clone()
            .map(|(lat, lon, accuracy)| LocationFix::new(lat, lon, accuracy))
    }
}

#[async_trait]
impl LocationProvider for StaticLocationProvider {
    async fn permission(&self) -> PermissionState {
        self.permission
    }

    async fn current_fix(&self, _options: &LocationOptions) -> Result<LocationFix, LocationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer()
    }

    fn watch_position(
        &self,
        _options: &LocationOptions,
    ) -> mpsc::Receiver<Result<LocationFix, LocationError>> {
        let (tx, rx) = mpsc::channel(1);
        // One update, then the sender drops and the stream ends
        let _ = tx.try_send(self.answer());
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_timeouts_follow_accuracy_mode() {
        let config = ResolverConfig::default();
        assert_eq!(
            LocationOptions::from_config(&config, true).timeout,
            Duration::from_secs(15)
        );
        assert_eq!(
            LocationOptions::from_config(&config, false).timeout,
            Duration::from_secs(8)
        );
    }

    #[tokio::test]
    async fn test_static_provider_watch_yields_once() {
        let provider = StaticLocationProvider::at(8.5, 76.9, 20.0);
        let mut rx = provider.watch_position(&LocationOptions::default());
        let fix = rx.recv().await.unwrap().unwrap();
        assert_eq!(fix.latitude, 8.5);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_location_errors_map_to_resolve_errors() {
        assert_eq!(
            ResolveError::from(LocationError::Timeout),
            ResolveError::Timeout
        );
        assert_eq!(
            ResolveError::from(LocationError::PositionUnavailable("no signal".into())),
            ResolveError::PositionUnavailable
        );
    }
}
