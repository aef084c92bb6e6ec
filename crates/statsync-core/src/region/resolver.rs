use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, EntrySource, SetOptions};
use crate::cancel::CancelToken;
use crate::config::ResolverConfig;
use crate::error::ResolveError;

use super::geo::haversine_km;
use super::location::{LocationFix, LocationOptions, LocationProvider, PermissionState};
use super::model::{GeoPoint, Region, RegionCatalog};

/// Cache key of the last acquired fix.
pub const FIX_CACHE_KEY: &str = "location:fix";

/// Cache key of the last successful resolution.
pub const RESOLUTION_CACHE_KEY: &str = "location:resolution";

// ============================================================================
// Threshold tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodWeights {
    pub boundary: u32,
    pub landmark: u32,
    pub distance: u32,
}

impl Default for MethodWeights {
    fn default() -> Self {
        Self {
            boundary: 3,
            landmark: 2,
            distance: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            high: 3,
            medium: 2,
            low: 1,
        }
    }
}

/// Distance bands (km) and scoring weights for the three methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverThresholds {
    pub center_high_km: f64,
    pub center_medium_km: f64,
    /// Nearest-centre method abstains beyond this.
    pub max_center_distance_km: f64,
    pub landmark_high_km: f64,
    pub landmark_medium_km: f64,
    /// Nearest-landmark method abstains at or beyond this.
    pub landmark_max_km: f64,
    pub method_weights: MethodWeights,
    pub confidence_weights: ConfidenceWeights,
}

impl Default for ResolverThresholds {
    fn default() -> Self {
        Self {
            center_high_km: 10.0,
            center_medium_km: 25.0,
            max_center_distance_km: 100.0,
            landmark_high_km: 5.0,
            landmark_medium_km: 10.0,
            landmark_max_km: 15.0,
            method_weights: MethodWeights::default(),
            confidence_weights: ConfidenceWeights::default(),
        }
    }
}

impl ResolverThresholds {
    fn method_weight(&self, method: ResolutionMethod) -> u32 {
        match method {
            ResolutionMethod::Boundary => self.method_weights.boundary,
            ResolutionMethod::Landmark => self.method_weights.landmark,
            ResolutionMethod::Distance => self.method_weights.distance,
        }
    }

    fn confidence_weight(&self, confidence: Confidence) -> u32 {
        match confidence {
            Confidence::High => self.confidence_weights.high,
            Confidence::Medium => self.confidence_weights.medium,
            Confidence::Low => self.confidence_weights.low,
        }
    }

    fn score(&self, candidate: &Candidate<'_>) -> u32 {
        self.method_weight(candidate.method) + self.confidence_weight(candidate.confidence)
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMethod {
    Boundary,
    Distance,
    Landmark,
}

impl ResolutionMethod {
    /// Tie-break order: boundary, then landmark, then distance.
    fn precedence(self) -> u8 {
        match self {
            ResolutionMethod::Boundary => 2,
            ResolutionMethod::Landmark => 1,
            ResolutionMethod::Distance => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub region: Region,
    pub method: ResolutionMethod,
    pub confidence: Confidence,
    /// Two or more methods named the same region as the winner.
    pub consensus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    /// Served from the last-known cache after a location failure.
    #[serde(default)]
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolutionResult),
    OutsideKnownRegion,
}

impl Resolution {
    pub fn result(&self) -> Option<&ResolutionResult> {
        match self {
            Resolution::Resolved(result) => Some(result),
            Resolution::OutsideKnownRegion => None,
        }
    }

    pub fn region_code(&self) -> Option<&str> {
        self.result().map(|r| r.region.code.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvePhase {
    Idle,
    RequestingPermission,
    AcquiringFix,
    Resolving,
    Resolved,
    OutsideKnownRegion,
    Failed,
}

#[derive(Clone)]
pub struct ResolveOptions {
    pub high_accuracy: bool,
    /// Overrides the configured timeout for this accuracy mode.
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: None,
            cancel: CancelToken::never(),
        }
    }
}

// ============================================================================
// Pure resolution
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    region: &'a Region,
    method: ResolutionMethod,
    confidence: Confidence,
    distance_km: f64,
}

fn band(distance_km: f64, high_km: f64, medium_km: f64) -> Confidence {
    if distance_km < high_km {
        Confidence::High
    } else if distance_km < medium_km {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

fn by_boundary(catalog: &RegionCatalog, point: GeoPoint) -> Option<Candidate<'_>> {
    let containing: Vec<(&Region, f64)> = catalog
        .regions()
        .iter()
        .filter(|r| r.bounding_box.contains(point))
        .map(|r| (r, haversine_km(point, r.center_point)))
        .collect();
    let confidence = match containing.len() {
        0 => return None,
        1 => Confidence::High,
        // Overlapping boxes: nearest centre wins, with less certainty
        _ => Confidence::Medium,
    };
    containing
        .into_iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(region, distance_km)| Candidate {
            region,
            method: ResolutionMethod::Boundary,
            confidence,
            distance_km,
        })
}

fn by_distance<'a>(
    catalog: &'a RegionCatalog,
    thresholds: &ResolverThresholds,
    point: GeoPoint,
) -> Option<Candidate<'a>> {
    let (region, distance_km) = catalog
        .regions()
        .iter()
        .map(|r| (r, haversine_km(point, r.center_point)))
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    if distance_km > thresholds.max_center_distance_km {
        return None;
    }
    Some(Candidate {
        region,
        method: ResolutionMethod::Distance,
        confidence: band(distance_km, thresholds.center_high_km, thresholds.center_medium_km),
        distance_km,
    })
}

fn by_landmark<'a>(
    catalog: &'a RegionCatalog,
    thresholds: &ResolverThresholds,
    point: GeoPoint,
) -> Option<Candidate<'a>> {
    let (region, distance_km) = catalog
        .regions()
        .iter()
        .flat_map(|r| r.landmarks.iter().map(move |l| (r, haversine_km(point, l.point))))
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    if distance_km >= thresholds.landmark_max_km {
        return None;
    }
    Some(Candidate {
        region,
        method: ResolutionMethod::Landmark,
        confidence: band(
            distance_km,
            thresholds.landmark_high_km,
            thresholds.landmark_medium_km,
        ),
        distance_km,
    })
}

/// Run all three methods on `point` and reconcile them.
pub fn resolve_point(
    catalog: &RegionCatalog,
    thresholds: &ResolverThresholds,
    point: GeoPoint,
) -> Resolution {
    let candidates: Vec<Candidate> = [
        by_boundary(catalog, point),
        by_distance(catalog, thresholds, point),
        by_landmark(catalog, thresholds, point),
    ]
    .into_iter()
    .flatten()
    .collect();

    let winner = candidates.iter().max_by(|a, b| {
        thresholds
            .score(a)
            .cmp(&thresholds.score(b))
            .then(a.method.precedence().cmp(&b.method.precedence()))
    });

    match winner {
        Some(winner) => {
            let agreeing = candidates
                .iter()
                .filter(|c| c.region.code == winner.region.code)
                .count();
            Resolution::Resolved(ResolutionResult {
                region: winner.region.clone(),
                method: winner.method,
                confidence: winner.confidence,
                consensus: agreeing >= 2,
                distance_km: Some(winner.distance_km),
                from_cache: false,
            })
        }
        None => Resolution::OutsideKnownRegion,
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Acquires a fix from the location service and resolves it to a region,
/// publishing progress on a `watch` channel.
pub struct RegionResolver {
    catalog: Arc<RegionCatalog>,
    provider: Arc<dyn LocationProvider>,
    cache: Arc<CacheStore>,
    config: ResolverConfig,
    phase: watch::Sender<ResolvePhase>,
}

impl RegionResolver {
    pub fn new(
        catalog: Arc<RegionCatalog>,
        provider: Arc<dyn LocationProvider>,
        cache: Arc<CacheStore>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            catalog,
            provider,
            cache,
            config,
            phase: watch::channel(ResolvePhase::Idle).0,
        }
    }

    pub fn catalog(&self) -> &RegionCatalog {
        &self.catalog
    }

    pub fn phase(&self) -> ResolvePhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResolvePhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: ResolvePhase) {
        debug!(?phase, "Resolver phase");
        self.phase.send_replace(phase);
    }

    /// Resolve a fix without involving the location service.
    pub fn resolve_fix(&self, fix: &LocationFix) -> Resolution {
        resolve_point(&self.catalog, &self.config.thresholds, fix.point())
    }

    /// Last cached resolution, if still fresh.
    pub fn last_resolution(&self) -> Option<ResolutionResult> {
        self.cache
            .get::<ResolutionResult>(RESOLUTION_CACHE_KEY, None)
            .map(|mut result| {
                result.from_cache = true;
                result
            })
    }

    /// Acquire a fix and resolve it. On a location failure the cached
    /// result (or cached fix) is served instead, marked `from_cache`.
    pub async fn resolve_region(&self, options: ResolveOptions) -> Result<Resolution, ResolveError> {
        let cancel = options.cancel.clone();
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
            result = self.acquire_fix(&options) => result,
        };

        match acquired {
            Ok(fix) => Ok(self.finish_with_fix(fix)),
            Err(ResolveError::Cancelled) => {
                info!("Region resolution cancelled");
                self.set_phase(ResolvePhase::Idle);
                Err(ResolveError::Cancelled)
            }
            Err(e) => self.fall_back(e),
        }
    }

    async fn acquire_fix(&self, options: &ResolveOptions) -> Result<LocationFix, ResolveError> {
        self.set_phase(ResolvePhase::RequestingPermission);
        let mut permission = self.provider.permission().await;
        if permission == PermissionState::Prompt {
            permission = self.provider.request_permission().await;
        }
        match permission {
            PermissionState::Granted => {}
            PermissionState::Unsupported => return Err(ResolveError::Unsupported),
            PermissionState::Denied | PermissionState::Prompt => {
                return Err(ResolveError::PermissionDenied)
            }
        }

        self.set_phase(ResolvePhase::AcquiringFix);
        let mut location_options = LocationOptions::from_config(&self.config, options.high_accuracy);
        if let Some(timeout) = options.timeout {
            location_options.timeout = timeout;
        }
        match tokio::time::timeout(
            location_options.timeout,
            self.provider.current_fix(&location_options),
        )
        .await
        {
            Ok(Ok(fix)) => Ok(fix),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ResolveError::Timeout),
        }
    }

    /// Follow position updates, refreshing the cached fix and resolution on
    /// each one, until `shutdown` fires or the stream ends. Never prompts for
    /// permission, and stops at the first error that needs the user.
    pub fn spawn_watch(
        self: &Arc<Self>,
        high_accuracy: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let options = LocationOptions::from_config(&self.config, high_accuracy);
        tokio::spawn(async move {
            let permission = this.provider.permission().await;
            if permission != PermissionState::Granted {
                debug!(?permission, "Not watching position");
                return;
            }
            let mut updates = this.provider.watch_position(&options);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(Ok(fix)) => {
                            this.finish_with_fix(fix);
                        }
                        Some(Err(e)) => {
                            let error = ResolveError::from(e);
                            if !error.is_auto_retryable() {
                                warn!(error = %error, kind = ?error.kind(), "Position updates failed, stopping watch");
                                break;
                            }
                            debug!(error = %error, "Position update failed");
                        }
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Position watch stopped");
        })
    }

    fn finish_with_fix(&self, fix: LocationFix) -> Resolution {
        let ttl = &self.cache.config().ttl;
        let written = self.cache.set(
            FIX_CACHE_KEY,
            &fix,
            SetOptions::new(EntrySource::System, ttl.location_fix()),
        );
        if !written.is_ok() {
            warn!(reason = ?written.reason, "Failed to cache location fix");
        }

        self.set_phase(ResolvePhase::Resolving);
        let resolution = self.resolve_fix(&fix);
        match &resolution {
            Resolution::Resolved(result) => {
                info!(
                    region = %result.region.code,
                    method = ?result.method,
                    confidence = ?result.confidence,
                    consensus = result.consensus,
                    "Region resolved"
                );
                self.cache.set(
                    RESOLUTION_CACHE_KEY,
                    result,
                    SetOptions::new(EntrySource::System, ttl.resolution()),
                );
                self.set_phase(ResolvePhase::Resolved);
            }
            Resolution::OutsideKnownRegion => {
                info!(
                    latitude = fix.latitude,
                    longitude = fix.longitude,
                    "Fix is outside known regions"
                );
                self.set_phase(ResolvePhase::OutsideKnownRegion);
            }
        }
        resolution
    }

    fn fall_back(&self, error: ResolveError) -> Result<Resolution, ResolveError> {
        warn!(error = %error, kind = ?error.kind(), "Location unavailable, trying last known region");
        if let Some(result) = self.last_resolution() {
            self.set_phase(ResolvePhase::Resolved);
            return Ok(Resolution::Resolved(result));
        }
        if let Some(fix) = self.cache.get::<LocationFix>(FIX_CACHE_KEY, None) {
            if let Resolution::Resolved(mut result) = self.resolve_fix(&fix) {
                result.from_cache = true;
                self.set_phase(ResolvePhase::Resolved);
                return Ok(Resolution::Resolved(result));
            }
        }
        self.set_phase(ResolvePhase::Failed);
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::region::location::{LocationError, StaticLocationProvider};
    use crate::region::model::{BoundingBox, Landmark};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn region(code: &str, bbox: (f64, f64, f64, f64), center: (f64, f64), landmarks: &[(f64, f64)]) -> Region {
        let (south, north, west, east) = bbox;
        Region {
            code: code.to_string(),
            display_name: code.to_string(),
            bounding_box: BoundingBox {
                north,
                south,
                east,
                west,
            },
            center_point: GeoPoint::new(center.0, center.1),
            landmarks: landmarks
                .iter()
                .enumerate()
                .map(|(i, (lat, lon))| Landmark {
                    name: format!("{}-{}", code, i),
                    point: GeoPoint::new(*lat, *lon),
                })
                .collect(),
        }
    }

    fn resolved(resolution: Resolution) -> ResolutionResult {
        match resolution {
            Resolution::Resolved(result) => result,
            Resolution::OutsideKnownRegion => panic!("expected a resolved region"),
        }
    }

    fn two_regions() -> RegionCatalog {
        RegionCatalog::new(vec![
            region("A", (0.0, 1.0, 0.0, 1.0), (0.5, 0.5), &[(0.5, 0.52)]),
            region("B", (1.0, 2.0, 0.0, 1.0), (1.5, 0.5), &[]),
        ])
        .unwrap()
    }

    #[test]
    fn test_all_methods_agree_gives_consensus() {
        let result = resolved(resolve_point(
            &two_regions(),
            &ResolverThresholds::default(),
            GeoPoint::new(0.5, 0.5),
        ));
        assert_eq!(result.region.code, "A");
        assert_eq!(result.method, ResolutionMethod::Boundary);
        assert_eq!(result.confidence, Confidence::High);
        assert!(result.consensus);
    }

    #[test]
    fn test_far_fix_is_outside_known_regions() {
        let resolution = resolve_point(
            &two_regions(),
            &ResolverThresholds::default(),
            GeoPoint::new(10.0, 10.0),
        );
        assert_eq!(resolution, Resolution::OutsideKnownRegion);
    }

    #[test]
    fn test_overlapping_boxes_pick_nearest_centre_with_medium() {
        let catalog = RegionCatalog::new(vec![
            region("A", (0.0, 1.0, 0.0, 1.0), (0.5, 0.5), &[]),
            region("B", (0.9, 2.0, 0.0, 1.0), (1.5, 0.5), &[]),
        ])
        .unwrap();
        let result = resolved(resolve_point(
            &catalog,
            &ResolverThresholds::default(),
            GeoPoint::new(0.95, 0.5),
        ));
        assert_eq!(result.region.code, "A");
        assert_eq!(result.method, ResolutionMethod::Boundary);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn test_landmark_outranks_distant_centre() {
        let catalog = RegionCatalog::new(vec![region(
            "C",
            (5.0, 6.0, 5.0, 6.0),
            (5.5, 5.5),
            &[(4.95, 5.5)],
        )])
        .unwrap();
        let result = resolved(resolve_point(
            &catalog,
            &ResolverThresholds::default(),
            GeoPoint::new(4.9, 5.5),
        ));
        assert_eq!(result.method, ResolutionMethod::Landmark);
        assert_eq!(result.confidence, Confidence::Medium);
        assert!(result.consensus);
        let distance = result.distance_km.unwrap();
        assert!((distance - 5.56).abs() < 0.05, "got {}", distance);
    }

    #[test]
    fn test_boundary_precedence_over_agreeing_methods() {
        // Landmark and centre both point at B, but the fix is inside A's box
        let catalog = RegionCatalog::new(vec![
            region("A", (0.0, 1.0, 0.0, 1.0), (0.5, 0.5), &[]),
            region("B", (1.0, 2.0, 0.0, 1.0), (1.05, 0.9), &[(0.92, 0.9)]),
        ])
        .unwrap();
        let result = resolved(resolve_point(
            &catalog,
            &ResolverThresholds::default(),
            GeoPoint::new(0.92, 0.9),
        ));
        assert_eq!(result.region.code, "A");
        assert_eq!(result.method, ResolutionMethod::Boundary);
        assert!(!result.consensus);
    }

    #[test]
    fn test_every_bundled_landmark_resolves_to_its_region() {
        let catalog = RegionCatalog::load_default().unwrap();
        let thresholds = ResolverThresholds::default();
        let mut checked = 0;
        for region in catalog.regions() {
            for landmark in &region.landmarks {
                let result = resolved(resolve_point(&catalog, &thresholds, landmark.point));
                assert_eq!(result.region.code, region.code, "landmark {}", landmark.name);
                assert!(result.consensus, "landmark {}", landmark.name);
                checked += 1;
            }
        }
        assert!(checked > 0);
    }

    #[test]
    fn test_centre_bands() {
        assert_eq!(band(9.9, 10.0, 25.0), Confidence::High);
        assert_eq!(band(10.0, 10.0, 25.0), Confidence::Medium);
        assert_eq!(band(30.0, 10.0, 25.0), Confidence::Low);
    }

    fn cache() -> Arc<CacheStore> {
        Arc::new(CacheStore::open(
            Arc::new(MemoryStore::new()),
            CacheConfig::default(),
        ))
    }

    fn resolver(provider: StaticLocationProvider, cache: Arc<CacheStore>) -> RegionResolver {
        RegionResolver::new(
            Arc::new(two_regions()),
            Arc::new(provider),
            cache,
            ResolverConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_resolve_region_publishes_phases_and_caches() {
        let cache = cache();
        let resolver = resolver(StaticLocationProvider::at(0.5, 0.5, 15.0), cache.clone());
        let rx = resolver.subscribe();

        let resolution = resolver.resolve_region(ResolveOptions::default()).await.unwrap();
        assert_eq!(resolution.region_code(), Some("A"));
        assert_eq!(*rx.borrow(), ResolvePhase::Resolved);
        assert!(cache.is_valid(FIX_CACHE_KEY));
        assert!(cache.is_valid(RESOLUTION_CACHE_KEY));
    }

    #[tokio::test]
    async fn test_location_failure_falls_back_to_cached_result() {
        let cache = cache();
        resolver(StaticLocationProvider::at(0.5, 0.5, 15.0), cache.clone())
            .resolve_region(ResolveOptions::default())
            .await
            .unwrap();

        let failing = resolver(
            StaticLocationProvider::failing(LocationError::Timeout),
            cache,
        );
        let result = resolved(failing.resolve_region(ResolveOptions::default()).await.unwrap());
        assert_eq!(result.region.code, "A");
        assert!(result.from_cache);
        assert_eq!(failing.phase(), ResolvePhase::Resolved);
    }

    #[tokio::test]
    async fn test_cached_fix_used_when_result_missing() {
        let cache = cache();
        cache.set(
            FIX_CACHE_KEY,
            &LocationFix::new(1.5, 0.5, 10.0),
            SetOptions::new(EntrySource::System, chrono::Duration::minutes(5)),
        );
        let failing = resolver(
            StaticLocationProvider::failing(LocationError::PositionUnavailable("no signal".into())),
            cache,
        );
        let result = resolved(failing.resolve_region(ResolveOptions::default()).await.unwrap());
        assert_eq!(result.region.code, "B");
        assert!(result.from_cache);
    }

    #[tokio::test]
    async fn test_failure_without_cache_reports_error() {
        let resolver = resolver(StaticLocationProvider::denied(), cache());
        let err = resolver
            .resolve_region(ResolveOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::PermissionDenied);
        assert_eq!(resolver.phase(), ResolvePhase::Failed);
    }

    #[tokio::test]
    async fn test_slow_fix_times_out() {
        let resolver = resolver(
            StaticLocationProvider::at(0.5, 0.5, 15.0).with_delay(Duration::from_secs(5)),
            cache(),
        );
        let options = ResolveOptions {
            timeout: Some(Duration::from_millis(20)),
            ..ResolveOptions::default()
        };
        let err = resolver.resolve_region(options).await.unwrap_err();
        assert_eq!(err, ResolveError::Timeout);
    }

    #[tokio::test]
    async fn test_cancellation_stops_acquisition() {
        let resolver = resolver(
            StaticLocationProvider::at(0.5, 0.5, 15.0).with_delay(Duration::from_secs(5)),
            cache(),
        );
        let (handle, token) = CancelToken::new();
        let options = ResolveOptions {
            cancel: token,
            ..ResolveOptions::default()
        };
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let err = resolver.resolve_region(options).await.unwrap_err();
        assert_eq!(err, ResolveError::Cancelled);
        assert_eq!(resolver.phase(), ResolvePhase::Idle);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_outside_fix_sets_phase_and_skips_result_cache() {
        let cache = cache();
        let resolver = resolver(StaticLocationProvider::at(40.0, 40.0, 15.0), cache.clone());
        let resolution = resolver.resolve_region(ResolveOptions::default()).await.unwrap();
        assert_eq!(resolution, Resolution::OutsideKnownRegion);
        assert_eq!(resolver.phase(), ResolvePhase::OutsideKnownRegion);
        assert!(!cache.is_valid(RESOLUTION_CACHE_KEY));
    }

    #[tokio::test]
    async fn test_unsupported_platform_reports_unsupported() {
        let resolver = resolver(StaticLocationProvider::unsupported(), cache());
        let err = resolver
            .resolve_region(ResolveOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::Unsupported);
        assert_eq!(resolver.phase(), ResolvePhase::Failed);
    }

    #[tokio::test]
    async fn test_watch_refreshes_cached_resolution() {
        let cache = cache();
        let resolver = Arc::new(resolver(StaticLocationProvider::at(1.5, 0.5, 10.0), cache.clone()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        // The static provider sends one update and closes the stream
        let handle = resolver.spawn_watch(true, shutdown_rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(cache.is_valid(FIX_CACHE_KEY));
        assert_eq!(resolver.last_resolution().unwrap().region.code, "B");
        assert_eq!(resolver.phase(), ResolvePhase::Resolved);
    }

    #[tokio::test]
    async fn test_watch_not_started_without_permission() {
        let cache = cache();
        let resolver = Arc::new(resolver(StaticLocationProvider::denied(), cache.clone()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = resolver.spawn_watch(false, shutdown_rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!cache.is_valid(FIX_CACHE_KEY));
        assert_eq!(resolver.phase(), ResolvePhase::Idle);
    }

    /// Grants permission and keeps the position stream open without updates.
    #[derive(Default)]
    struct QuietProvider {
        senders: Mutex<Vec<mpsc::Sender<Result<LocationFix, LocationError>>>>,
    }

    #[async_trait]
    impl LocationProvider for QuietProvider {
        async fn permission(&self) -> PermissionState {
            PermissionState::Granted
        }

        async fn current_fix(&self, _options: &LocationOptions) -> Result<LocationFix, LocationError> {
            Err(LocationError::Timeout)
        }

        fn watch_position(
            &self,
            _options: &LocationOptions,
        ) -> mpsc::Receiver<Result<LocationFix, LocationError>> {
            let (tx, rx) = mpsc::channel(1);
            self.senders.lock().unwrap().push(tx);
            rx
        }
    }

    #[tokio::test]
    async fn test_watch_stops_on_shutdown() {
        let resolver = Arc::new(RegionResolver::new(
            Arc::new(two_regions()),
            Arc::new(QuietProvider::default()),
            cache(),
            ResolverConfig::default(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = resolver.spawn_watch(true, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
