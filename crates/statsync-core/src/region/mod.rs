//! Region resolution.
//!
//! Turns a coordinate fix from the platform location service into an
//! administrative region using three independent methods (bounding box,
//! nearest centre, nearest landmark) reconciled by a weighted score.
//!
//! - `model`: `Region`, `RegionCatalog` and geometry primitives
//! - `geo`: great-circle distance
//! - `location`: the `LocationProvider` contract and a static provider
//! - `resolver`: `RegionResolver` and its threshold tables

pub mod geo;
pub mod location;
pub mod model;
pub mod resolver;

pub use location::{
    LocationError, LocationFix, LocationOptions, LocationProvider, PermissionState,
    StaticLocationProvider,
};
pub use model::{BoundingBox, GeoPoint, Landmark, Region, RegionCatalog};
pub use resolver::{
    Confidence, ConfidenceWeights, MethodWeights, RegionResolver, Resolution, ResolutionMethod,
    ResolutionResult, ResolveOptions, ResolvePhase, ResolverThresholds,
};
