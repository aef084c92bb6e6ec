use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Catalog compiled into the binary, used unless the config names another file.
const DEFAULT_CATALOG: &str = include_str!("../../data/regions.json");

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    /// Inclusive on every edge.
    pub fn contains(&self, point: GeoPoint) -> bool {
        point.latitude >= self.south
            && point.latitude <= self.north
            && point.longitude >= self.west
            && point.longitude <= self.east
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub name: String,
    pub point: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub code: String,
    pub display_name: String,
    pub bounding_box: BoundingBox,
    pub center_point: GeoPoint,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    regions: Vec<Region>,
}

/// The immutable set of regions known to the resolver.
#[derive(Debug, Clone, Default)]
pub struct RegionCatalog {
    regions: Vec<Region>,
}

impl RegionCatalog {
    pub fn new(regions: Vec<Region>) -> Result<Self> {
        let mut seen = HashSet::new();
        for region in &regions {
            if region.code.trim().is_empty() {
                bail!("Region with empty code: {}", region.display_name);
            }
            if !seen.insert(region.code.as_str()) {
                bail!("Duplicate region code: {}", region.code);
            }
            let bbox = &region.bounding_box;
            if bbox.south > bbox.north || bbox.west > bbox.east {
                bail!("Invalid bounding box for region {}", region.code);
            }
        }
        Ok(Self { regions })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json).context("Failed to parse region catalog")?;
        Self::new(file.regions)
    }

    /// The catalog bundled with the crate.
    pub fn load_default() -> Result<Self> {
        Self::from_json(DEFAULT_CATALOG)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read region catalog: {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Invalid region catalog: {}", path.display()))
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn find(&self, code: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.code.eq_ignore_ascii_case(code))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
