use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper every endpoint responds with. `source` and `count` are optional
/// annotations passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DatasetEnvelope<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Set on generated fallback payloads only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

impl<T> DatasetEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            source: None,
            count: None,
            synthetic: false,
        }
    }
}

/// Employment-program statistics for one region and financial year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RegionStats {
    pub region_code: String,
    pub region_name: String,
    pub financial_year: String,
    pub households_employed: u64,
    pub persondays_generated: u64,
    /// Share of persondays worked by women, 0-100
    pub women_participation_pct: f64,
    pub average_days_per_household: f64,
    pub average_wage_rate: f64,
    pub total_expenditure: f64,
    pub works_completed: u64,
    pub works_in_progress: u64,
    #[serde(default)]
    pub monthly: Vec<MonthlyStat>,
}

impl RegionStats {
    /// Persondays per employed household, 0 when nobody was employed.
    pub fn persondays_per_household(&self) -> f64 {
        if self.households_employed == 0 {
            0.0
        } else {
            self.persondays_generated as f64 / self.households_employed as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct MonthlyStat {
    /// Month label, e.g. "Apr"
    pub month: String,
    pub persondays: u64,
    pub expenditure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RegionSummary {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub database: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok") || self.status.eq_ignore_ascii_case("healthy")
    }
}
