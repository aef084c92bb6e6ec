//! Synthetic payloads served when neither the network nor the cache can
//! answer. They mirror the real response shapes so the dashboard renders,
//! and are always marked `source: "fallback"` and `synthetic: true`.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

use crate::api::RequestSpec;
use crate::models::{DatasetEnvelope, HealthStatus, MonthlyStat, RegionStats, RegionSummary};
use crate::region::RegionCatalog;

pub const FALLBACK_SOURCE: &str = "fallback";

/// Financial-year months, April first
const FY_MONTHS: [&str; 12] = [
    "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec", "Jan", "Feb", "Mar",
];

pub struct FallbackGenerator {
    catalog: Arc<RegionCatalog>,
}

impl FallbackGenerator {
    pub fn new(catalog: Arc<RegionCatalog>) -> Self {
        Self { catalog }
    }

    /// Build a payload shaped like the response to `spec`. Never fails.
    pub fn generate(&self, spec: &RequestSpec) -> Value {
        if spec.method.is_mutating() {
            return Self::envelope(Value::Null, None);
        }
        let year = spec
            .params
            .get("year")
            .cloned()
            .unwrap_or_else(current_financial_year);

        match spec.path.as_str() {
            "/data" => {
                let stats: Vec<RegionStats> = self
                    .catalog
                    .regions()
                    .iter()
                    .map(|r| Self::region_stats(&r.code, &r.display_name, &year))
                    .collect();
                let count = stats.len() as u64;
                Self::envelope(stats, Some(count))
            }
            "/regions" => {
                let summaries: Vec<RegionSummary> = self
                    .catalog
                    .regions()
                    .iter()
                    .map(|r| RegionSummary {
                        code: r.code.clone(),
                        name: r.display_name.clone(),
                    })
                    .collect();
                let count = summaries.len() as u64;
                Self::envelope(summaries, Some(count))
            }
            "/health" => Self::envelope(
                HealthStatus {
                    status: "degraded".to_string(),
                    database: Some("unreachable".to_string()),
                    timestamp: Utc::now(),
                },
                None,
            ),
            _ => match spec.region_code() {
                Some(code) => {
                    let name = self
                        .catalog
                        .find(code)
                        .map(|r| r.display_name.clone())
                        .unwrap_or_else(|| code.to_string());
                    Self::envelope(Self::region_stats(code, &name, &year), None)
                }
                None => Self::envelope(Vec::<Value>::new(), Some(0)),
            },
        }
    }

    fn envelope<T: Serialize>(data: T, count: Option<u64>) -> Value {
        let envelope = DatasetEnvelope {
            data,
            source: Some(FALLBACK_SOURCE.to_string()),
            count,
            synthetic: true,
        };
        serde_json::to_value(envelope).unwrap_or_else(|_| {
            json!({ "data": null, "source": FALLBACK_SOURCE, "synthetic": true })
        })
    }

    fn region_stats(code: &str, name: &str, year: &str) -> RegionStats {
        let mut rng = rand::thread_rng();
        let households: u64 = rng.gen_range(20_000..120_000);
        let average_days: f64 = rng.gen_range(30.0..75.0);
        let persondays = (households as f64 * average_days) as u64;
        let wage: f64 = rng.gen_range(300.0..350.0);
        let expenditure = persondays as f64 * wage * 1.3;

        let monthly = FY_MONTHS
            .iter()
            .map(|month| {
                let share: f64 = rng.gen_range(0.06..0.11);
                MonthlyStat {
                    month: month.to_string(),
                    persondays: (persondays as f64 * share) as u64,
                    expenditure: (expenditure * share).round(),
                }
            })
            .collect();

        RegionStats {
            region_code: code.to_string(),
            region_name: name.to_string(),
            financial_year: year.to_string(),
            households_employed: households,
            persondays_generated: persondays,
            women_participation_pct: rng.gen_range(55.0..92.0),
            average_days_per_household: (average_days * 10.0).round() / 10.0,
            average_wage_rate: wage.round(),
            total_expenditure: expenditure.round(),
            works_completed: rng.gen_range(500..5_000),
            works_in_progress: rng.gen_range(200..3_000),
            monthly,
        }
    }
}

/// e.g. "2024-2025" from April 2024 through March 2025.
fn current_financial_year() -> String {
    let today = Utc::now().date_naive();
    let start = if today.month() >= 4 {
        today.year()
    } else {
        today.year() - 1
    };
    format!("{}-{}", start, start + 1)
}
