use serde::{Deserialize, Serialize};

/// User preferences, stored under a reserved cache key and preserved by
/// "clear cache".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(default)]
pub struct UserPrefs {
    /// Region chosen manually when location resolution was not possible.
    pub preferred_region: Option<String>,
    pub language: Option<String>,
}
