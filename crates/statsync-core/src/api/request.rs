use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Method::Get)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Freshness class of a dataset; selects the cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    /// Slow-changing reference data (region list)
    Reference,
    /// Per-region datasets
    Region,
    /// Aggregate dashboard data
    Aggregate,
    /// Liveness checks; expired entries may be served, flagged stale
    Health,
}

/// A dataset request, independent of how it is sent.
///
/// Also the payload of queued offline requests, so it must round-trip
/// through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub data_class: DataClass,
    /// Queue this request for replay if it fails while offline, even
    /// though it is not mutating.
    #[serde(default)]
    pub replay_when_online: bool,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>, data_class: DataClass) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            params: BTreeMap::new(),
            body: None,
            data_class,
            replay_when_online: false,
        }
    }

    pub fn post(path: impl Into<String>, body: Value, data_class: DataClass) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::get(path, data_class)
        }
    }

    /// Aggregate statistics for every region
    pub fn all_data() -> Self {
        Self::get("/data", DataClass::Aggregate)
    }

    pub fn regions() -> Self {
        Self::get("/regions", DataClass::Reference)
    }

    pub fn region_data(code: &str) -> Self {
        Self::get(format!("/regions/{}/data", code), DataClass::Region)
    }

    pub fn health() -> Self {
        Self::get("/health", DataClass::Health)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn replay_when_online(mut self) -> Self {
        self.replay_when_online = true;
        self
    }

    /// Deterministic cache key: method, path and sorted parameters.
    pub fn cache_key(&self) -> String {
        let mut key = format!("data:{} {}", self.method, self.path);
        if !self.params.is_empty() {
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push('?');
            key.push_str(&query.join("&"));
        }
        key
    }

    /// Worth replaying later if it failed while offline.
    pub fn should_queue_offline(&self) -> bool {
        self.method.is_mutating() || self.replay_when_online
    }

    /// The region code for `/regions/{code}/...` paths.
    pub fn region_code(&self) -> Option<&str> {
        let rest = self.path.strip_prefix("/regions/")?;
        rest.split('/').next().filter(|code| !code.is_empty())
    }
}
