use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use statsync_core::config::Config;
use statsync_core::region::StaticLocationProvider;
use statsync_core::storage::KeyValueStore;
use statsync_core::{ApiError, Dashboard, RegionCatalog, RequestSpec, Transport};

/// Transport answering from a script; once the script runs out it keeps
/// returning `fallback_response`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Value, ApiError>>>,
    fallback_response: Result<Value, ApiError>,
    calls: Mutex<Vec<RequestSpec>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<Value, ApiError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback_response: Err(ApiError::Unreachable("connection refused".into())),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn always(response: Result<Value, ApiError>) -> Self {
        Self {
            fallback_response: response,
            ..Self::new(vec![])
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RequestSpec> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, spec: &RequestSpec) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(spec.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback_response.clone())
    }
}

pub fn test_config(offline: bool) -> Config {
    let mut config = Config::default();
    config.offline_mode = offline;
    config.api.backoff_base_ms = 1;
    config.api.backoff_cap_ms = 5;
    config
}

pub fn dashboard(
    config: Config,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<ScriptedTransport>,
) -> Dashboard {
    Dashboard::with_parts(
        config,
        store,
        transport,
        Arc::new(StaticLocationProvider::unsupported()),
        RegionCatalog::load_default().unwrap(),
    )
}

pub fn regions_payload() -> Value {
    json!({
        "data": [
            {"code": "KL-TVM", "name": "Thiruvananthapuram"},
            {"code": "KL-EKM", "name": "Ernakulam"}
        ],
        "source": "database",
        "count": 2
    })
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
