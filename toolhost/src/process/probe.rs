//! HTTP health probing for backend servers

use std::time::Duration;

use async_trait::async_trait;

/// Default timeout for a single health request
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Predicate answering "is something healthy behind this URL".
///
/// Implementations must never fail: every error is reported as `false`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> bool;
}

/// Probe that issues a plain `GET` and accepts any 2xx status
#[derive(Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> bool {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => {
                let ok = response.status().is_success();
                tracing::trace!(url, status = %response.status(), ok, "health probe");
                ok
            }
            Err(e) => {
                tracing::trace!(url, error = %e, "health probe failed");
                false
            }
        }
    }
}
