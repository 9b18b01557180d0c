pub mod host;
pub mod system;

use crate::{
    config::Config,
    probe::{ProbeRequest, TransportKind},
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use host::HostTransport;
pub use system::SystemTransport;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Failed(String),
}

/// Issues one HTTP request and reports the status code it got back.
///
/// Implementations must not follow redirects, must not serve from a cache and
/// must give up after `request.timeout` with [`TransportError::Timeout`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn issue_request(&self, request: &ProbeRequest) -> Result<u16, TransportError>;
}

/// The pair of transports a run probes through.
#[derive(Clone)]
pub struct Transports {
    pub host: Arc<dyn Transport>,
    pub system: Arc<dyn Transport>,
}

impl Transports {
    pub fn new(host: Arc<dyn Transport>, system: Arc<dyn Transport>) -> Self {
        Self { host, system }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            host: Arc::new(HostTransport::new(cfg)),
            system: Arc::new(SystemTransport::new(cfg)),
        }
    }

    pub fn get(&self, kind: TransportKind) -> Arc<dyn Transport> {
        match kind {
            TransportKind::Host => Arc::clone(&self.host),
            TransportKind::System => Arc::clone(&self.system),
        }
    }
}

pub(crate) fn parse_url(raw: &str) -> Result<Url, TransportError> {
    let url = Url::parse(raw).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TransportError::InvalidUrl(format!(
            "{raw}: unsupported scheme {other}"
        ))),
    }
}

/// Bounds `fut` by `timeout`, whatever the underlying client does with its own timers.
pub(crate) async fn with_deadline<F>(timeout: Duration, fut: F) -> Result<u16, TransportError>
where
    F: Future<Output = Result<u16, TransportError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}
