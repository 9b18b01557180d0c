use super::{Transport, TransportError, parse_url, with_deadline};
use crate::{
    config::Config,
    probe::{Method, ProbeRequest},
};
use async_trait::async_trait;
use reqwest::{header::CACHE_CONTROL, redirect::Policy};
use std::time::Duration;

/// Probes through the application's own HTTP stack, so whatever proxy the
/// application is configured with is in the path.
pub struct HostTransport {
    proxy: Option<String>,
    user_agent: String,
}

impl HostTransport {
    pub fn new(cfg: &Config) -> Self {
        let proxy = cfg.host_transport.proxy.trim();
        Self {
            proxy: (!proxy.is_empty()).then(|| proxy.to_string()),
            user_agent: cfg.probe.user_agent.clone(),
        }
    }

    // A fresh client per request keeps connections out of any pool; they
    // close when the client and response drop.
    fn client(&self, timeout: Duration) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(timeout)
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .user_agent(self.user_agent.as_str());
        builder = match self.proxy.as_deref() {
            Some(proxy) => builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| TransportError::Failed(format!("invalid proxy {proxy}: {e}")))?,
            ),
            None => builder.no_proxy(),
        };
        builder
            .build()
            .map_err(|e| TransportError::Failed(format!("building client: {e}")))
    }
}

#[async_trait]
impl Transport for HostTransport {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn issue_request(&self, request: &ProbeRequest) -> Result<u16, TransportError> {
        let url = parse_url(&request.url)?;
        let timeout = request.timeout;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
        };

        with_deadline(timeout, async move {
            let client = self.client(timeout)?;
            let response = client
                .request(method, url)
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await
                .map_err(|e| map_error(e, timeout))?;
            Ok(response.status().as_u16())
        })
        .await
    }
}

fn map_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Failed(format!("{err:#}"))
    }
}
