use super::{Transport, TransportError, parse_url, with_deadline};
use crate::{config::Config, probe::ProbeRequest};
use async_trait::async_trait;
use std::error::Error as _;
use std::io;
use std::time::Duration;
use url::Url;

/// Probes through the platform's default stack: blocking sockets on Tokio's
/// blocking pool, proxy taken from the process environment and the platform
/// certificate store.
#[derive(Debug, Clone)]
pub struct SystemTransport {
    proxy_from_env: bool,
    user_agent: String,
}

impl SystemTransport {
    pub fn new(cfg: &Config) -> Self {
        Self {
            proxy_from_env: cfg.system_transport.proxy_from_env,
            user_agent: cfg.probe.user_agent.clone(),
        }
    }

    fn agent(&self, timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .timeout(timeout)
            .redirects(0)
            .max_idle_connections(0)
            .user_agent(&self.user_agent)
            .try_proxy_from_env(self.proxy_from_env)
            .build()
    }
}

#[async_trait]
impl Transport for SystemTransport {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn issue_request(&self, request: &ProbeRequest) -> Result<u16, TransportError> {
        let url = parse_url(&request.url)?;
        let timeout = request.timeout;
        let method = request.method.as_str();
        let settings = self.clone();

        // Agent construction loads the platform trust store, so it runs on the
        // blocking worker and inside the deadline.
        with_deadline(timeout, async move {
            tokio::task::spawn_blocking(move || {
                let agent = settings.agent(timeout);
                send(&agent, method, &url, timeout)
            })
            .await
            .map_err(|e| TransportError::Failed(format!("request worker: {e}")))?
        })
        .await
    }
}

fn send(
    agent: &ureq::Agent,
    method: &str,
    url: &Url,
    timeout: Duration,
) -> Result<u16, TransportError> {
    let outcome = agent
        .request_url(method, url)
        .set("Cache-Control", "no-cache")
        .call();
    match outcome {
        Ok(response) => Ok(response.status()),
        // Non-2xx still means a server answered.
        Err(ureq::Error::Status(status, _)) => Ok(status),
        Err(ureq::Error::Transport(transport)) => Err(map_transport(transport, timeout)),
    }
}

fn map_transport(transport: ureq::Transport, timeout: Duration) -> TransportError {
    let timed_out = transport
        .source()
        .and_then(|src| src.downcast_ref::<io::Error>())
        .is_some_and(|e| matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
        || transport.to_string().to_ascii_lowercase().contains("timed out");
    if timed_out {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Failed(format!("{:?}: {}", transport.kind(), transport))
    }
}
