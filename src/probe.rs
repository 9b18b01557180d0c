use crate::transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Terminal outcome of one probe slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeResult {
    Connected,
    NotConnected,
    Timeout,
    Error,
    /// Closed out by the aggregator without ever receiving an answer.
    Unknown,
}

impl ProbeResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeResult::Connected => "CONNECTED",
            ProbeResult::NotConnected => "NOT_CONNECTED",
            ProbeResult::Timeout => "TIMEOUT",
            ProbeResult::Error => "ERROR",
            ProbeResult::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportKind {
    /// The application's own network stack.
    Host,
    /// The operating system's default network stack.
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scheme {
    Http,
    Https,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeKind {
    HostHttp,
    HostHttps,
    SystemHttp,
    SystemHttps,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 4] = [
        ProbeKind::HostHttp,
        ProbeKind::HostHttps,
        ProbeKind::SystemHttp,
        ProbeKind::SystemHttps,
    ];

    pub fn new(transport: TransportKind, scheme: Scheme) -> Self {
        match (transport, scheme) {
            (TransportKind::Host, Scheme::Http) => ProbeKind::HostHttp,
            (TransportKind::Host, Scheme::Https) => ProbeKind::HostHttps,
            (TransportKind::System, Scheme::Http) => ProbeKind::SystemHttp,
            (TransportKind::System, Scheme::Https) => ProbeKind::SystemHttps,
        }
    }

    pub fn transport(self) -> TransportKind {
        match self {
            ProbeKind::HostHttp | ProbeKind::HostHttps => TransportKind::Host,
            ProbeKind::SystemHttp | ProbeKind::SystemHttps => TransportKind::System,
        }
    }

    pub fn scheme(self) -> Scheme {
        match self {
            ProbeKind::HostHttp | ProbeKind::SystemHttp => Scheme::Http,
            ProbeKind::HostHttps | ProbeKind::SystemHttps => Scheme::Https,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::HostHttp => "HOST_HTTP",
            ProbeKind::HostHttps => "HOST_HTTPS",
            ProbeKind::SystemHttp => "SYSTEM_HTTP",
            ProbeKind::SystemHttps => "SYSTEM_HTTPS",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
        }
    }
}

/// Target URLs for the two schemes. Both are overridable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub http: String,
    pub https: String,
}

impl Endpoints {
    pub fn new(http: impl Into<String>, https: impl Into<String>) -> Self {
        Self {
            http: http.into(),
            https: https.into(),
        }
    }

    pub fn url(&self, scheme: Scheme) -> &str {
        match scheme {
            Scheme::Http => &self.http,
            Scheme::Https => &self.https,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HTTP_URL, crate::config::DEFAULT_HTTPS_URL)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: String,
    pub method: Method,
    pub timeout: Duration,
}

/// Maps a transport outcome onto the closed result set. A `204` is the only
/// healthy answer; anything else that came back means something in between
/// (captive portal, proxy) answered instead.
pub fn classify(outcome: &Result<u16, TransportError>) -> ProbeResult {
    match outcome {
        Ok(204) => ProbeResult::Connected,
        Ok(_) => ProbeResult::NotConnected,
        Err(TransportError::Timeout(_)) => ProbeResult::Timeout,
        Err(_) => ProbeResult::Error,
    }
}

pub async fn run(transport: &dyn Transport, request: &ProbeRequest) -> ProbeResult {
    let outcome = transport.issue_request(request).await;
    let result = classify(&outcome);
    match &outcome {
        Ok(status) => debug!(
            transport = transport.name(),
            url = %request.url,
            status,
            %result,
            "probe answered"
        ),
        Err(err) => debug!(
            transport = transport.name(),
            url = %request.url,
            error = %err,
            %result,
            "probe failed"
        ),
    }
    result
}
