use crate::probe::Method;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HTTP_URL: &str = "http://clients4.google.com/generate_204";
pub const DEFAULT_HTTPS_URL: &str = "https://clients4.google.com/generate_204";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub probe: Probe,
    #[serde(default)]
    pub host_transport: HostTransport,
    #[serde(default)]
    pub system_transport: SystemTransport,
    #[serde(default)]
    pub report: Report,
    #[serde(default)]
    pub feedback: Feedback,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe.timeout_ms == 0 {
            anyhow::bail!("probe.timeout_ms must be > 0");
        }
        for pattern in &self.feedback.redact_patterns {
            Regex::new(pattern)
                .with_context(|| format!("invalid feedback.redact_patterns entry: {pattern}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Probe {
    pub http_url: String,
    pub https_url: String,
    pub method: Method,
    pub timeout_ms: u64,
    /// Grace added on top of `timeout_ms` before the aggregate timer closes a run,
    /// so transport-level timeouts land ahead of it.
    pub settle_ms: u64,
    pub user_agent: String,
}
impl Default for Probe {
    fn default() -> Self {
        Self {
            http_url: DEFAULT_HTTP_URL.into(),
            https_url: DEFAULT_HTTPS_URL.into(),
            method: Method::Get,
            timeout_ms: 5000,
            settle_ms: 100,
            user_agent: concat!("conn-check/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}
impl Probe {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostTransport {
    /// Proxy URL the application routes its own traffic through. Empty means direct.
    pub proxy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemTransport {
    pub proxy_from_env: bool,
}
impl Default for SystemTransport {
    fn default() -> Self {
        Self {
            proxy_from_env: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Report {
    /// Human-readable connection type, e.g. "WiFi" or "3G".
    pub connection_type: String,
}
impl Default for Report {
    fn default() -> Self {
        Self {
            connection_type: "Unknown".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Feedback {
    pub normalize_unicode: bool,
    pub normalize_newlines: bool,
    pub trim_trailing_whitespace: bool,
    pub control_chars_to_sanitize: Vec<u8>,
    pub redact_patterns: Vec<String>,
    pub redaction: String,
    /// Zero disables truncation.
    pub max_description_chars: usize,
}
impl Default for Feedback {
    fn default() -> Self {
        Self {
            normalize_unicode: true,
            normalize_newlines: true,
            trim_trailing_whitespace: true,
            control_chars_to_sanitize: (0u8..=31).chain([127]).collect(),
            redact_patterns: vec!["[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\\.[A-Za-z]{2,}".into()],
            redaction: "[redacted]".into(),
            max_description_chars: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub pretty: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self { pretty: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "conn-check.log".into(),
        }
    }
}
