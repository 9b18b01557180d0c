use crate::{
    connection::ConnectionType,
    probe::{ProbeKind, ProbeResult},
    util::sha256_hex,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ELAPSED_KEY: &str = "Connection check elapsed (ms)";
pub const TIMEOUT_KEY: &str = "Connection check timeout (ms)";
pub const CONNECTION_TYPE_KEY: &str = "Connection type";
pub const DESCRIPTION_KEY: &str = "Description";
pub const SCREENSHOT_DIGEST_KEY: &str = "Screenshot sha256";
pub const SCREENSHOT_BYTES_KEY: &str = "Screenshot bytes";

/// Finalized outcome of one four-probe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportData {
    pub results: BTreeMap<ProbeKind, ProbeResult>,
    pub timeout_ms: u64,
    pub elapsed_ms: u64,
    pub connection_type: ConnectionType,
}

impl ReportData {
    pub fn result(&self, kind: ProbeKind) -> ProbeResult {
        self.results
            .get(&kind)
            .copied()
            .unwrap_or(ProbeResult::Unknown)
    }

    pub fn all_connected(&self) -> bool {
        ProbeKind::ALL
            .iter()
            .all(|k| self.result(*k) == ProbeResult::Connected)
    }

    /// String map handed to the outbound report sink. Keys and value formats
    /// are a stable wire format.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = self
            .results
            .iter()
            .map(|(kind, result)| (kind.as_str().to_string(), result.as_str().to_string()))
            .collect();
        out.insert(ELAPSED_KEY.to_string(), self.elapsed_ms.to_string());
        out.insert(TIMEOUT_KEY.to_string(), self.timeout_ms.to_string());
        out.insert(
            CONNECTION_TYPE_KEY.to_string(),
            self.connection_type.human_readable().to_string(),
        );
        out
    }
}

/// Captured screen image. Cloning shares the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    bytes: Arc<[u8]>,
    mime: String,
}

impl Screenshot {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sha256(&self) -> String {
        sha256_hex(&self.bytes)
    }
}

/// Everything a feedback report carries once both its inputs arrived.
#[derive(Debug, Clone)]
pub struct FinalReport {
    pub target: String,
    pub created_at: String,
    pub connectivity: ReportData,
    pub screenshot: Screenshot,
    pub description: String,
    pub fields: Vec<(String, String)>,
}

impl FinalReport {
    /// Key/value view of the whole report, sorted by key. Built-in keys win
    /// over caller fields of the same name; `fields` keeps insertion order.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = self.fields.iter().cloned().collect();
        out.extend(self.connectivity.flatten());
        out.insert(DESCRIPTION_KEY.to_string(), self.description.clone());
        out.insert(SCREENSHOT_DIGEST_KEY.to_string(), self.screenshot.sha256());
        out.insert(SCREENSHOT_BYTES_KEY.to_string(), self.screenshot.len().to_string());
        out
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "target": self.target,
            "created_at": self.created_at,
            "connectivity": self.connectivity,
            "description": self.description,
            "fields": self.fields,
            "screenshot": {
                "mime": self.screenshot.mime(),
                "bytes": self.screenshot.len(),
                "sha256": self.screenshot.sha256(),
            },
            "flattened": self.flatten(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ReportData {
        ReportData {
            results: BTreeMap::from([(ProbeKind::HostHttps, ProbeResult::Connected)]),
            timeout_ms: 10,
            elapsed_ms: 10,
            connection_type: ConnectionType::Cellular3g,
        }
    }

    #[test]
    fn flattens_to_stable_keys() {
        let map = sample().flatten();
        assert_eq!(map.get("HOST_HTTPS").map(String::as_str), Some("CONNECTED"));
        assert_eq!(map.get(ELAPSED_KEY).map(String::as_str), Some("10"));
        assert_eq!(map.get(TIMEOUT_KEY).map(String::as_str), Some("10"));
        assert_eq!(map.get(CONNECTION_TYPE_KEY).map(String::as_str), Some("3G"));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn missing_kind_reads_as_unknown() {
        let data = sample();
        assert_eq!(data.result(ProbeKind::SystemHttp), ProbeResult::Unknown);
        assert!(!data.all_connected());
    }

    #[test]
    fn final_report_keeps_builtin_keys_over_fields() {
        let report = FinalReport {
            target: "tab".into(),
            created_at: "1970-01-01T00:00:00Z".into(),
            connectivity: sample(),
            screenshot: Screenshot::new(vec![1u8, 2, 3], "image/png"),
            description: "slow page".into(),
            fields: vec![
                ("Connection type".into(), "spoofed".into()),
                ("channel".into(), "beta".into()),
            ],
        };
        let map = report.flatten();
        assert_eq!(map.get(CONNECTION_TYPE_KEY).map(String::as_str), Some("3G"));
        assert_eq!(map.get("channel").map(String::as_str), Some("beta"));
        assert_eq!(map.get(SCREENSHOT_BYTES_KEY).map(String::as_str), Some("3"));
        assert_eq!(map.get(DESCRIPTION_KEY).map(String::as_str), Some("slow page"));
    }

    #[test]
    fn summary_keeps_field_order_and_sorts_flattened_keys() {
        let report = FinalReport {
            target: "tab".into(),
            created_at: "1970-01-01T00:00:00Z".into(),
            connectivity: sample(),
            screenshot: Screenshot::new(vec![1u8], "image/png"),
            description: String::new(),
            fields: vec![
                ("zeta".into(), "1".into()),
                ("alpha".into(), "2".into()),
            ],
        };
        let summary = report.summary();
        assert_eq!(summary["fields"][0][0], "zeta");
        assert_eq!(summary["fields"][1][0], "alpha");

        let keys: Vec<String> = report.flatten().into_keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
