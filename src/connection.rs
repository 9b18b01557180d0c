use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    #[default]
    Unknown,
    Ethernet,
    Wifi,
    Cellular2g,
    Cellular3g,
    Cellular4g,
    Cellular5g,
    Bluetooth,
    None,
}

impl ConnectionType {
    const ALL: [ConnectionType; 9] = [
        ConnectionType::Unknown,
        ConnectionType::Ethernet,
        ConnectionType::Wifi,
        ConnectionType::Cellular2g,
        ConnectionType::Cellular3g,
        ConnectionType::Cellular4g,
        ConnectionType::Cellular5g,
        ConnectionType::Bluetooth,
        ConnectionType::None,
    ];

    /// Label written into outbound reports.
    pub fn human_readable(self) -> &'static str {
        match self {
            ConnectionType::Unknown => "Unknown",
            ConnectionType::Ethernet => "Ethernet",
            ConnectionType::Wifi => "WiFi",
            ConnectionType::Cellular2g => "2G",
            ConnectionType::Cellular3g => "3G",
            ConnectionType::Cellular4g => "4G",
            ConnectionType::Cellular5g => "5G",
            ConnectionType::Bluetooth => "Bluetooth",
            ConnectionType::None => "None",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.human_readable())
    }
}

impl FromStr for ConnectionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.human_readable().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown connection type: {s}"))
    }
}

/// Reports the current network connection type. Sampled once per run, when
/// the run finalizes.
pub trait ConnectionTypeSource: Send + Sync {
    fn current(&self) -> ConnectionType;
}

/// Always reports the same type; used when the embedder already knows it.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedConnectionType(pub ConnectionType);

impl ConnectionTypeSource for FixedConnectionType {
    fn current(&self) -> ConnectionType {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_report_labels() {
        assert_eq!("WiFi".parse::<ConnectionType>().unwrap(), ConnectionType::Wifi);
        assert_eq!("wifi".parse::<ConnectionType>().unwrap(), ConnectionType::Wifi);
        assert_eq!("3G".parse::<ConnectionType>().unwrap(), ConnectionType::Cellular3g);
        assert!("carrier pigeon".parse::<ConnectionType>().is_err());
    }
}
