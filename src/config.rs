use crate::constants::*;
use crate::context::ScanHint;
use crate::errors::DiscoveryError;
use crate::adapters::router::DhcpLease;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration settings for a discovery run
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Fingerprint ports attempted on every reachable host
    pub fingerprint_ports: Vec<u16>,

    /// Timeout in milliseconds for the reachability ping
    pub ping_timeout_ms: u64,

    /// Timeout in milliseconds per TCP connect attempt
    pub tcp_connect_timeout_ms: u64,

    /// Timeout in milliseconds for HTTP probes and adapter API calls
    pub http_timeout_ms: u64,

    /// Overall deadline in milliseconds for one adapter scan
    pub adapter_timeout_ms: u64,

    /// Global width of the ping sweep fan-out
    pub sweep_concurrency: usize,

    /// Per-host width of the port probe fan-out
    pub probe_concurrency: usize,

    /// Enumeration cap per subnet, bounds cost on wide prefixes
    pub max_hosts_per_subnet: usize,

    /// LAN gateway address, activates the router adapter when set
    pub gateway_ip: Option<String>,

    /// Directory holding one JSON snapshot per run
    pub history_dir: PathBuf,

    /// Number of newest snapshots kept on disk
    pub history_retention: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            fingerprint_ports: FINGERPRINT_PORTS.to_vec(),
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            tcp_connect_timeout_ms: DEFAULT_TCP_CONNECT_TIMEOUT_MS,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            adapter_timeout_ms: DEFAULT_ADAPTER_TIMEOUT_MS,
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            max_hosts_per_subnet: DEFAULT_MAX_HOSTS_PER_SUBNET,
            gateway_ip: None,
            history_dir: PathBuf::from(".labtopo/history"),
            history_retention: DEFAULT_HISTORY_RETENTION,
        }
    }
}

/// Optional YAML overlay. Every field is optional; anything absent keeps its
/// `ScanConfig` default.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    pub subnets: Option<Vec<String>>,
    pub ping_timeout_ms: Option<u64>,
    pub tcp_connect_timeout_ms: Option<u64>,
    pub http_timeout_ms: Option<u64>,
    pub adapter_timeout_ms: Option<u64>,
    pub sweep_concurrency: Option<usize>,
    pub probe_concurrency: Option<usize>,
    pub max_hosts_per_subnet: Option<usize>,
    pub gateway_ip: Option<String>,
    pub history_dir: Option<PathBuf>,
    pub history_retention: Option<usize>,
    /// service name -> key -> value; values may use `env:VAR` indirection
    pub credentials: Option<BTreeMap<String, BTreeMap<String, String>>>,
    pub hints: Option<Vec<ScanHint>>,
    /// Static DHCP lease table consumed by the router adapter
    pub leases: Option<Vec<DhcpLease>>,
}

impl FileConfig {
    /// Parse the YAML file at `path`. Unreadable or malformed configuration
    /// fails fast before any scan starts.
    pub fn load(path: &Path) -> Result<Self, DiscoveryError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            DiscoveryError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&raw).map_err(|e| {
            DiscoveryError::ConfigError(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Merge the overlay into `config`, field by field
    pub fn apply_to(&self, config: &mut ScanConfig) {
        if let Some(v) = self.ping_timeout_ms {
            config.ping_timeout_ms = v;
        }
        if let Some(v) = self.tcp_connect_timeout_ms {
            config.tcp_connect_timeout_ms = v;
        }
        if let Some(v) = self.http_timeout_ms {
            config.http_timeout_ms = v;
        }
        if let Some(v) = self.adapter_timeout_ms {
            config.adapter_timeout_ms = v;
        }
        if let Some(v) = self.sweep_concurrency {
            config.sweep_concurrency = v;
        }
        if let Some(v) = self.probe_concurrency {
            config.probe_concurrency = v;
        }
        if let Some(v) = self.max_hosts_per_subnet {
            config.max_hosts_per_subnet = v;
        }
        if let Some(ref v) = self.gateway_ip {
            config.gateway_ip = Some(v.clone());
        }
        if let Some(ref v) = self.history_dir {
            config.history_dir = v.clone();
        }
        if let Some(v) = self.history_retention {
            config.history_retention = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fingerprint_set() {
        let config = ScanConfig::default();
        assert_eq!(config.fingerprint_ports.len(), 12);
        assert!(config.fingerprint_ports.contains(&8006));
        assert_eq!(config.ping_timeout_ms, 500);
        assert_eq!(config.tcp_connect_timeout_ms, 1000);
        assert_eq!(config.sweep_concurrency, 50);
        assert_eq!(config.probe_concurrency, 10);
    }

    #[test]
    fn overlay_applies_only_present_fields() {
        let yaml = "subnets:\n  - 192.168.1.0/24\nping_timeout_ms: 250\ngateway_ip: 192.168.1.1\n";
        let overlay: FileConfig = serde_yaml::from_str(yaml).unwrap();
        let mut config = ScanConfig::default();
        overlay.apply_to(&mut config);

        assert_eq!(config.ping_timeout_ms, 250);
        assert_eq!(config.tcp_connect_timeout_ms, 1000);
        assert_eq!(config.gateway_ip.as_deref(), Some("192.168.1.1"));
        assert_eq!(overlay.subnets.unwrap(), vec!["192.168.1.0/24"]);
    }

    #[test]
    fn hint_entries_parse_with_type() {
        let yaml = "hints:\n  - ip: 192.168.1.4\n    port: 9443\n    name: portainer\n    type: PortainerService\n";
        let overlay: FileConfig = serde_yaml::from_str(yaml).unwrap();
        let hints = overlay.hints.unwrap();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].port, Some(9443));
        assert_eq!(
            hints[0].entity_type,
            Some(crate::model::EntityType::PortainerService)
        );
    }
}
