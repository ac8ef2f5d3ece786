/// Canonical fingerprint port set probed on every swept host
pub const FINGERPRINT_PORTS: [u16; 12] = [
    22,   // SSH
    80,   // HTTP
    443,  // HTTPS
    2375, // Docker API (plain)
    2376, // Docker API (TLS)
    3000, // Dashboards
    5000, // Registries / web apps
    8006, // Proxmox VE
    8080, // HTTP-Alt
    9000, // Portainer (HTTP)
    9010, // Portainer (alt)
    9443, // Portainer (TLS)
];

/// Portainer API port preference, most specific first
pub const PORTAINER_PORT_PREFERENCE: [u16; 3] = [9443, 9010, 9000];

/// Container addresses with these prefixes are bridge-local and never
/// routable from the scanning host
pub const BRIDGE_LOCAL_PREFIXES: [&str; 2] = ["172.", "10."];

pub const DEFAULT_PING_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_TCP_CONNECT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_ADAPTER_TIMEOUT_MS: u64 = 5000;

pub const DEFAULT_SWEEP_CONCURRENCY: usize = 50;
pub const DEFAULT_PROBE_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_HOSTS_PER_SUBNET: usize = 254;

pub const DEFAULT_HISTORY_RETENTION: usize = 10;
