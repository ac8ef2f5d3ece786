use crate::config::ScanConfig;
use crate::errors::DiscoveryError;
use crate::model::Entity;
use futures::stream::{self, StreamExt};
use ipnet::Ipv4Net;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use surge_ping::ping;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Reachability sweep over the configured subnets
pub mod sweep {
    use super::*;

    /// Expand each CIDR into its host addresses, excluding network and
    /// broadcast. A /32 yields the single base address. Enumeration is
    /// capped per subnet to bound cost on wide prefixes. Parse failures
    /// fail fast with the offending subnet named.
    pub fn expand_subnets(
        subnets: &[String],
        max_hosts_per_subnet: usize,
    ) -> Result<Vec<Ipv4Addr>, DiscoveryError> {
        let mut hosts = Vec::new();
        for subnet in subnets {
            let net: Ipv4Net = subnet
                .trim()
                .parse()
                .map_err(|e: ipnet::AddrParseError| DiscoveryError::InvalidSubnet {
                    subnet: subnet.clone(),
                    reason: e.to_string(),
                })?;

            if net.prefix_len() == 32 {
                hosts.push(net.addr());
                continue;
            }
            hosts.extend(net.hosts().take(max_hosts_per_subnet));
        }
        Ok(hosts)
    }

    /// Ping every candidate in parallel under the global sweep width and
    /// return the addresses that answered. Unreachable hosts are silently
    /// omitted; a tripped cancellation token skips the remaining probes.
    pub async fn parallel_ping_sweep(
        candidates: Vec<Ipv4Addr>,
        config: &ScanConfig,
        cancel: &CancellationToken,
    ) -> Vec<Ipv4Addr> {
        let ping_timeout = Duration::from_millis(config.ping_timeout_ms);

        let ping_stream = stream::iter(candidates)
            .map(|ip| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let target: IpAddr = ip.into();
                    let payload = [0; 56];
                    match timeout(ping_timeout, ping(target, &payload)).await {
                        Ok(Ok((_packet, _rtt))) => Some(ip),
                        _ => None,
                    }
                }
            })
            .buffer_unordered(config.sweep_concurrency.max(1));

        ping_stream
            .filter_map(|result| async move { result })
            .collect()
            .await
    }
}

/// Per-host port fingerprinting
pub mod probe {
    use super::*;

    /// Attempt the fingerprint port set against one reachable host and wrap
    /// the findings in an unclassified entity. A GET of `/` captures
    /// response headers when a web port answered. All failures here are
    /// non-fatal; the entity simply carries less detail.
    pub async fn probe_host(
        ip: Ipv4Addr,
        config: &ScanConfig,
        http: &reqwest::Client,
    ) -> Entity {
        let connect_timeout = Duration::from_millis(config.tcp_connect_timeout_ms);

        let port_stream = stream::iter(config.fingerprint_ports.iter().copied())
            .map(|port| async move {
                let attempt = timeout(
                    connect_timeout,
                    TcpStream::connect((IpAddr::from(ip), port)),
                )
                .await;
                match attempt {
                    Ok(Ok(_stream)) => Some(port),
                    _ => None,
                }
            })
            .buffer_unordered(config.probe_concurrency.max(1));

        let open_ports: BTreeSet<u16> = port_stream
            .filter_map(|result| async move { result })
            .collect()
            .await;

        let mut entity = Entity::unknown(ip.to_string());
        if open_ports.contains(&443) || open_ports.contains(&80) {
            if let Some(headers) = fetch_headers(ip, http).await {
                entity.http_headers = headers;
            }
        }
        entity.open_ports = open_ports;
        entity
    }

    /// One GET of `/`, TLS first then plaintext. Duplicate header names are
    /// concatenated so nothing the endpoint said is dropped.
    async fn fetch_headers(
        ip: Ipv4Addr,
        http: &reqwest::Client,
    ) -> Option<BTreeMap<String, String>> {
        for url in [format!("https://{}/", ip), format!("http://{}/", ip)] {
            if let Ok(response) = http.get(&url).send().await {
                let mut headers = BTreeMap::new();
                for (name, value) in response.headers() {
                    let value = value.to_str().unwrap_or_default().to_string();
                    headers
                        .entry(name.to_string())
                        .and_modify(|existing: &mut String| {
                            existing.push_str(", ");
                            existing.push_str(&value);
                        })
                        .or_insert(value);
                }
                return Some(headers);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::sweep::expand_subnets;

    #[test]
    fn slash_32_yields_single_address() {
        let hosts = expand_subnets(&["192.168.1.51/32".to_string()], 254).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].to_string(), "192.168.1.51");
    }

    #[test]
    fn slash_24_excludes_network_and_broadcast() {
        let hosts = expand_subnets(&["192.168.1.0/24".to_string()], 254).unwrap();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts.first().unwrap().to_string(), "192.168.1.1");
        assert_eq!(hosts.last().unwrap().to_string(), "192.168.1.254");
    }

    #[test]
    fn wide_prefix_is_capped() {
        let hosts = expand_subnets(&["10.0.0.0/16".to_string()], 254).unwrap();
        assert_eq!(hosts.len(), 254);
    }

    #[test]
    fn invalid_cidr_fails_fast() {
        let err = expand_subnets(&["not-a-subnet".to_string()], 254).unwrap_err();
        assert!(err.to_string().contains("not-a-subnet"));
    }
}
