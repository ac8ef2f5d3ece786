use super::{ActivationCriteria, PlatformAdapter, ScanFailure, ScanOutcome, ScanSuccess};
use crate::context::ScannerContext;
use crate::model::{keys, Entity, EntityPatch, EntityStatus, EntityType};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Deserialize)]
struct ApiData<T> {
    data: T,
}

/// One row of `/cluster/status`: the cluster record itself or a member node
#[derive(Debug, Deserialize)]
struct ClusterStatusItem {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    online: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct GuestSummary {
    vmid: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Proxmox VE adapter. Promotes the entry host to a cluster or a standalone
/// node and enumerates every VM and LXC container per node.
pub struct ProxmoxAdapter;

impl ProxmoxAdapter {
    pub fn new() -> Self {
        Self
    }

    fn auth_header(ctx: &ScannerContext) -> Option<String> {
        ctx.credentials
            .get("proxmox", "token")
            .map(|token| format!("PVEAPIToken={}", token))
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        ctx: &ScannerContext,
        ip: &str,
        path: &str,
    ) -> Result<T, ScanFailure> {
        let url = format!("https://{}:8006/api2/json{}", ip, path);
        let mut request = ctx.http.get(&url);
        if let Some(header) = Self::auth_header(ctx) {
            request = request.header("Authorization", header);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScanFailure::new("Proxmox API not reachable", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScanFailure::new(
                "Proxmox API rejected the request",
                format!("{} returned {}", path, response.status()),
            ));
        }
        let body: ApiData<T> = response
            .json()
            .await
            .map_err(|e| ScanFailure::new("Proxmox API returned malformed data", e.to_string()))?;
        Ok(body.data)
    }

    /// Guest address, best source first: the guest agent over the optional
    /// SSH side channel, then a static `ipconfigN` declaration. Returns
    /// `(ip, via_agent)`.
    async fn guest_ip(
        ctx: &ScannerContext,
        entry_ip: &str,
        node: &str,
        vmid: u64,
        kind: EntityType,
    ) -> Option<(String, bool)> {
        if kind == EntityType::Vm {
            if let Some(ip) = Self::agent_ip_over_ssh(ctx, vmid).await {
                return Some((ip, true));
            }
        }

        let subpath = if kind == EntityType::Vm { "qemu" } else { "lxc" };
        let path = format!("/nodes/{}/{}/{}/config", node, subpath, vmid);
        let config: BTreeMap<String, serde_json::Value> =
            Self::api_get(ctx, entry_ip, &path).await.ok()?;

        for (key, value) in &config {
            if !key.starts_with("ipconfig") && key != "net0" {
                continue;
            }
            let Some(declared) = value.as_str() else {
                continue;
            };
            for part in declared.split(',') {
                if let Some(ip_with_prefix) = part.trim().strip_prefix("ip=") {
                    let ip = ip_with_prefix.split('/').next().unwrap_or_default();
                    if !ip.is_empty() && ip != "dhcp" {
                        return Some((ip.to_string(), false));
                    }
                }
            }
        }
        None
    }

    /// Ask the QEMU guest agent for its addresses through `ssh` on the
    /// hypervisor host, when the operator configured that side channel
    async fn agent_ip_over_ssh(ctx: &ScannerContext, vmid: u64) -> Option<String> {
        let host = ctx.credentials.get("proxmox", "ssh_host")?;
        let user = ctx
            .credentials
            .get("proxmox", "ssh_user")
            .unwrap_or_else(|| "root".to_string());

        let command = timeout(
            Duration::from_millis(ctx.config.http_timeout_ms),
            tokio::process::Command::new("ssh")
                .arg("-o")
                .arg("BatchMode=yes")
                .arg(format!("{}@{}", user, host))
                .arg(format!("qm guest cmd {} network-get-interfaces", vmid))
                .output(),
        )
        .await;

        let output = match command {
            Ok(Ok(output)) if output.status.success() => output,
            _ => return None,
        };

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
        for interface in parsed.as_array()? {
            let addresses = interface
                .get("ip-addresses")
                .and_then(|value| value.as_array());
            for addr in addresses.into_iter().flatten() {
                let Some(ip) = addr.get("ip-address").and_then(|v| v.as_str()) else {
                    continue;
                };
                let is_ipv4 = addr
                    .get("ip-address-type")
                    .and_then(|v| v.as_str())
                    == Some("ipv4");
                if is_ipv4 && !ip.starts_with("127.") {
                    return Some(ip.to_string());
                }
            }
        }
        None
    }

    async fn enumerate_guests(
        ctx: &ScannerContext,
        entry_ip: &str,
        node: &str,
        node_entity_id: &str,
    ) -> Vec<Entity> {
        let mut guests = Vec::new();

        for (subpath, kind) in [("qemu", EntityType::Vm), ("lxc", EntityType::Lxc)] {
            let path = format!("/nodes/{}/{}", node, subpath);
            let listed: Vec<GuestSummary> = match Self::api_get(ctx, entry_ip, &path).await {
                Ok(listed) => listed,
                // A node that answers /cluster/status but not a guest list
                // yields partial data, not a failed scan
                Err(_) => continue,
            };

            for guest in listed {
                let tag = if kind == EntityType::Vm { "vm" } else { "lxc" };
                let mut entity = Entity::new(
                    format!("proxmox-{}-{}-{}", tag, node, guest.vmid),
                    kind,
                );
                entity.name = guest.name.unwrap_or_default();
                entity.parent_id = Some(node_entity_id.to_string());
                entity.set_meta(keys::PROXMOX_VMID, guest.vmid.to_string());
                entity.set_meta(keys::PROXMOX_NODE, node);
                entity.status = EntityStatus::Unverified;

                if guest.status.as_deref() == Some("running") {
                    match Self::guest_ip(ctx, entry_ip, node, guest.vmid, kind).await {
                        Some((ip, true)) => {
                            // Agent-confirmed address is authoritative
                            entity.status = if ctx.is_swept(&ip) {
                                EntityStatus::Reachable
                            } else {
                                EntityStatus::Unverified
                            };
                            entity.ip = ip;
                        }
                        Some((ip, false)) => {
                            // Config-declared only; correlation promotes it
                            // once checked against the swept set
                            entity.set_meta(keys::API_REPORTED_IP, ip);
                        }
                        None => {}
                    }
                } else {
                    entity.status = EntityStatus::Unreachable;
                }

                guests.push(entity);
            }
        }

        guests
    }
}

impl Default for ProxmoxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for ProxmoxAdapter {
    fn name(&self) -> &'static str {
        "Proxmox"
    }

    fn priority(&self) -> u8 {
        10
    }

    fn handles_type(&self, entity_type: EntityType) -> bool {
        matches!(
            entity_type,
            EntityType::Proxmox | EntityType::ProxmoxCluster | EntityType::ProxmoxNode
        )
    }

    fn criteria(&self) -> ActivationCriteria {
        ActivationCriteria::default().with_ports(&[8006])
    }

    async fn scan(&self, entity: &Entity, ctx: &ScannerContext) -> ScanOutcome {
        let entry_ip = entity.ip.clone();
        if entry_ip.is_empty() {
            return Err(ScanFailure::new(
                "Proxmox scan needs an address",
                "entity has no ip",
            ));
        }

        let status: Vec<ClusterStatusItem> =
            Self::api_get(ctx, &entry_ip, "/cluster/status").await?;

        let cluster_name = status
            .iter()
            .find(|item| item.kind == "cluster")
            .map(|item| item.name.clone());
        let nodes: Vec<&ClusterStatusItem> =
            status.iter().filter(|item| item.kind == "node").collect();

        match cluster_name {
            Some(cluster_name) => {
                let cluster_id = format!("proxmox-cluster-{}", cluster_name);

                // Another entry point already walked this cluster; leave the
                // host classified and let correlation fold it in
                if !ctx.mark_cluster_scanned(&cluster_id) {
                    tracing::debug!(cluster = %cluster_id, "cluster already scanned, skipping");
                    return Ok(ScanSuccess::patched(EntityPatch::promote(
                        EntityType::Proxmox,
                    )));
                }

                let patch = EntityPatch::promote(EntityType::ProxmoxCluster)
                    .with_id(cluster_id.clone())
                    .with_ip("")
                    .with_name(cluster_name)
                    .with_status(EntityStatus::Reachable);

                let mut discovered = Vec::new();
                for node in &nodes {
                    let node_id = format!("proxmox-node-{}", node.name);
                    let mut node_entity = Entity::new(node_id.clone(), EntityType::ProxmoxNode);
                    node_entity.name = node.name.clone();
                    node_entity.ip = node.ip.clone().unwrap_or_default();
                    node_entity.parent_id = Some(cluster_id.clone());
                    node_entity.status = if node.online == Some(1) {
                        EntityStatus::Reachable
                    } else {
                        EntityStatus::Unreachable
                    };
                    node_entity.set_meta(keys::PROXMOX_NODE, node.name.as_str());

                    let guests =
                        Self::enumerate_guests(ctx, &entry_ip, &node.name, &node_id).await;
                    discovered.push(node_entity);
                    discovered.extend(guests);
                }

                Ok(ScanSuccess::patched(patch)
                    .with_children(discovered)
                    .with_child_hints(vec![EntityType::Vm, EntityType::Lxc]))
            }
            None => {
                // Standalone node: promote in place and hang guests off it
                let node_name = nodes
                    .first()
                    .map(|node| node.name.clone())
                    .unwrap_or_default();
                let patch = EntityPatch::promote(EntityType::ProxmoxNode)
                    .with_name(node_name.clone())
                    .with_status(EntityStatus::Reachable);

                let discovered = if node_name.is_empty() {
                    Vec::new()
                } else {
                    Self::enumerate_guests(ctx, &entry_ip, &node_name, &entity.id).await
                };

                Ok(ScanSuccess::patched(patch)
                    .with_children(discovered)
                    .with_child_hints(vec![EntityType::Vm, EntityType::Lxc]))
            }
        }
    }
}
