use super::{ActivationCriteria, PlatformAdapter, ScanFailure, ScanOutcome, ScanSuccess};
use crate::constants::BRIDGE_LOCAL_PREFIXES;
use crate::context::ScannerContext;
use crate::model::{keys, Entity, EntityPatch, EntityStatus, EntityType};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub(crate) struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Labels", default)]
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "Ports", default)]
    pub ports: Vec<PortBinding>,
    #[serde(rename = "NetworkSettings", default)]
    pub network_settings: Option<NetworkSettings>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PortBinding {
    #[serde(rename = "PrivatePort")]
    pub private_port: u16,
    #[serde(rename = "PublicPort", default)]
    pub public_port: Option<u16>,
    #[serde(rename = "Type", default)]
    pub protocol: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NetworkSettings {
    #[serde(rename = "Networks", default)]
    pub networks: BTreeMap<String, ContainerNetwork>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContainerNetwork {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
}

impl ContainerSummary {
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    pub fn display_name(&self) -> String {
        self.names
            .first()
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_default()
    }

    /// First non-empty address across the engine's network map
    pub fn first_ip(&self) -> String {
        self.network_settings
            .as_ref()
            .map(|settings| {
                settings
                    .networks
                    .values()
                    .map(|network| network.ip_address.clone())
                    .find(|ip| !ip.is_empty())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn exposed_ports(&self) -> Vec<String> {
        self.ports
            .iter()
            .map(|binding| match binding.public_port {
                Some(public) => {
                    format!("{}:{}/{}", public, binding.private_port, binding.protocol)
                }
                None => format!("{}/{}", binding.private_port, binding.protocol),
            })
            .collect()
    }
}

/// Whether sweep can ever see this address: engine bridge networks are not
/// routable from the scanning host
pub(crate) fn is_bridge_local(ip: &str) -> bool {
    BRIDGE_LOCAL_PREFIXES
        .iter()
        .any(|prefix| ip.starts_with(prefix))
}

pub(crate) fn container_status(ip: &str, ctx: &ScannerContext) -> EntityStatus {
    if ip.is_empty() {
        EntityStatus::Unverified
    } else if is_bridge_local(ip) {
        EntityStatus::Unreachable
    } else if ctx.is_swept(ip) {
        EntityStatus::Reachable
    } else {
        EntityStatus::Unverified
    }
}

/// Docker engine adapter: verifies the plain or TLS API socket and emits one
/// `Container` child per listed container
pub struct DockerAdapter;

impl DockerAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn list_containers(
        ctx: &ScannerContext,
        ip: &str,
    ) -> Result<Vec<ContainerSummary>, ScanFailure> {
        let mut last_error = String::new();
        for (scheme, port) in [("http", 2375), ("https", 2376)] {
            let url = format!("{}://{}:{}/containers/json?all=true", scheme, ip, port);
            match ctx.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json().await.map_err(|e| {
                        ScanFailure::new("Docker API returned malformed data", e.to_string())
                    });
                }
                Ok(response) => {
                    last_error = format!("{} returned {}", url, response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }
        Err(ScanFailure::new("Docker API not reachable", last_error))
    }
}

impl Default for DockerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for DockerAdapter {
    fn name(&self) -> &'static str {
        "Docker"
    }

    fn priority(&self) -> u8 {
        20
    }

    fn handles_type(&self, entity_type: EntityType) -> bool {
        entity_type == EntityType::DockerHost
    }

    fn criteria(&self) -> ActivationCriteria {
        ActivationCriteria::default().with_ports(&[2375, 2376])
    }

    async fn scan(&self, entity: &Entity, ctx: &ScannerContext) -> ScanOutcome {
        if entity.ip.is_empty() {
            return Err(ScanFailure::new(
                "Docker scan needs an address",
                "entity has no ip",
            ));
        }

        let containers = Self::list_containers(ctx, &entity.ip).await?;
        tracing::debug!(
            host = %entity.ip,
            containers = containers.len(),
            "docker engine enumerated"
        );

        let mut discovered = Vec::new();
        for container in &containers {
            let mut child = Entity::new(
                format!("docker-{}", container.short_id()),
                EntityType::Container,
            );
            child.name = container.display_name();
            child.ip = container.first_ip();
            child.status = container_status(&child.ip, ctx);
            child.set_meta(keys::DOCKER_ID, container.id.as_str());
            child.set_meta(keys::CONTAINER_ID, container.id.as_str());
            child.set_meta(keys::CONTAINER_IMAGE, container.image.as_str());
            let exposed = container.exposed_ports();
            if !exposed.is_empty() {
                child.set_meta(keys::EXPOSED_PORTS, exposed);
            }
            if let Some(project) = container.labels.get("com.docker.compose.project") {
                child.set_meta("compose_project", project.as_str());
            }
            discovered.push(child);
        }

        Ok(
            ScanSuccess::patched(EntityPatch::promote(EntityType::DockerHost))
                .with_children(discovered)
                .with_child_hints(vec![EntityType::Container]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_prefixes_detected() {
        assert!(is_bridge_local("172.17.0.2"));
        assert!(is_bridge_local("10.0.3.4"));
        assert!(!is_bridge_local("192.168.1.120"));
    }

    #[test]
    fn container_summary_accessors() {
        let json = r#"{
            "Id": "abc123def456789",
            "Names": ["/portainer"],
            "Image": "portainer/portainer-ce:latest",
            "State": "running",
            "Ports": [{"PrivatePort": 9443, "PublicPort": 9443, "Type": "tcp"}],
            "NetworkSettings": {"Networks": {"bridge": {"IPAddress": "172.17.0.2"}}}
        }"#;
        let summary: ContainerSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.short_id(), "abc123def456");
        assert_eq!(summary.display_name(), "portainer");
        assert_eq!(summary.first_ip(), "172.17.0.2");
        assert_eq!(summary.exposed_ports(), vec!["9443:9443/tcp"]);
    }
}
