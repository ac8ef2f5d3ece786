use super::docker::{container_status, ContainerSummary};
use super::{ActivationCriteria, PlatformAdapter, ScanFailure, ScanOutcome, ScanSuccess};
use crate::constants::PORTAINER_PORT_PREFERENCE;
use crate::context::ScannerContext;
use crate::model::{keys, Entity, EntityPatch, EntityType, MetaValue};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PortainerStatus {
    #[serde(rename = "Version", default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct PortainerEndpoint {
    #[serde(rename = "Id")]
    id: u64,
    #[serde(rename = "Name", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PortainerStackInfo {
    #[serde(rename = "Id")]
    id: u64,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "EndpointId", default)]
    endpoint_id: u64,
}

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Portainer adapter. Verifies the management API, walks its environments,
/// and groups containers under their stacks. Containers another adapter
/// already discovered are enriched in place, never duplicated.
pub struct PortainerAdapter;

impl PortainerAdapter {
    pub fn new() -> Self {
        Self
    }

    fn base_url(entity: &Entity) -> String {
        let port = PORTAINER_PORT_PREFERENCE
            .iter()
            .find(|port| entity.open_ports.contains(port))
            .copied()
            .unwrap_or(PORTAINER_PORT_PREFERENCE[0]);
        let scheme = if port == 9443 { "https" } else { "http" };
        format!("{}://{}:{}", scheme, entity.ip, port)
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        ctx: &ScannerContext,
        base: &str,
        path: &str,
    ) -> Result<T, ScanFailure> {
        let mut request = ctx.http.get(format!("{}{}", base, path));
        if let Some(api_key) = ctx.credentials.get("portainer", "api_key") {
            request = request.header("X-API-Key", api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ScanFailure::new("Portainer API not reachable", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScanFailure::new(
                "Portainer API rejected the request",
                format!("{} returned {}", path, response.status()),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| ScanFailure::new("Portainer API returned malformed data", e.to_string()))
    }

    /// Enrich a previously-discovered container in place: assign the stack
    /// parent and merge metadata the earlier adapter did not have. Returns
    /// true when a match by full or 12-character-prefix id was found.
    fn enrich_existing(
        ctx: &ScannerContext,
        container: &ContainerSummary,
        stack_parent: Option<&str>,
    ) -> bool {
        ctx.with_universe(|universe| {
            let matched = universe.iter_mut().find(|candidate| {
                candidate.entity_type == EntityType::Container
                    && candidate
                        .meta_str(keys::DOCKER_ID)
                        .map(|id| {
                            id == container.id || id.starts_with(container.short_id())
                        })
                        .unwrap_or(false)
            });

            let Some(existing) = matched else {
                return false;
            };

            if let Some(stack_id) = stack_parent {
                existing.parent_id = Some(stack_id.to_string());
            }
            if existing.name.is_empty() {
                existing.name = container.display_name();
            }
            let image = container.image.clone();
            existing
                .metadata
                .entry(keys::CONTAINER_IMAGE.to_string())
                .or_insert(MetaValue::Str(image));
            let exposed = container.exposed_ports();
            if !exposed.is_empty() {
                existing
                    .metadata
                    .entry(keys::EXPOSED_PORTS.to_string())
                    .or_insert(MetaValue::List(exposed));
            }
            true
        })
    }
}

impl Default for PortainerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for PortainerAdapter {
    fn name(&self) -> &'static str {
        "Portainer"
    }

    fn priority(&self) -> u8 {
        30
    }

    fn optional_depends_on(&self) -> Vec<&'static str> {
        vec!["Docker"]
    }

    fn handles_type(&self, entity_type: EntityType) -> bool {
        entity_type == EntityType::PortainerService
    }

    fn criteria(&self) -> ActivationCriteria {
        ActivationCriteria::default().with_ports(&PORTAINER_PORT_PREFERENCE)
    }

    async fn scan(&self, entity: &Entity, ctx: &ScannerContext) -> ScanOutcome {
        if entity.ip.is_empty() {
            return Err(ScanFailure::new(
                "Portainer scan needs an address",
                "entity has no ip",
            ));
        }

        let base = Self::base_url(entity);
        let status: PortainerStatus = Self::api_get(ctx, &base, "/api/status").await?;

        let endpoints: Vec<PortainerEndpoint> =
            Self::api_get(ctx, &base, "/api/endpoints").await.unwrap_or_default();
        let stacks: Vec<PortainerStackInfo> =
            Self::api_get(ctx, &base, "/api/stacks").await.unwrap_or_default();

        let mut discovered: Vec<Entity> = Vec::new();

        for endpoint in &endpoints {
            let containers: Vec<ContainerSummary> = match Self::api_get(
                ctx,
                &base,
                &format!("/api/endpoints/{}/docker/containers/json?all=true", endpoint.id),
            )
            .await
            {
                Ok(containers) => containers,
                // An environment that stopped answering is partial data
                Err(_) => continue,
            };

            // Stacks for this environment, keyed by compose project name
            let endpoint_stacks: Vec<&PortainerStackInfo> = stacks
                .iter()
                .filter(|stack| stack.endpoint_id == endpoint.id)
                .collect();

            for stack in &endpoint_stacks {
                let stack_entity_id = format!("portainer-stack-{}", stack.id);
                let member_ids: Vec<String> = containers
                    .iter()
                    .filter(|container| {
                        container.labels.get(COMPOSE_PROJECT_LABEL) == Some(&stack.name)
                    })
                    .map(|container| container.id.clone())
                    .collect();

                let mut stack_entity =
                    Entity::new(stack_entity_id, EntityType::PortainerStack);
                stack_entity.name = stack.name.clone();
                stack_entity.status = crate::model::EntityStatus::Reachable;
                stack_entity.set_meta(keys::PORTAINER_STACK_ID, stack.id.to_string());
                stack_entity.set_meta("portainer_endpoint", endpoint.name.as_str());
                stack_entity.set_meta(keys::CONTAINER_IDS, member_ids);
                discovered.push(stack_entity);
            }

            for container in &containers {
                let stack_parent = container
                    .labels
                    .get(COMPOSE_PROJECT_LABEL)
                    .and_then(|project| {
                        endpoint_stacks
                            .iter()
                            .find(|stack| stack.name == *project)
                            .map(|stack| format!("portainer-stack-{}", stack.id))
                    });

                if Self::enrich_existing(ctx, container, stack_parent.as_deref()) {
                    continue;
                }

                // Portainer saw a container no engine scan reported
                let mut child = Entity::new(
                    format!("docker-{}", container.short_id()),
                    EntityType::Container,
                );
                child.name = container.display_name();
                child.ip = container.first_ip();
                child.status = container_status(&child.ip, ctx);
                child.parent_id = stack_parent;
                child.set_meta(keys::DOCKER_ID, container.id.as_str());
                child.set_meta(keys::CONTAINER_ID, container.id.as_str());
                child.set_meta(keys::CONTAINER_IMAGE, container.image.as_str());
                let exposed = container.exposed_ports();
                if !exposed.is_empty() {
                    child.set_meta(keys::EXPOSED_PORTS, exposed);
                }
                discovered.push(child);
            }
        }

        let patch = EntityPatch::promote(EntityType::PortainerService)
            .with_meta("portainer_version", status.version.as_str());

        Ok(ScanSuccess::patched(patch)
            .with_children(discovered)
            .with_child_hints(vec![EntityType::PortainerStack, EntityType::Container]))
    }
}
