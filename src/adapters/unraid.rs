use super::{ActivationCriteria, PlatformAdapter, ScanFailure, ScanOutcome, ScanSuccess};
use crate::context::ScannerContext;
use crate::model::{keys, Entity, EntityPatch, EntityStatus, EntityType};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<GraphqlData>,
}

#[derive(Debug, Deserialize)]
struct GraphqlData {
    #[serde(default)]
    docker: Option<DockerState>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerState {
    #[serde(default)]
    containers: Vec<UnraidContainer>,
}

#[derive(Debug, Deserialize)]
struct UnraidContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    state: String,
}

/// Unraid adapter. Triggered by the Unraid CSP token in probe headers;
/// reads Docker state through the GraphQL API. When the host was already
/// classified by another platform, a fresh `Unraid` root is created above
/// it instead of overwriting the classification.
pub struct UnraidAdapter;

impl UnraidAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn docker_state(
        ctx: &ScannerContext,
        ip: &str,
    ) -> Result<Vec<UnraidContainer>, ScanFailure> {
        let query = json!({
            "query": "{ docker { containers { id names state } } }"
        });
        let mut request = ctx.http.post(format!("https://{}/graphql", ip));
        if let Some(api_key) = ctx.credentials.get("unraid", "api_key") {
            request = request.header("x-api-key", api_key);
        }

        let response = request
            .json(&query)
            .send()
            .await
            .map_err(|e| ScanFailure::new("Unraid GraphQL not reachable", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScanFailure::new(
                "Unraid GraphQL rejected the request",
                format!("status {}", response.status()),
            ));
        }

        let body: GraphqlResponse = response
            .json()
            .await
            .map_err(|e| ScanFailure::new("Unraid GraphQL returned malformed data", e.to_string()))?;
        Ok(body
            .data
            .and_then(|data| data.docker)
            .unwrap_or_default()
            .containers)
    }

    /// Match reported containers to entities an engine scan already emitted
    /// and override their address and status with what Unraid knows. No
    /// entities are fabricated here; correlation reparents later.
    fn enrich_containers(
        ctx: &ScannerContext,
        host_ip: &str,
        containers: &[UnraidContainer],
    ) {
        ctx.with_universe(|universe| {
            for reported in containers {
                let short = &reported.id[..reported.id.len().min(12)];
                let matched = universe.iter_mut().find(|candidate| {
                    candidate.entity_type == EntityType::Container
                        && candidate
                            .meta_str(keys::DOCKER_ID)
                            .map(|id| id == reported.id || id.starts_with(short))
                            .unwrap_or(false)
                });
                let Some(existing) = matched else {
                    continue;
                };

                existing.ip = host_ip.to_string();
                existing.status = if reported.state.eq_ignore_ascii_case("running") {
                    EntityStatus::Reachable
                } else {
                    EntityStatus::Unreachable
                };
                if existing.name.is_empty() {
                    if let Some(name) = reported.names.first() {
                        existing.name = name.trim_start_matches('/').to_string();
                    }
                }
            }
        });
    }
}

impl Default for UnraidAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for UnraidAdapter {
    fn name(&self) -> &'static str {
        "Unraid"
    }

    fn priority(&self) -> u8 {
        35
    }

    fn handles_type(&self, entity_type: EntityType) -> bool {
        entity_type == EntityType::Unraid
    }

    fn criteria(&self) -> ActivationCriteria {
        ActivationCriteria::default().with_header("Content-Security-Policy", "unraid")
    }

    async fn scan(&self, entity: &Entity, ctx: &ScannerContext) -> ScanOutcome {
        if entity.ip.is_empty() {
            return Err(ScanFailure::new(
                "Unraid scan needs an address",
                "entity has no ip",
            ));
        }

        let containers = Self::docker_state(ctx, &entity.ip).await?;
        Self::enrich_containers(ctx, &entity.ip, &containers);

        let already_classified = !matches!(
            entity.entity_type,
            EntityType::Unknown | EntityType::Unraid
        );

        if already_classified {
            // Keep the earlier classification and slot a new Unraid root
            // above it
            let root_id = format!("unraid-{}", entity.ip);
            let mut root = Entity::new(root_id.clone(), EntityType::Unraid);
            root.ip = entity.ip.clone();
            root.status = EntityStatus::Reachable;
            root.parent_id = Some(String::new());

            tracing::debug!(
                host = %entity.ip,
                prior = %entity.entity_type,
                "host already classified, creating Unraid root above it"
            );

            Ok(
                ScanSuccess::patched(EntityPatch::default().with_parent(root_id))
                    .with_children(vec![root])
                    .with_child_hints(vec![EntityType::Container]),
            )
        } else {
            let patch = EntityPatch::promote(EntityType::Unraid)
                .with_status(EntityStatus::Reachable);
            Ok(ScanSuccess::patched(patch).with_child_hints(vec![EntityType::Container]))
        }
    }
}
