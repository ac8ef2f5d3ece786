use crate::adapters::{ActivationCriteria, PlatformAdapter};
use crate::context::ScannerContext;
use crate::errors::DiscoveryError;
use crate::model::Entity;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Holds the registered platform adapters and computes, for a given entity,
/// the ordered dependency-satisfied list of adapters to run.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Register an adapter, indexed by name. Duplicate names are rejected.
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) -> Result<(), DiscoveryError> {
        if self.adapters.iter().any(|a| a.name() == adapter.name()) {
            return Err(DiscoveryError::ConfigError(format!(
                "adapter already registered: {}",
                adapter.name()
            )));
        }
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.adapters.len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .map(Arc::clone)
    }

    /// Compute the adapters applicable to `entity`, ordered by priority and
    /// then re-ordered so hard dependencies run first.
    pub async fn find_applicable(
        &self,
        entity: &Entity,
        ctx: &ScannerContext,
    ) -> Vec<Arc<dyn PlatformAdapter>> {
        let mut candidates: Vec<Arc<dyn PlatformAdapter>> = Vec::new();
        let mut by_priority: Vec<&Arc<dyn PlatformAdapter>> = self.adapters.iter().collect();
        by_priority.sort_by_key(|a| a.priority());

        for adapter in by_priority {
            // Type match bypasses all other criteria
            if adapter.handles_type(entity.entity_type) {
                candidates.push(Arc::clone(adapter));
                continue;
            }
            if self
                .criteria_pass(&adapter.criteria(), entity, ctx)
                .await
            {
                candidates.push(Arc::clone(adapter));
            }
        }

        order_by_dependencies(candidates)
    }

    async fn criteria_pass(
        &self,
        criteria: &ActivationCriteria,
        entity: &Entity,
        ctx: &ScannerContext,
    ) -> bool {
        let declarative = !criteria.required_open_ports.is_empty()
            || !criteria.required_http_headers.is_empty()
            || !criteria.required_url_patterns.is_empty()
            || criteria.custom_predicate.is_some();
        if !declarative {
            // No criteria configured means the adapter only runs on type match
            return false;
        }

        if !criteria.required_open_ports.is_empty()
            && !criteria
                .required_open_ports
                .iter()
                .any(|port| entity.open_ports.contains(port))
        {
            return false;
        }

        for (name, needle) in &criteria.required_http_headers {
            let matched = entity
                .header(name)
                .map(|value| value.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }

        if !criteria.required_url_patterns.is_empty()
            && !self.any_url_answers(entity, &criteria.required_url_patterns, ctx).await
        {
            return false;
        }

        if let Some(ref predicate) = criteria.custom_predicate {
            if !predicate(entity) {
                return false;
            }
        }

        true
    }

    /// Probe each pattern at the entity's address, HTTPS first with an HTTP
    /// fallback, until one answers 2xx
    async fn any_url_answers(
        &self,
        entity: &Entity,
        patterns: &[String],
        ctx: &ScannerContext,
    ) -> bool {
        if entity.ip.is_empty() {
            return false;
        }
        for pattern in patterns {
            for scheme in ["https", "http"] {
                let url = format!("{}://{}{}", scheme, entity.ip, pattern);
                if let Ok(response) = ctx.http.get(&url).send().await {
                    if response.status().is_success() {
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl AdapterRegistry {
    /// Registry preloaded with the built-in platform adapters
    pub fn standard(
        config: &crate::config::ScanConfig,
        leases: Vec<crate::adapters::router::DhcpLease>,
    ) -> Result<Self, DiscoveryError> {
        use crate::adapters::{
            docker::DockerAdapter,
            portainer::PortainerAdapter,
            proxmox::ProxmoxAdapter,
            router::{RouterAdapter, StaticLeaseSource},
            unraid::UnraidAdapter,
        };

        let mut registry = Self::new();
        registry.register(Arc::new(RouterAdapter::new(
            config.gateway_ip.clone(),
            Arc::new(StaticLeaseSource::new(leases)),
        )))?;
        registry.register(Arc::new(ProxmoxAdapter::new()))?;
        registry.register(Arc::new(DockerAdapter::new()))?;
        registry.register(Arc::new(PortainerAdapter::new()))?;
        registry.register(Arc::new(UnraidAdapter::new()))?;
        Ok(registry)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit adapters so that every hard dependency present in the plan runs
/// before its dependent. When the remaining set cannot make progress (a
/// dependency cycle), the remainder keeps its priority order and a warning
/// is logged; orchestration tolerates the degraded ordering.
fn order_by_dependencies(
    candidates: Vec<Arc<dyn PlatformAdapter>>,
) -> Vec<Arc<dyn PlatformAdapter>> {
    let present: BTreeSet<&str> = candidates.iter().map(|a| a.name()).collect();
    let mut emitted: BTreeSet<&str> = BTreeSet::new();
    let mut ordered: Vec<Arc<dyn PlatformAdapter>> = Vec::new();
    let mut remaining: Vec<Arc<dyn PlatformAdapter>> = candidates;

    while !remaining.is_empty() {
        let position = remaining.iter().position(|adapter| {
            adapter
                .depends_on()
                .iter()
                .filter(|dep| present.contains(**dep))
                .all(|dep| emitted.contains(*dep))
        });

        match position {
            Some(idx) => {
                let adapter = remaining.remove(idx);
                emitted.insert(adapter.name());
                ordered.push(adapter);
            }
            None => {
                tracing::warn!(
                    adapters = ?remaining.iter().map(|a| a.name()).collect::<Vec<_>>(),
                    "adapter dependency cycle, emitting remainder in priority order"
                );
                ordered.extend(remaining.drain(..));
            }
        }
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ScanOutcome, ScanSuccess};
    use crate::model::EntityType;
    use async_trait::async_trait;

    struct StubAdapter {
        name: &'static str,
        priority: u8,
        deps: Vec<&'static str>,
    }

    #[async_trait]
    impl PlatformAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn depends_on(&self) -> Vec<&'static str> {
            self.deps.clone()
        }

        fn handles_type(&self, _entity_type: EntityType) -> bool {
            false
        }

        async fn scan(&self, _entity: &Entity, _ctx: &ScannerContext) -> ScanOutcome {
            Ok(ScanSuccess::default())
        }
    }

    fn stub(name: &'static str, priority: u8, deps: Vec<&'static str>) -> Arc<dyn PlatformAdapter> {
        Arc::new(StubAdapter {
            name,
            priority,
            deps,
        })
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = AdapterRegistry::new();
        registry.register(stub("Docker", 20, vec![])).unwrap();
        let err = registry.register(stub("Docker", 25, vec![])).unwrap_err();
        assert!(err.to_string().contains("Docker"));
    }

    #[test]
    fn dependency_order_puts_hard_deps_first() {
        // Portainer (30) depends on Docker (20); Router (5) is independent
        let ordered = order_by_dependencies(vec![
            stub("Router", 5, vec![]),
            stub("Portainer", 30, vec!["Docker"]),
            stub("Docker", 20, vec![]),
        ]);
        let names: Vec<&str> = ordered.iter().map(|a| a.name()).collect();
        let docker = names.iter().position(|n| *n == "Docker").unwrap();
        let portainer = names.iter().position(|n| *n == "Portainer").unwrap();
        assert!(docker < portainer);
    }

    #[test]
    fn absent_dependency_is_ignored() {
        let ordered = order_by_dependencies(vec![stub("Portainer", 30, vec!["Docker"])]);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].name(), "Portainer");
    }

    #[test]
    fn cycle_degrades_to_priority_order() {
        let ordered = order_by_dependencies(vec![
            stub("A", 1, vec!["B"]),
            stub("B", 2, vec!["A"]),
        ]);
        let names: Vec<&str> = ordered.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
