#![allow(dead_code)]

use async_trait::async_trait;
use labtopo::adapters::{ActivationCriteria, PlatformAdapter, ScanOutcome};
use labtopo::context::{CredentialStore, ScannerContext};
use labtopo::model::{Entity, EntityType};
use labtopo::ScanConfig;
use std::sync::Arc;

/// Create a fingerprinted host entity the way the prober would
pub fn create_test_host(ip: &str, open_ports: &[u16]) -> Entity {
    let mut entity = Entity::unknown(ip);
    entity.open_ports = open_ports.iter().copied().collect();
    entity
}

/// Context with default config, no credentials, and the given swept set
#[allow(dead_code)]
pub fn create_test_context(swept: &[&str]) -> Arc<ScannerContext> {
    let ctx = ScannerContext::new(ScanConfig::default(), CredentialStore::new(), Vec::new())
        .expect("context builds");
    ctx.set_swept_ips(swept.iter().map(|ip| ip.to_string()));
    Arc::new(ctx)
}

pub type MockBehavior =
    Box<dyn Fn(&Entity, &ScannerContext) -> ScanOutcome + Send + Sync>;

/// Scripted adapter for orchestration tests
pub struct MockAdapter {
    name: &'static str,
    priority: u8,
    deps: Vec<&'static str>,
    handles: Vec<EntityType>,
    criteria: ActivationCriteria,
    behavior: MockBehavior,
}

#[allow(dead_code)]
impl MockAdapter {
    pub fn new(name: &'static str, priority: u8, behavior: MockBehavior) -> Self {
        Self {
            name,
            priority,
            deps: Vec::new(),
            handles: Vec::new(),
            criteria: ActivationCriteria::default(),
            behavior,
        }
    }

    pub fn with_ports(mut self, ports: &[u16]) -> Self {
        self.criteria = self.criteria.with_ports(ports);
        self
    }

    pub fn with_deps(mut self, deps: Vec<&'static str>) -> Self {
        self.deps = deps;
        self
    }

    pub fn with_header(mut self, name: &str, substring: &str) -> Self {
        self.criteria = self.criteria.with_header(name, substring);
        self
    }

    pub fn with_url_pattern(mut self, pattern: &str) -> Self {
        self.criteria = self.criteria.with_url_pattern(pattern);
        self
    }

    pub fn handling(mut self, types: Vec<EntityType>) -> Self {
        self.handles = types;
        self
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn depends_on(&self) -> Vec<&'static str> {
        self.deps.clone()
    }

    fn handles_type(&self, entity_type: EntityType) -> bool {
        self.handles.contains(&entity_type)
    }

    fn criteria(&self) -> ActivationCriteria {
        self.criteria.clone()
    }

    async fn scan(&self, entity: &Entity, ctx: &ScannerContext) -> ScanOutcome {
        (self.behavior)(entity, ctx)
    }
}
