use crate::context::ScannerContext;
use crate::model::{Entity, EntityPatch, EntityType};
use async_trait::async_trait;
use std::sync::Arc;

pub mod docker;
pub mod portainer;
pub mod proxmox;
pub mod router;
pub mod unraid;

/// Predicate evaluated against the candidate entity when declarative
/// criteria are not enough (e.g. exact LAN-gateway match)
pub type EntityPredicate = Arc<dyn Fn(&Entity) -> bool + Send + Sync>;

/// Criteria the registry evaluates for adapters that do not type-match the
/// entity. Everything configured must pass.
#[derive(Default, Clone)]
pub struct ActivationCriteria {
    /// Nonempty means the entity's open ports must intersect this set
    pub required_open_ports: Vec<u16>,
    /// Each (header name, substring) pair must match case-insensitively
    pub required_http_headers: Vec<(String, String)>,
    /// At least one probe URL must answer 2xx, HTTPS first then HTTP
    pub required_url_patterns: Vec<String>,
    pub custom_predicate: Option<EntityPredicate>,
}

impl ActivationCriteria {
    pub fn with_ports(mut self, ports: &[u16]) -> Self {
        self.required_open_ports = ports.to_vec();
        self
    }

    pub fn with_header(mut self, name: &str, substring: &str) -> Self {
        self.required_http_headers
            .push((name.to_string(), substring.to_string()));
        self
    }

    pub fn with_url_pattern(mut self, pattern: &str) -> Self {
        self.required_url_patterns.push(pattern.to_string());
        self
    }

    pub fn with_predicate(mut self, predicate: EntityPredicate) -> Self {
        self.custom_predicate = Some(predicate);
        self
    }
}

/// Positive scan result: a patch for the scanned entity plus any children
/// it hosts
#[derive(Debug, Default)]
pub struct ScanSuccess {
    /// Applied atomically by the orchestrator, together with id rebinding
    pub patch: EntityPatch,
    pub discovered: Vec<Entity>,
    /// Types the adapter expects among its children, a routing hint for
    /// follow-up adapter selection
    pub child_hint_types: Vec<EntityType>,
}

impl ScanSuccess {
    pub fn patched(patch: EntityPatch) -> Self {
        Self {
            patch,
            ..Self::default()
        }
    }

    pub fn with_children(mut self, discovered: Vec<Entity>) -> Self {
        self.discovered = discovered;
        self
    }

    pub fn with_child_hints(mut self, types: Vec<EntityType>) -> Self {
        self.child_hint_types = types;
        self
    }
}

/// Verification failure local to one adapter on one entity. Never aborts
/// the run; the orchestrator records it and moves on.
#[derive(Debug, Clone)]
pub struct ScanFailure {
    pub message: String,
    pub details: String,
}

impl ScanFailure {
    pub fn new(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: details.into(),
        }
    }
}

pub type ScanOutcome = Result<ScanSuccess, ScanFailure>;

/// Uniform contract for platform adapters.
///
/// An adapter verifies a platform identity on the entity it is handed,
/// enumerates child resources, and reports them without touching the entity
/// directly: promotions travel back as an [`EntityPatch`]. Cross-entity
/// enrichment goes through the context universe under its lock.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ascending run order among applicable adapters, before dependency
    /// resolution
    fn priority(&self) -> u8;

    /// Hard dependencies by adapter name
    fn depends_on(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Best-effort dependencies; absence never blocks the plan
    fn optional_depends_on(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Fixed type map. A type-matched adapter is selected immediately,
    /// bypassing activation criteria.
    fn handles_type(&self, entity_type: EntityType) -> bool;

    fn criteria(&self) -> ActivationCriteria {
        ActivationCriteria::default()
    }

    async fn scan(&self, entity: &Entity, ctx: &ScannerContext) -> ScanOutcome;
}
