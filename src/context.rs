use crate::config::ScanConfig;
use crate::errors::DiscoveryError;
use crate::model::{Entity, EntityType};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Operator-provided pre-label applied between probe and orchestration.
/// Name overrides always win; type applies only over `Unknown`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanHint {
    pub ip: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub token_env: Option<String>,
}

/// Opaque `(service, key) -> value` secret store. A stored value of the form
/// `env:VAR` is resolved against the process environment at lookup time so
/// tokens never land in config files.
#[derive(Debug, Default, Clone)]
pub struct CredentialStore {
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { entries }
    }

    pub fn insert(&mut self, service: &str, key: &str, value: impl Into<String>) {
        self.entries
            .entry(service.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn get(&self, service: &str, key: &str) -> Option<String> {
        let raw = self.entries.get(service)?.get(key)?;
        match raw.strip_prefix("env:") {
            Some(var) => std::env::var(var).ok(),
            None => Some(raw.clone()),
        }
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.entries.contains_key(service)
    }
}

/// Shared per-run state handed to every adapter.
///
/// The entity universe sits behind a mutex; adapters and the orchestrator
/// take the lock only for short synchronous sections and never across an
/// await. The scanned-cluster registry is read-mostly, so it uses a RwLock.
pub struct ScannerContext {
    pub config: ScanConfig,
    pub credentials: CredentialStore,
    pub hints: Vec<ScanHint>,
    pub http: reqwest::Client,
    pub cancel: CancellationToken,
    swept_ips: RwLock<BTreeSet<String>>,
    universe: Mutex<Vec<Entity>>,
    scanned_clusters: RwLock<BTreeSet<String>>,
}

impl ScannerContext {
    pub fn new(
        config: ScanConfig,
        credentials: CredentialStore,
        hints: Vec<ScanHint>,
    ) -> Result<Self, DiscoveryError> {
        // Homelab endpoints are routinely self-signed
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()?;

        Ok(Self {
            config,
            credentials,
            hints,
            http,
            cancel: CancellationToken::new(),
            swept_ips: RwLock::new(BTreeSet::new()),
            universe: Mutex::new(Vec::new()),
            scanned_clusters: RwLock::new(BTreeSet::new()),
        })
    }

    pub fn set_swept_ips(&self, ips: impl IntoIterator<Item = String>) {
        let mut guard = self.swept_ips.write().expect("swept set poisoned");
        guard.clear();
        guard.extend(ips);
    }

    /// Whether the reachability sweep saw this address respond
    pub fn is_swept(&self, ip: &str) -> bool {
        self.swept_ips
            .read()
            .expect("swept set poisoned")
            .contains(ip)
    }

    pub fn swept_ips(&self) -> BTreeSet<String> {
        self.swept_ips.read().expect("swept set poisoned").clone()
    }

    /// Run `f` against the locked universe. Callers must not await inside.
    pub fn with_universe<R>(&self, f: impl FnOnce(&mut Vec<Entity>) -> R) -> R {
        let mut guard = self.universe.lock().expect("universe poisoned");
        f(&mut guard)
    }

    pub fn snapshot(&self) -> Vec<Entity> {
        self.universe.lock().expect("universe poisoned").clone()
    }

    pub fn push_entity(&self, entity: Entity) {
        self.with_universe(|universe| universe.push(entity));
    }

    /// Record a cluster as processed. Returns false when it was already
    /// flagged, which tells a later entry point to skip the cluster.
    pub fn mark_cluster_scanned(&self, cluster_id: &str) -> bool {
        self.scanned_clusters
            .write()
            .expect("cluster registry poisoned")
            .insert(cluster_id.to_string())
    }

    pub fn cluster_already_scanned(&self, cluster_id: &str) -> bool {
        self.scanned_clusters
            .read()
            .expect("cluster registry poisoned")
            .contains(cluster_id)
    }
}
