use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Reserved metadata keys interpreted by the core. Adapters may attach any
/// other key; the core carries those through untouched.
pub mod keys {
    pub const DOCKER_ID: &str = "docker_id";
    pub const CONTAINER_ID: &str = "container_id";
    pub const CONTAINER_IDS: &str = "container_ids";
    pub const CONTAINER_IMAGE: &str = "container_image";
    pub const EXPOSED_PORTS: &str = "exposed_ports";
    pub const PROXMOX_VMID: &str = "proxmox_vmid";
    pub const PROXMOX_NODE: &str = "proxmox_node";
    pub const PORTAINER_STACK_ID: &str = "portainer_stack_id";
    pub const API_REPORTED_IP: &str = "api_reported_ip";
    pub const MAC_ADDRESS: &str = "mac_address";
    pub const SCAN_ERROR: &str = "scan_error";
    pub const SCAN_ERROR_REASON: &str = "scan_error_reason";
    pub const SCAN_EXCEPTION: &str = "scan_exception";
    pub const HINT_TOKEN_ENV: &str = "hint_token_env";
    pub const REASON: &str = "reason";
}

/// Classification of a discovered entity within the topology graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Unknown,
    Proxmox,
    ProxmoxCluster,
    ProxmoxNode,
    Pc,
    Vm,
    Lxc,
    DockerHost,
    Container,
    PortainerService,
    PortainerStack,
    Unraid,
    Nas,
    Service,
    Router,
    AccessPoint,
}

impl EntityType {
    /// Logical groupings have no network endpoint of their own and are
    /// excluded from endpoint-collision checks.
    pub fn is_logical(self) -> bool {
        matches!(self, Self::ProxmoxCluster | Self::PortainerStack)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "Unknown",
            Self::Proxmox => "Proxmox",
            Self::ProxmoxCluster => "ProxmoxCluster",
            Self::ProxmoxNode => "ProxmoxNode",
            Self::Pc => "PC",
            Self::Vm => "VM",
            Self::Lxc => "LXC",
            Self::DockerHost => "DockerHost",
            Self::Container => "Container",
            Self::PortainerService => "PortainerService",
            Self::PortainerStack => "PortainerStack",
            Self::Unraid => "Unraid",
            Self::Nas => "NAS",
            Self::Service => "Service",
            Self::Router => "Router",
            Self::AccessPoint => "AccessPoint",
        };
        write!(f, "{}", label)
    }
}

/// Reachability verdict for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityStatus {
    Reachable,
    Unreachable,
    Unverified,
    Conflicting,
    Stale,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Reachable => "Reachable",
            Self::Unreachable => "Unreachable",
            Self::Unverified => "Unverified",
            Self::Conflicting => "Conflicting",
            Self::Stale => "Stale",
        };
        write!(f, "{}", label)
    }
}

/// Tagged metadata value so serialization and equality stay total.
/// Untagged on the wire: JSON keeps its natural shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// TLS certificate summary captured when an adapter talked to the endpoint
/// over HTTPS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateSummary {
    pub is_self_signed: bool,
    pub issuer: String,
    pub expiry: String,
    pub fingerprint: String,
}

/// A node in the topology graph. Created by the sweeper, an adapter, or a
/// hint; mutated by the adapter currently scanning it or by correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, unique across a run. API-native id when available,
    /// else `type:name`, else the bare IP.
    pub id: String,

    /// Canonical dotted IPv4, or empty for logical entities
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,

    #[serde(rename = "type")]
    pub entity_type: EntityType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// `None` means not yet assigned; the orchestrator fills it in with the
    /// parent's id. `Some("")` is the root sentinel and must never be
    /// re-parented by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    pub status: EntityStatus,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub open_ports: BTreeSet<u16>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateSummary>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetaValue>,
}

impl Entity {
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            ip: String::new(),
            entity_type,
            name: String::new(),
            parent_id: None,
            status: EntityStatus::Unverified,
            open_ports: BTreeSet::new(),
            http_headers: BTreeMap::new(),
            certificate: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Unclassified host as produced by the port prober
    pub fn unknown(ip: impl Into<String>) -> Self {
        let ip = ip.into();
        let mut entity = Self::new(ip.clone(), EntityType::Unknown);
        entity.ip = ip;
        entity.status = EntityStatus::Reachable;
        entity
    }

    /// True when the entity is an explicit root (empty-string parent sentinel)
    pub fn is_root(&self) -> bool {
        matches!(self.parent_id.as_deref(), Some(""))
    }

    /// Endpoint entities take part in (ip, port) collision checks
    pub fn is_endpoint(&self) -> bool {
        !self.entity_type.is_logical()
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetaValue::as_str)
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<MetaValue>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Header lookup by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.http_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Atomic mutation record returned by an adapter for the entity it scanned.
/// The orchestrator applies the whole patch in one step so promotions
/// (type, id, ip rewrites) can never race with emitted children.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub new_type: Option<EntityType>,
    pub new_id: Option<String>,
    /// `Some(String::new())` clears the ip, as cluster promotion requires
    pub new_ip: Option<String>,
    pub new_name: Option<String>,
    pub new_parent: Option<String>,
    pub new_status: Option<EntityStatus>,
    pub metadata: BTreeMap<String, MetaValue>,
}

impl EntityPatch {
    pub fn promote(entity_type: EntityType) -> Self {
        Self {
            new_type: Some(entity_type),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.new_id = Some(id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.new_ip = Some(ip.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.new_name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.new_parent = Some(parent_id.into());
        self
    }

    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.new_status = Some(status);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.new_type.is_none()
            && self.new_id.is_none()
            && self.new_ip.is_none()
            && self.new_name.is_none()
            && self.new_parent.is_none()
            && self.new_status.is_none()
            && self.metadata.is_empty()
    }

    /// Apply every recorded change to the entity. Name overrides only apply
    /// when non-empty so an adapter cannot blank a label by accident.
    pub fn apply_to(&self, entity: &mut Entity) {
        if let Some(entity_type) = self.new_type {
            entity.entity_type = entity_type;
        }
        if let Some(ref id) = self.new_id {
            entity.id = id.clone();
        }
        if let Some(ref ip) = self.new_ip {
            entity.ip = ip.clone();
        }
        if let Some(ref name) = self.new_name {
            if !name.is_empty() {
                entity.name = name.clone();
            }
        }
        if let Some(ref parent) = self.new_parent {
            entity.parent_id = Some(parent.clone());
        }
        if let Some(status) = self.new_status {
            entity.status = status;
        }
        for (key, value) in &self.metadata {
            entity.metadata.insert(key.clone(), value.clone());
        }
    }
}

/// Invariant violation found by the conflict detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    TypeMismatch,
    UnverifiedEntity,
    IpMismatch,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TypeMismatch => "TypeMismatch",
            Self::UnverifiedEntity => "UnverifiedEntity",
            Self::IpMismatch => "IpMismatch",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub ip: String,
    pub kind: ConflictKind,
    /// Ids of the entities involved
    pub involved: Vec<String>,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_entity_is_reachable_with_ip_id() {
        let entity = Entity::unknown("192.168.1.10");
        assert_eq!(entity.id, "192.168.1.10");
        assert_eq!(entity.ip, "192.168.1.10");
        assert_eq!(entity.entity_type, EntityType::Unknown);
        assert_eq!(entity.status, EntityStatus::Reachable);
    }

    #[test]
    fn root_sentinel_distinct_from_unset() {
        let mut entity = Entity::unknown("192.168.1.10");
        assert!(!entity.is_root());
        entity.parent_id = Some(String::new());
        assert!(entity.is_root());
    }

    #[test]
    fn logical_types_are_not_endpoints() {
        assert!(EntityType::ProxmoxCluster.is_logical());
        assert!(EntityType::PortainerStack.is_logical());
        assert!(!EntityType::Container.is_logical());

        let stack = Entity::new("stack-1", EntityType::PortainerStack);
        assert!(!stack.is_endpoint());
    }

    #[test]
    fn patch_applies_atomically() {
        let mut entity = Entity::unknown("192.168.1.51");
        let patch = EntityPatch::promote(EntityType::ProxmoxCluster)
            .with_id("proxmox-cluster-pve")
            .with_ip("")
            .with_name("pve")
            .with_meta(keys::REASON, "cluster promotion");

        patch.apply_to(&mut entity);
        assert_eq!(entity.entity_type, EntityType::ProxmoxCluster);
        assert_eq!(entity.id, "proxmox-cluster-pve");
        assert!(entity.ip.is_empty());
        assert_eq!(entity.name, "pve");
        assert_eq!(entity.meta_str(keys::REASON), Some("cluster promotion"));
    }

    #[test]
    fn patch_empty_name_does_not_blank_label() {
        let mut entity = Entity::unknown("192.168.1.51");
        entity.name = "pve-host".to_string();
        EntityPatch::default().with_name("").apply_to(&mut entity);
        assert_eq!(entity.name, "pve-host");
    }

    #[test]
    fn meta_value_untagged_round_trip() {
        let values = vec![
            MetaValue::Bool(true),
            MetaValue::Int(42),
            MetaValue::Str("vm-100".to_string()),
            MetaValue::List(vec!["80/tcp".to_string(), "443/tcp".to_string()]),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<MetaValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(values, back);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut entity = Entity::unknown("192.168.1.9");
        entity
            .http_headers
            .insert("Content-Security-Policy".to_string(), "unraid".to_string());
        assert_eq!(entity.header("content-security-policy"), Some("unraid"));
        assert_eq!(entity.header("server"), None);
    }
}
