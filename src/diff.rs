//! Snapshot comparison between two discovery runs.
//!
//! Entities are correlated across runs by a stable fingerprint so renames
//! and address changes show up as modifications instead of a removed plus
//! added pair.

use crate::model::{keys, Entity};
use crate::report::TopologyReport;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
    ModifiedIp,
    ModifiedStatus,
    ModifiedParent,
    ModifiedName,
    ModifiedExposedPorts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyChange {
    pub kind: ChangeKind,
    pub fingerprint: String,
    pub entity_id: String,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub baseline_scan_id: String,
    pub current_scan_id: String,
    pub changes: Vec<TopologyChange>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &TopologyChange> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }
}

/// Stable cross-run key. Platform-native identifiers always beat the
/// mutable attributes, so a renamed container keeps its identity.
pub fn fingerprint(entity: &Entity) -> String {
    if let Some(docker_id) = entity.meta_str(keys::DOCKER_ID) {
        return format!("docker:{}", docker_id);
    }
    if let Some(vmid) = entity.meta_str(keys::PROXMOX_VMID) {
        return format!("proxmox:{}", vmid);
    }
    if let Some(stack_id) = entity.meta_str(keys::PORTAINER_STACK_ID) {
        return format!("portainer-stack:{}", stack_id);
    }
    if !entity.name.is_empty() {
        return format!("{}:{}", entity.entity_type, entity.name);
    }
    format!("ip:{}", entity.ip)
}

fn exposed_ports(entity: &Entity) -> BTreeSet<String> {
    entity
        .metadata
        .get(keys::EXPOSED_PORTS)
        .and_then(|value| value.as_list())
        .map(|list| list.iter().cloned().collect())
        .unwrap_or_default()
}

/// Compare two snapshots and report added, removed, and modified entities
pub fn diff(baseline: &TopologyReport, current: &TopologyReport) -> DiffReport {
    let old: BTreeMap<String, &Entity> = baseline
        .entities
        .iter()
        .map(|entity| (fingerprint(entity), entity))
        .collect();
    let new: BTreeMap<String, &Entity> = current
        .entities
        .iter()
        .map(|entity| (fingerprint(entity), entity))
        .collect();

    let mut changes = Vec::new();

    for (print, entity) in &new {
        match old.get(print) {
            None => changes.push(TopologyChange {
                kind: ChangeKind::Added,
                fingerprint: print.clone(),
                entity_id: entity.id.clone(),
                details: format!("New entity '{}' ({})", entity.id, entity.entity_type),
            }),
            Some(previous) => {
                if let Some(change) = field_changes(print, previous, entity) {
                    changes.push(change);
                }
            }
        }
    }

    for (print, entity) in &old {
        if !new.contains_key(print) {
            changes.push(TopologyChange {
                kind: ChangeKind::Removed,
                fingerprint: print.clone(),
                entity_id: entity.id.clone(),
                details: format!(
                    "Entity '{}' ({}) no longer present",
                    entity.id, entity.entity_type
                ),
            });
        }
    }

    DiffReport {
        baseline_scan_id: baseline.scan_id.clone(),
        current_scan_id: current.scan_id.clone(),
        changes,
    }
}

/// Field-by-field comparison in fixed order; the first differing field
/// names the change kind, the details list every difference
fn field_changes(print: &str, old: &Entity, new: &Entity) -> Option<TopologyChange> {
    let mut kind: Option<ChangeKind> = None;
    let mut details: Vec<String> = Vec::new();

    if old.ip != new.ip {
        kind.get_or_insert(ChangeKind::ModifiedIp);
        details.push(format!("IP changed: {} → {}", old.ip, new.ip));
    }
    if old.status != new.status {
        kind.get_or_insert(ChangeKind::ModifiedStatus);
        details.push(format!("Status changed: {} → {}", old.status, new.status));
    }
    if old.parent_id != new.parent_id {
        kind.get_or_insert(ChangeKind::ModifiedParent);
        details.push(format!(
            "Parent changed: {} → {}",
            old.parent_id.as_deref().unwrap_or("-"),
            new.parent_id.as_deref().unwrap_or("-")
        ));
    }
    if old.name != new.name {
        kind.get_or_insert(ChangeKind::ModifiedName);
        details.push(format!("Name changed: {} → {}", old.name, new.name));
    }
    if exposed_ports(old) != exposed_ports(new) {
        kind.get_or_insert(ChangeKind::ModifiedExposedPorts);
        details.push("Exposed ports changed".to_string());
    }

    kind.map(|kind| TopologyChange {
        kind,
        fingerprint: print.to_string(),
        entity_id: new.id.clone(),
        details: details.join("; "),
    })
}
