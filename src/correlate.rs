//! Post-orchestration correlation passes.
//!
//! Each pass is a pure function over the universe vector, deterministic in
//! insertion order and idempotent: applying a pass twice leaves the universe
//! exactly as one application did.

use crate::model::{keys, Entity, EntityStatus, EntityType};
use std::collections::BTreeSet;

/// Run all five passes in their fixed order
pub fn run(universe: &mut Vec<Entity>, swept: &BTreeSet<String>) {
    reparent_stack_containers(universe);
    promote_vm_ips(universe, swept);
    identify_portainer_containers(universe);
    suppress_duplicate_cluster_nodes(universe);
    reparent_unraid_containers(universe);
}

/// Does `listed` name this container? Engine ids are matched in full or by
/// the usual 12-character short form, in either direction.
fn container_id_matches(listed: &str, container: &Entity) -> bool {
    for key in [keys::DOCKER_ID, keys::CONTAINER_ID] {
        if let Some(id) = container.meta_str(key) {
            if id == listed || id.starts_with(listed) || listed.starts_with(id) {
                return true;
            }
        }
    }
    false
}

/// Pass 1: containers listed by a Portainer stack become children of that
/// stack
pub fn reparent_stack_containers(universe: &mut Vec<Entity>) {
    let mut moves: Vec<(usize, String)> = Vec::new();

    for stack in universe.iter() {
        if stack.entity_type != EntityType::PortainerStack {
            continue;
        }
        let Some(listed_ids) = stack
            .metadata
            .get(keys::CONTAINER_IDS)
            .and_then(|value| value.as_list())
        else {
            continue;
        };

        for (idx, candidate) in universe.iter().enumerate() {
            if candidate.entity_type != EntityType::Container {
                continue;
            }
            if listed_ids
                .iter()
                .any(|listed| container_id_matches(listed, candidate))
            {
                moves.push((idx, stack.id.clone()));
            }
        }
    }

    for (idx, stack_id) in moves {
        universe[idx].parent_id = Some(stack_id);
    }
}

/// Pass 2: a guest that only the platform API located adopts its reported
/// address; the anonymous host record at that address collapses into the
/// guest, and a container engine at the same address is reparented under it
pub fn promote_vm_ips(universe: &mut Vec<Entity>, swept: &BTreeSet<String>) {
    // Ids, not indices: the collapse below removes entries
    let guest_ids: Vec<String> = universe
        .iter()
        .filter(|e| matches!(e.entity_type, EntityType::Vm | EntityType::Lxc))
        .map(|e| e.id.clone())
        .collect();

    for guest_id in guest_ids {
        let Some(guest) = universe.iter_mut().find(|e| e.id == guest_id) else {
            continue;
        };

        // Adopt the API-reported address when sweep saw nothing
        if guest.ip.is_empty() {
            let reported = guest
                .meta_str(keys::API_REPORTED_IP)
                .unwrap_or_default()
                .to_string();
            if reported.is_empty() {
                continue;
            }
            guest.status = if swept.contains(&reported) {
                EntityStatus::Reachable
            } else {
                EntityStatus::Unverified
            };
            guest.ip = reported;
        }

        let guest_ip = guest.ip.clone();
        if guest_ip.is_empty() {
            continue;
        }

        // Collapse the anonymous sweep record into the guest
        let mut absorbed_ports: BTreeSet<u16> = BTreeSet::new();
        universe.retain(|other| {
            let duplicate =
                other.entity_type == EntityType::Unknown && other.ip == guest_ip;
            if duplicate {
                absorbed_ports.extend(&other.open_ports);
            }
            !duplicate
        });
        let guest = universe
            .iter_mut()
            .find(|e| e.id == guest_id)
            .expect("guest survives retain");
        if guest.open_ports.is_empty() {
            guest.open_ports = absorbed_ports;
        }

        // The engine living at the guest's address is the guest
        for other in universe.iter_mut() {
            if other.id != guest_id
                && other.ip == guest_ip
                && matches!(
                    other.entity_type,
                    EntityType::DockerHost | EntityType::PortainerService
                )
            {
                other.parent_id = Some(guest_id.clone());
            }
        }
    }
}

/// Pass 3: tie each Portainer service to the container actually running it
pub fn identify_portainer_containers(universe: &mut Vec<Entity>) {
    let services: Vec<(String, String)> = universe
        .iter()
        .filter(|e| e.entity_type == EntityType::PortainerService)
        .map(|e| (e.id.clone(), e.ip.clone()))
        .collect();

    for (service_id, service_ip) in services {
        let matched = universe.iter_mut().find(|candidate| {
            candidate.entity_type == EntityType::Container
                && candidate.id != service_id
                && ((!service_ip.is_empty() && candidate.ip == service_ip)
                    || candidate.name.to_lowercase().contains("portainer"))
        });
        if let Some(container) = matched {
            container.entity_type = EntityType::PortainerService;
            container.set_meta(keys::REASON, "Runs the Portainer service");
        }
    }
}

/// Pass 4: a cluster member that re-entered the scan through its own address
/// is folded under the cluster instead of standing as a second root
pub fn suppress_duplicate_cluster_nodes(universe: &mut Vec<Entity>) {
    let clusters: Vec<(String, BTreeSet<String>)> = universe
        .iter()
        .filter(|e| e.entity_type == EntityType::ProxmoxCluster)
        .map(|cluster| {
            let node_ips = universe
                .iter()
                .filter(|node| {
                    node.entity_type == EntityType::ProxmoxNode
                        && node.parent_id.as_deref() == Some(cluster.id.as_str())
                        && !node.ip.is_empty()
                })
                .map(|node| node.ip.clone())
                .collect();
            (cluster.id.clone(), node_ips)
        })
        .collect();

    for (cluster_id, node_ips) in clusters {
        for entity in universe.iter_mut() {
            let unparented =
                matches!(entity.parent_id.as_deref(), None | Some(""));
            if unparented
                && matches!(
                    entity.entity_type,
                    EntityType::Proxmox | EntityType::Service
                )
                && node_ips.contains(&entity.ip)
            {
                entity.parent_id = Some(cluster_id.clone());
                entity.status = EntityStatus::Unreachable;
                entity.set_meta(keys::REASON, "Duplicate cluster node");
            }
        }
    }
}

/// Pass 5: containers on an Unraid box hang off the Unraid entity, except
/// those already grouped by a Portainer stack; the stacks themselves move
/// under Unraid
pub fn reparent_unraid_containers(universe: &mut Vec<Entity>) {
    let unraid_hosts: Vec<(String, String)> = universe
        .iter()
        .filter(|e| e.entity_type == EntityType::Unraid && !e.ip.is_empty())
        .map(|e| (e.id.clone(), e.ip.clone()))
        .collect();

    for (unraid_id, unraid_ip) in unraid_hosts {
        let stack_ids: BTreeSet<String> = universe
            .iter()
            .filter(|e| e.entity_type == EntityType::PortainerStack)
            .map(|e| e.id.clone())
            .collect();

        let mut moves: Vec<usize> = Vec::new();
        for (idx, entity) in universe.iter().enumerate() {
            if entity.id == unraid_id {
                continue;
            }
            match entity.entity_type {
                EntityType::Container => {
                    let in_stack = entity
                        .parent_id
                        .as_deref()
                        .map(|parent| stack_ids.contains(parent))
                        .unwrap_or(false);
                    if entity.ip == unraid_ip && !in_stack {
                        moves.push(idx);
                    }
                }
                EntityType::PortainerStack => {
                    // A stack parented to anything at the Unraid address
                    // belongs to the Unraid box
                    let parent_ip = entity.parent_id.as_deref().and_then(|parent| {
                        universe
                            .iter()
                            .find(|candidate| candidate.id == parent)
                            .map(|candidate| candidate.ip.clone())
                    });
                    if parent_ip.as_deref() == Some(unraid_ip.as_str()) {
                        moves.push(idx);
                    }
                }
                _ => {}
            }
        }

        for idx in moves {
            universe[idx].parent_id = Some(unraid_id.clone());
        }
    }
}
