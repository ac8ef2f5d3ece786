//! Invariant checks over the correlated universe.
//!
//! Runs after correlation so post-merge state is authoritative. The one
//! mutation performed here is the absorption of an anonymous `Unknown`
//! record into the identified entity sharing its endpoint; everything else
//! only reports.

use crate::model::{keys, Conflict, ConflictKind, Entity, EntityType};
use std::collections::BTreeMap;

/// Scan the universe for invariant violations and emit the conflict list
pub fn detect(universe: &mut Vec<Entity>) -> Vec<Conflict> {
    merge_unknown_duplicates(universe);

    let mut conflicts = Vec::new();
    conflicts.extend(type_mismatches(universe));
    conflicts.extend(unverified_entities(universe));
    conflicts.extend(ip_mismatches(universe));
    conflicts
}

/// Endpoint grouping key: `(ip, port)` per open port, or the bare ip for
/// entities that reported none
fn endpoint_keys(entity: &Entity) -> Vec<(String, Option<u16>)> {
    if entity.open_ports.is_empty() {
        vec![(entity.ip.clone(), None)]
    } else {
        entity
            .open_ports
            .iter()
            .map(|port| (entity.ip.clone(), Some(*port)))
            .collect()
    }
}

fn endpoint_groups(universe: &[Entity]) -> BTreeMap<(String, Option<u16>), Vec<usize>> {
    let mut groups: BTreeMap<(String, Option<u16>), Vec<usize>> = BTreeMap::new();
    for (idx, entity) in universe.iter().enumerate() {
        if !entity.is_endpoint() || entity.ip.is_empty() {
            continue;
        }
        for key in endpoint_keys(entity) {
            groups.entry(key).or_default().push(idx);
        }
    }
    groups
}

/// A group of exactly one `Unknown` plus identified entities is not a
/// conflict: the anonymous record is what the sweep saw before an adapter
/// named the same endpoint. Ports are unioned and metadata is taken where
/// the identified entity had none.
fn merge_unknown_duplicates(universe: &mut Vec<Entity>) {
    loop {
        let mut merge: Option<(usize, usize)> = None;

        for indices in endpoint_groups(universe).values() {
            let unknowns: Vec<usize> = indices
                .iter()
                .copied()
                .filter(|&idx| universe[idx].entity_type == EntityType::Unknown)
                .collect();
            let identified: Vec<usize> = indices
                .iter()
                .copied()
                .filter(|&idx| universe[idx].entity_type != EntityType::Unknown)
                .collect();

            if unknowns.len() == 1 && !identified.is_empty() {
                merge = Some((unknowns[0], identified[0]));
                break;
            }
        }

        let Some((unknown_idx, identified_idx)) = merge else {
            break;
        };

        let absorbed = universe.remove(unknown_idx);
        let target_idx = if identified_idx > unknown_idx {
            identified_idx - 1
        } else {
            identified_idx
        };
        let target = &mut universe[target_idx];

        target.open_ports.extend(&absorbed.open_ports);
        for (key, value) in absorbed.metadata {
            target.metadata.entry(key).or_insert(value);
        }
        for (key, value) in absorbed.http_headers {
            target.http_headers.entry(key).or_insert(value);
        }
        if target.name.is_empty() {
            target.name = absorbed.name;
        }
    }
}

fn type_mismatches(universe: &[Entity]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let mut reported: Vec<Vec<String>> = Vec::new();

    for ((ip, port), indices) in endpoint_groups(universe) {
        let mut types: Vec<EntityType> =
            indices.iter().map(|&idx| universe[idx].entity_type).collect();
        types.sort();
        types.dedup();
        if types.len() < 2 {
            continue;
        }

        let mut involved: Vec<String> = indices
            .iter()
            .map(|&idx| universe[idx].id.clone())
            .collect();
        involved.sort();
        // The same pair of entities collides once per shared port
        if reported.contains(&involved) {
            continue;
        }
        reported.push(involved.clone());

        let location = match port {
            Some(port) => format!("{}:{}", ip, port),
            None => ip.clone(),
        };
        let type_list = types
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        conflicts.push(Conflict {
            ip,
            kind: ConflictKind::TypeMismatch,
            involved,
            description: format!(
                "Entities of different types share endpoint {}: {}",
                location, type_list
            ),
        });
    }

    conflicts
}

fn unverified_entities(universe: &[Entity]) -> Vec<Conflict> {
    universe
        .iter()
        .filter(|entity| entity.status == crate::model::EntityStatus::Unverified)
        .map(|entity| Conflict {
            ip: entity.ip.clone(),
            kind: ConflictKind::UnverifiedEntity,
            involved: vec![entity.id.clone()],
            description: format!(
                "Entity '{}' could not be verified{}",
                entity.id,
                entity
                    .meta_str(keys::SCAN_ERROR)
                    .map(|e| format!(": {}", e))
                    .unwrap_or_default()
            ),
        })
        .collect()
}

fn ip_mismatches(universe: &[Entity]) -> Vec<Conflict> {
    universe
        .iter()
        .filter_map(|entity| {
            let reported = entity.meta_str(keys::API_REPORTED_IP)?;
            if reported.is_empty() || reported == entity.ip {
                return None;
            }
            Some(Conflict {
                ip: entity.ip.clone(),
                kind: ConflictKind::IpMismatch,
                involved: vec![entity.id.clone()],
                description: format!(
                    "API reports {} but scan observed {}",
                    reported,
                    if entity.ip.is_empty() {
                        "no address"
                    } else {
                        entity.ip.as_str()
                    }
                ),
            })
        })
        .collect()
}
